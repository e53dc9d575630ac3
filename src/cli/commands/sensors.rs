use anyhow::{bail, Result};

use super::http;
use crate::cli::url::resolve_server_url;
use crate::cli::SensorsArgs;
use crate::metric::Metric;

pub async fn execute_sensors(args: SensorsArgs) -> Result<()> {
    let Some(metric) = Metric::from_name(&args.metric) else {
        bail!("Metric must be 'temperature' or 'humidity', got: {}", args.metric);
    };

    let base_url = resolve_server_url(args.url.as_deref());
    let url = format!("{}/v1/sensors/{}", base_url, metric);

    let body = http::get_text(&http::client()?, &url).await?;
    println!("{}", body);

    Ok(())
}
