use std::time::Duration;

use anyhow::{bail, Result};
use rand::Rng;

use super::http;
use crate::cli::url::resolve_server_url;
use crate::cli::SimulateArgs;
use crate::ingest::{ActivationEvent, ReadingEvent};
use crate::metric::Metric;

pub async fn execute_simulate(args: SimulateArgs) -> Result<()> {
    let Some(metric) = Metric::from_name(&args.metric) else {
        bail!("Metric must be 'temperature' or 'humidity', got: {}", args.metric);
    };
    if !(args.min.is_finite() && args.max.is_finite()) || args.min > args.max {
        bail!("Invalid range {}..={}", args.min, args.max);
    }
    if args.interval_secs == 0 {
        bail!("--interval-secs must be greater than zero");
    }

    let base_url = resolve_server_url(args.url.as_deref());
    let client = http::client()?;

    let activation = ActivationEvent {
        sensor_id: args.sensor.clone(),
        activated: true,
    };
    http::post_json(&client, &format!("{}/v1/sensors/activation", base_url), &activation).await?;

    let url = format!("{}/v1/sensors/{}/readings", base_url, metric);
    eprintln!(
        "Publishing {} readings for '{}' every {}s. Press Ctrl+C to stop.",
        metric, args.sensor, args.interval_secs
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs));
    let mut sent = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let value = rand::thread_rng().gen_range(args.min..=args.max);
                let reading = ReadingEvent::new(args.sensor.clone(), value);
                http::post_json(&client, &url, &reading).await?;
                println!("{} {:.2}", args.sensor, value);

                sent += 1;
                if args.count.is_some_and(|count| sent >= count) {
                    break;
                }
            }
        }
    }

    let deactivation = ActivationEvent {
        sensor_id: args.sensor.clone(),
        activated: false,
    };
    http::post_json(&client, &format!("{}/v1/sensors/activation", base_url), &deactivation)
        .await?;
    eprintln!("Sent {} readings", sent);

    Ok(())
}
