use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;

/// Default timeout for HTTP requests (30 seconds)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// GET `url` and return the body, failing on non-2xx.
pub async fn get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("Request to {} failed: {} - {}", url, status, body);
    }

    Ok(response.text().await?)
}

/// POST a JSON body, failing on non-2xx.
pub async fn post_json<T: Serialize>(client: &reqwest::Client, url: &str, body: &T) -> Result<()> {
    let response = client.post(url).json(body).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("Request to {} failed: {} - {}", url, status, body);
    }

    Ok(())
}
