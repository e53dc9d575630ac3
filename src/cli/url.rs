use anyhow::{bail, Result};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3003";

/// Resolve server URL from explicit flag (or `SENSORPIPE_URL`) or the default.
pub fn resolve_server_url(explicit_url: Option<&str>) -> String {
    explicit_url
        .unwrap_or(DEFAULT_SERVER_URL)
        .trim_end_matches('/')
        .to_string()
}

/// Convert http(s) base URL to its ws(s) counterpart.
pub fn to_ws_url(base_url: &str) -> Result<String> {
    if let Some(rest) = base_url.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else if base_url.starts_with("ws://") || base_url.starts_with("wss://") {
        Ok(base_url.to_string())
    } else {
        bail!("Unsupported URL scheme in '{}'", base_url)
    }
}
