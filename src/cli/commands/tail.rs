use anyhow::{bail, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::cli::url::{resolve_server_url, to_ws_url};
use crate::cli::TailArgs;
use crate::livetail::ClientMessage;
use crate::metric::Metric;

/// Stream path for a tail target: a metric name or `system`.
fn stream_path(target: &str) -> Result<String> {
    if target == "system" {
        return Ok("/v1/ws/system".to_string());
    }
    match Metric::from_name(target) {
        Some(metric) => Ok(format!("/v1/ws/sensors/{}", metric)),
        None => bail!(
            "Target must be 'temperature', 'humidity' or 'system', got: {}",
            target
        ),
    }
}

pub async fn execute_tail(args: TailArgs) -> Result<()> {
    let path = stream_path(&args.metric)?;
    if args.sensor.is_some() && args.metric == "system" {
        bail!("A sensor can only be tailed on a metric stream");
    }

    let base_url = resolve_server_url(args.url.as_deref());
    let url = format!("{}{}", to_ws_url(&base_url)?, path);

    eprintln!("Connecting to {}...", url);

    let (ws_stream, _) = connect_async(&url).await?;
    let (mut write, mut read) = ws_stream.split();

    if let Some(sensor_id) = &args.sensor {
        let subscribe = serde_json::to_string(&ClientMessage::Subscribe {
            sensor_id: sensor_id.clone(),
        })?;
        write.send(Message::Text(subscribe)).await?;
        eprintln!("Connected. Streaming {} for sensor '{}'...", args.metric, sensor_id);
    } else {
        eprintln!("Connected. Streaming {} registry updates...", args.metric);
    }
    eprintln!("Press Ctrl+C to stop.\n");

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                println!("{}", text);
            }
            Ok(Message::Close(_)) => {
                eprintln!("Connection closed by server");
                break;
            }
            Err(e) => {
                eprintln!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
