use afterburner::protocol::command_from_json;
use afterburner::{HeaterClient, LinkState, WebSocketConfig};
use std::env;
use std::time::Duration;

/// Sends one raw JSON command over WebSocket and prints whatever comes back.
///
///   send_command heater.local '{"Run":"heat"}'
///   send_command heater.local '{"CyclicTemp":68}'
#[tokio::main]
async fn main() -> afterburner::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let (Some(host), Some(raw)) = (args.get(1), args.get(2)) else {
        eprintln!("usage: send_command <host> '<json object>'");
        std::process::exit(2);
    };
    let command = command_from_json(raw)?;

    let client = HeaterClient::builder()
        .websocket(WebSocketConfig::new(host.as_str()))
        .on_message(|payload| {
            println!("<- {}", serde_json::Value::Object(payload.clone()));
        })
        .build()?;
    client.start().await?;

    let mut link = client.watch_link();
    tokio::time::timeout(
        Duration::from_secs(15),
        link.wait_for(|s| *s == LinkState::Connected),
    )
    .await
    .map_err(|_| afterburner::Error::Timeout)?
    .map_err(|_| afterburner::Error::NotConnected)?;

    println!("-> {}", serde_json::Value::Object(command.clone()));
    client.send(&command).await?;

    tokio::time::sleep(Duration::from_secs(3)).await;
    client.stop().await?;
    Ok(())
}
