use afterburner::{BleConfig, HeaterClient, WebSocketConfig};
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> afterburner::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let target = args
        .get(1)
        .expect("usage: monitor <host | ble:AA:BB:CC:DD:EE:FF> [--port N] [--token T]");
    let port = flag(&args, "--port").and_then(|p| p.parse().ok());
    let token = flag(&args, "--token");

    let builder = HeaterClient::builder().on_snapshot(|state| {
        println!(
            "temp: {} | humidity: {} | voltage: {} | running: {} | state: {}",
            fmt(state.temperature()),
            fmt(state.humidity()),
            fmt(state.voltage()),
            state.power().map_or("?".to_string(), |p| p.to_string()),
            state.state_text().unwrap_or_else(|| "?".to_string()),
        );
    });

    let builder = match target.strip_prefix("ble:") {
        Some(address) => builder.ble(BleConfig::new(address)),
        None => {
            let mut config = WebSocketConfig::new(target.as_str());
            if let Some(port) = port {
                config.port = Some(port);
            }
            config.token = token;
            builder.websocket(config)
        }
    };
    let client = builder.build()?;

    println!("Connecting to {target}...");
    client.start().await?;

    let mut poll = tokio::time::interval(client.transport_kind().default_poll_interval());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                if let Err(e) = client.request_refresh().await {
                    eprintln!("Refresh error: {e}");
                }
                let health = client.health();
                if let Some(avg) = health.avg_latency_ms() {
                    println!(
                        "link: {:?} | messages: {} | avg latency: {avg:.0} ms{}",
                        client.link_state(),
                        health.message_count(),
                        if health.is_stale() { " | STALE" } else { "" },
                    );
                }
            }
        }
    }

    client.stop().await?;
    Ok(())
}

fn flag(args: &[String], name: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == name)?;
    args.get(pos + 1).cloned()
}

fn fmt(value: Option<f64>) -> String {
    value.map_or("?".to_string(), |v| format!("{v:.1}"))
}
