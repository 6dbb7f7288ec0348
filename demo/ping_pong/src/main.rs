use std::time::Duration;

use crosswin_core::{status, Bridge, BridgeConfig, BridgeError, Window};
use serde_json::{json, Value};
use tracing::{info, warn};

const HOST_ORIGIN: &str = "https://app.example";
const WIDGET_ORIGIN: &str = "https://widget.example";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,crosswin=info,ping_pong=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Defaults + env + optional TOML overlay; origins are fixed by the demo
    let base = BridgeConfig::load();
    info!(target: "ping_pong", namespace = %base.namespace, "Starting ping-pong demo");

    let page = Window::new(HOST_ORIGIN);
    let frame = Window::new(WIDGET_ORIGIN);

    let host = Bridge::new(
        page.clone(),
        base.clone().with_target_origin(WIDGET_ORIGIN),
    )?;
    let widget = Bridge::new(
        frame.clone(),
        base.clone().with_target_origin(HOST_ORIGIN),
    )?;
    host.add_target(page.proxy_to(&frame));
    widget.add_target(frame.proxy_to(&page));

    // Widget side
    widget.on_request("ping", |params| {
        let n = params["n"].as_i64().unwrap_or(0);
        Ok(Some(json!({ "n": n + 1 })))
    });
    widget.once_request("handshake", |params| {
        Ok(Some(json!({ "accepted": true, "client": params["client"].clone() })))
    });
    widget.on_request("divide", |params| {
        let a = params["a"].as_f64().unwrap_or(0.0);
        let b = params["b"].as_f64().unwrap_or(0.0);
        if b == 0.0 {
            return Err("division by zero".into());
        }
        Ok(Some(json!(a / b)))
    });
    widget.on_event("theme", |params: &Value| {
        info!(target: "ping_pong", theme = %params["name"], "Widget switched theme");
        Ok(())
    });

    // Host side
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    host.on_event("widget.ready", move |params: &Value| {
        let _ = done_tx.send(params.clone());
        Ok(())
    });

    widget.emit_event("widget.ready", json!({ "version": 1 }))?;
    if let Some(ready) = done_rx.recv().await {
        info!(target: "ping_pong", ready = %ready, "Host saw widget.ready");
    }

    host.emit_event("theme", json!({ "name": "dark" }))?;

    let mut n = json!({ "n": 0 });
    for _ in 0..3 {
        n = host.request("ping", n).await?;
        info!(target: "ping_pong", reply = %n, "ping");
    }

    for attempt in 0..2 {
        let reply = host.request("handshake", json!({ "client": "host" })).await?;
        info!(target: "ping_pong", attempt, reply = %reply, "handshake");
    }

    let reply = host.request("divide", json!({ "a": 1, "b": 0 })).await?;
    if reply["status"] == status::ERROR {
        warn!(target: "ping_pong", message = %reply["message"], "Widget reported an error");
    }

    let reply = host.request("unknown", Value::Null).await?;
    info!(target: "ping_pong", reply = %reply, "Request without handler");

    host.start_heartbeat(Duration::from_millis(200))?;
    tokio::time::sleep(Duration::from_millis(650)).await;
    let live = host.liveness();
    info!(
        target: "ping_pong",
        sent = live.sent,
        acknowledged = ?live.last_acknowledged,
        "Heartbeat"
    );

    // A request the widget will never see once it is gone
    widget.destroy();
    let orphan = host.request("ping", json!({ "n": 41 }));
    host.destroy();
    match orphan.await {
        Err(BridgeError::Destroyed) => info!(target: "ping_pong", "Pending request failed on teardown"),
        other => warn!(target: "ping_pong", outcome = ?other, "Unexpected teardown outcome"),
    }

    info!(
        target: "ping_pong",
        page_listeners = page.listener_count(),
        frame_listeners = frame.listener_count(),
        stats = ?frame.stats(),
        "Done"
    );
    Ok(())
}
