use std::time::Duration;

use crosswin_core::channel::PostTarget;
use crosswin_core::{Bridge, BridgeConfig, MessageFormat, MessageType, RawChannel, RawMessage, Window};
use tokio::sync::mpsc::UnboundedReceiver;

const HOST: &str = "https://app.example";
const WIDGET: &str = "https://widget.example";

fn heartbeats(rx: &mut UnboundedReceiver<RawMessage>) -> Vec<u64> {
    let mut counters = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Some(env) = MessageFormat::Plain.decode(&msg.data) {
            if env.kind == MessageType::Heartbeat {
                counters.push(env.counter.and_then(|c| c.as_u64()).unwrap());
            }
        }
    }
    counters
}

#[tokio::test(start_paused = true)]
async fn heartbeat_ticks_once_per_interval() {
    let page = Window::new(HOST);
    let frame = Window::new(WIDGET);
    let host = Bridge::new(page.clone(), BridgeConfig::default().with_target_origin(WIDGET)).unwrap();
    host.add_target(page.proxy_to(&frame));
    let (_id, mut rx) = frame.listen();

    assert!(host.start_heartbeat(Duration::from_millis(100)).unwrap());
    // A second start does not add a second cycle
    assert!(!host.start_heartbeat(Duration::from_millis(100)).unwrap());
    assert!(host.is_heartbeat_running());

    // Nothing goes out before the first interval has elapsed
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(heartbeats(&mut rx).is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(heartbeats(&mut rx), vec![1, 2, 3]);
    assert_eq!(host.liveness().sent, 3);
}

#[tokio::test(start_paused = true)]
async fn stop_heartbeat_halts_the_cycle() {
    let page = Window::new(HOST);
    let frame = Window::new(WIDGET);
    let host = Bridge::new(page.clone(), BridgeConfig::default().with_target_origin(WIDGET)).unwrap();
    host.add_target(page.proxy_to(&frame));
    let (_id, mut rx) = frame.listen();

    assert!(!host.stop_heartbeat());
    host.start_heartbeat(Duration::from_millis(100)).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(heartbeats(&mut rx), vec![1]);

    assert!(host.stop_heartbeat());
    assert!(!host.is_heartbeat_running());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(heartbeats(&mut rx).is_empty());

    // Restarting continues the counter
    assert!(host.start_heartbeat(Duration::from_millis(100)).unwrap());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(heartbeats(&mut rx), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn peer_echoes_heartbeat_counter() {
    let page = Window::new(HOST);
    let frame = Window::new(WIDGET);
    let host = Bridge::new(page.clone(), BridgeConfig::default().with_target_origin(WIDGET)).unwrap();
    let _widget = Bridge::new(frame.clone(), BridgeConfig::default().with_target_origin(HOST)).unwrap();
    host.add_target(page.proxy_to(&frame));
    let (_id, mut replies) = page.listen();

    assert_eq!(host.liveness().last_acknowledged, None);
    host.start_heartbeat(Duration::from_millis(100)).unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let mut echoed = Vec::new();
    while let Ok(msg) = replies.try_recv() {
        let env = MessageFormat::Plain.decode(&msg.data).unwrap();
        assert_eq!(env.kind, MessageType::HeartbeatResponse);
        assert_eq!(msg.origin, WIDGET);
        echoed.push(env.counter.and_then(|c| c.as_u64()).unwrap());
    }
    assert_eq!(echoed, vec![1, 2]);

    let live = host.liveness();
    assert_eq!(live.sent, 2);
    assert_eq!(live.last_acknowledged, Some(2));
    assert!(live.last_acknowledged_at_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn zero_interval_is_rejected() {
    let page = Window::new(HOST);
    let host = Bridge::new(page, BridgeConfig::default()).unwrap();
    assert!(host.start_heartbeat(Duration::ZERO).is_err());
    assert!(!host.is_heartbeat_running());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_without_targets_keeps_running() {
    let page = Window::new(HOST);
    let host = Bridge::new(page, BridgeConfig::default()).unwrap();
    host.start_heartbeat(Duration::from_millis(100)).unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(host.is_heartbeat_running());
    assert_eq!(host.liveness().sent, 3);
}

#[tokio::test(start_paused = true)]
async fn only_whole_echoes_count_as_acknowledged() {
    let page = Window::new(HOST);
    let frame = Window::new(WIDGET);
    let host = Bridge::new(page.clone(), BridgeConfig::default().with_target_origin(WIDGET)).unwrap();
    let to_page = frame.proxy_to(&page);

    let echo = |counter: serde_json::Value| {
        serde_json::json!({"namespace": "default", "type": "heartbeat-response", "counter": counter})
    };
    to_page.post(echo(serde_json::json!(1.5)), HOST).unwrap();
    to_page.post(echo(serde_json::json!(-3)), HOST).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(host.liveness().last_acknowledged, None);

    to_page.post(echo(serde_json::json!(4)), HOST).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(host.liveness().last_acknowledged, Some(4));
}
