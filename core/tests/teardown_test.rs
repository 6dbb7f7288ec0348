use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crosswin_core::{Bridge, BridgeConfig, BridgeError, Window};
use serde_json::{json, Value};

const HOST: &str = "https://app.example";
const WIDGET: &str = "https://widget.example";

#[tokio::test(start_paused = true)]
async fn destroy_fails_pending_requests() {
    let page = Window::new(HOST);
    let silent = Window::new(WIDGET);
    let host = Bridge::new(page.clone(), BridgeConfig::default().with_target_origin(WIDGET)).unwrap();
    host.add_target(page.proxy_to(&silent));

    let first = host.request("a", json!({}));
    let second = host.request("b", json!({}));
    assert_eq!(host.pending_count(), 2);

    host.destroy();
    assert!(matches!(first.await, Err(BridgeError::Destroyed)));
    assert!(matches!(second.await, Err(BridgeError::Destroyed)));
    assert_eq!(host.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn destroyed_bridge_stops_listening() {
    let page = Window::new(HOST);
    let frame = Window::new(WIDGET);
    let host = Bridge::new(page.clone(), BridgeConfig::default().with_target_origin(WIDGET)).unwrap();
    let widget = Bridge::new(frame.clone(), BridgeConfig::default().with_target_origin(HOST)).unwrap();
    host.add_target(page.proxy_to(&frame));

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    widget.on_event("poke", move |_: &Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    host.emit_event("poke", json!({})).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(frame.listener_count(), 1);

    widget.destroy();
    assert!(widget.is_destroyed());
    assert_eq!(frame.listener_count(), 0);

    host.emit_event("poke", json!({})).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn destroyed_bridge_refuses_to_send() {
    let page = Window::new(HOST);
    let frame = Window::new(WIDGET);
    let host = Bridge::new(page.clone(), BridgeConfig::default().with_target_origin(WIDGET)).unwrap();
    host.add_target(page.proxy_to(&frame));
    host.start_heartbeat(Duration::from_millis(100)).unwrap();

    host.destroy();
    assert!(!host.is_heartbeat_running());
    assert_eq!(host.target_count(), 0);

    assert!(matches!(host.emit_event("x", json!({})), Err(BridgeError::Destroyed)));
    assert!(matches!(host.request("x", json!({})).await, Err(BridgeError::Destroyed)));
    assert!(matches!(
        host.start_heartbeat(Duration::from_millis(100)),
        Err(BridgeError::Destroyed)
    ));

    // Second teardown is a no-op
    host.destroy();
    assert!(host.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn dropping_a_bridge_detaches_it() {
    let page = Window::new(HOST);
    {
        let _bridge = Bridge::new(page.clone(), BridgeConfig::default()).unwrap();
        assert_eq!(page.listener_count(), 1);
    }
    assert_eq!(page.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn destroy_leaves_other_bridges_on_the_window_alone() {
    let page = Window::new(HOST);
    let frame = Window::new(WIDGET);
    let host = Bridge::new(page.clone(), BridgeConfig::default().with_target_origin(WIDGET)).unwrap();
    let doomed = Bridge::new(frame.clone(), BridgeConfig::default().with_target_origin(HOST)).unwrap();
    let survivor = Bridge::new(frame.clone(), BridgeConfig::default().with_target_origin(HOST)).unwrap();
    host.add_target(page.proxy_to(&frame));
    survivor.on_request("alive", |_| Ok(Some(json!(true))));

    doomed.destroy();
    assert_eq!(frame.listener_count(), 1);
    assert_eq!(host.request("alive", json!({})).await.unwrap(), json!(true));
}
