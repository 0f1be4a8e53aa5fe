mod common;

use std::time::Duration;

use common::{memory_bus, spawn_server};
use futures::StreamExt;
use renamer_core::job_events::ProgressEventType;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Next JSON text frame, skipping control frames.
async fn next_json(socket: &mut Socket) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame within 5s")
            .expect("socket open")
            .expect("valid frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn wait_for_listener(bus: &renamer_events::ProgressBus, job_id: &str) {
    for _ in 0..100 {
        if bus.listener_count(job_id).await > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("socket never subscribed");
}

#[tokio::test]
async fn socket_replays_history_then_streams_live_events() {
    let bus = memory_bus();
    bus.publish("jr_ws", ProgressEventType::JobStarted, json!({"total_files": 1}))
        .await;
    bus.publish("jr_ws", ProgressEventType::ItemProcessing, json!({"index": 0}))
        .await;

    let addr = spawn_server(bus.clone()).await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/jobs/jr_ws/ws"))
        .await
        .unwrap();

    assert_eq!(next_json(&mut socket).await["type"], "job_started");
    assert_eq!(next_json(&mut socket).await["type"], "item_processing");

    bus.publish(
        "jr_ws",
        ProgressEventType::JobComplete,
        json!({"completed": 1, "errors": 0}),
    )
    .await;

    let live = next_json(&mut socket).await;
    assert_eq!(live["type"], "job_complete");
    assert_eq!(live["job_id"], "jr_ws");
    assert_eq!(live["completed"], 1);
}

#[tokio::test]
async fn closing_the_socket_unsubscribes() {
    let bus = memory_bus();
    let addr = spawn_server(bus.clone()).await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/jobs/gone/ws"))
        .await
        .unwrap();
    wait_for_listener(&bus, "gone").await;

    socket.close(None).await.unwrap();

    for _ in 0..100 {
        if bus.listener_count("gone").await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener was not removed after close");
}
