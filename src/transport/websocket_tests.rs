use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::broker::Broker;
use crate::broker::message::{
    ChannelEventAck, ChannelRequest, ChannelResponse, Event, TopicSubscriptionRequest,
};
use crate::broker::request::SendEventToTopicRequest;
use crate::broker::status::ResponseStatus;
use crate::config::Settings;
use crate::transport::message::{ServiceRequest, ServiceResponse};
use crate::transport::websocket::serve;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn setup_server(settings: Settings) -> (SocketAddr, Arc<Broker>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    let broker = Arc::new(Broker::new(settings.broker.clone()));

    tokio::spawn(serve(listener, broker.clone(), settings));
    (addr, broker)
}

async fn open_channel(addr: SocketAddr, client_id: &str, device_id: &str) -> Ws {
    let mut req = format!("ws://{addr}/").into_client_request().unwrap();
    req.headers_mut()
        .insert("x-client-id", HeaderValue::from_str(client_id).unwrap());
    req.headers_mut()
        .insert("x-device-id", HeaderValue::from_str(device_id).unwrap());

    let (mut ws, _) = connect_async(req).await.expect("WebSocket handshake failed");
    match recv::<ChannelResponse>(&mut ws).await {
        ChannelResponse::ConnectAck(ack) => assert!(ack.status.success),
        other => panic!("Expected ConnectAck, got {other:?}"),
    }
    ws
}

async fn send<T: Serialize>(ws: &mut Ws, msg: &T) {
    ws.send(WsMessage::Text(serde_json::to_string(msg).unwrap().into()))
        .await
        .expect("Failed to send");
}

async fn recv<T: DeserializeOwned>(ws: &mut Ws) -> T {
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Timed out waiting for a frame")
        .expect("Stream ended")
        .expect("Read failed");
    let raw = frame.into_data();
    serde_json::from_slice(&raw)
        .unwrap_or_else(|e| panic!("Failed to decode '{}': {e}", String::from_utf8_lossy(&raw)))
}

async fn rpc<T: Serialize>(addr: SocketAddr, req: &T) -> ServiceResponse {
    let (mut ws, _) = connect_async(format!("ws://{addr}/rpc"))
        .await
        .expect("WebSocket handshake failed");
    send(&mut ws, req).await;
    recv(&mut ws).await
}

#[tokio::test]
async fn test_subscribe_publish_and_ack() {
    let (addr, broker) = setup_server(Settings::default()).await;
    let mut sub = open_channel(addr, "c1", "d1").await;

    send(
        &mut sub,
        &ChannelRequest::TopicSubscriptionRequest(TopicSubscriptionRequest {
            topic: "news".into(),
        }),
    )
    .await;
    match recv::<ChannelResponse>(&mut sub).await {
        ChannelResponse::TopicSubscriptionRequestAck(ack) => {
            assert_eq!(ack.topic, "news");
            assert!(ack.status.success);
        }
        other => panic!("Expected subscription ack, got {other:?}"),
    }

    let event = Event::json("greeting", &"hello").unwrap();
    let resp = rpc(
        addr,
        &ServiceRequest::SendEventToTopic(SendEventToTopicRequest {
            topic: "news".into(),
            event: Some(Arc::new(event.clone())),
        }),
    )
    .await;
    let ServiceResponse::SendEventToTopic(resp) = resp else {
        panic!("Expected SendEventToTopic response, got {resp:?}");
    };
    assert!(resp.status.success);
    assert_eq!(resp.status.message["delivered"], "1");

    let pushed = match recv::<ChannelResponse>(&mut sub).await {
        ChannelResponse::ChannelEvent(ev) => ev,
        other => panic!("Expected ChannelEvent, got {other:?}"),
    };
    assert_eq!(pushed.topic, "news");
    assert_eq!(pushed.event.as_deref(), Some(&event));

    send(
        &mut sub,
        &ChannelRequest::ChannelEventAck(ChannelEventAck {
            unique_id: pushed.unique_id,
            status: ResponseStatus::ok(),
        }),
    )
    .await;

    // The ack produces no response; poll until the broker has seen it
    for _ in 0..50 {
        if broker.metrics().events_acked == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(broker.metrics().events_acked, 1);
}

#[tokio::test]
async fn test_disconnect_releases_device() {
    let (addr, broker) = setup_server(Settings::default()).await;
    let mut ws = open_channel(addr, "c1", "d1").await;
    assert!(broker.directory().is_online("c1"));

    ws.close(None).await.unwrap();
    drop(ws);

    for _ in 0..50 {
        if !broker.directory().is_online("c1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!broker.directory().is_online("c1"));
    assert_eq!(broker.session_count(), 0);
}

#[tokio::test]
async fn test_binary_frame_closes_session() {
    let (addr, broker) = setup_server(Settings::default()).await;
    let mut ws = open_channel(addr, "c1", "d1").await;

    ws.send(WsMessage::Binary(vec![1, 2, 3].into())).await.unwrap();

    for _ in 0..50 {
        if broker.session_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(broker.session_count(), 0);
}

#[tokio::test]
async fn test_invalid_text_is_skipped() {
    let (addr, _broker) = setup_server(Settings::default()).await;
    let mut ws = open_channel(addr, "c1", "d1").await;

    ws.send(WsMessage::Text("{ nonsense".to_string().into())).await.unwrap();
    send(
        &mut ws,
        &ChannelRequest::TopicSubscriptionRequest(TopicSubscriptionRequest {
            topic: "news".into(),
        }),
    )
    .await;

    match recv::<ChannelResponse>(&mut ws).await {
        ChannelResponse::TopicSubscriptionRequestAck(ack) => assert!(ack.status.success),
        other => panic!("Expected subscription ack, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_requires_client_header() {
    let (addr, broker) = setup_server(Settings::default()).await;

    let res = connect_async(format!("ws://{addr}/")).await;
    assert!(res.is_err());
    assert_eq!(broker.session_count(), 0);
}

#[tokio::test]
async fn test_connection_limit() {
    let mut settings = Settings::default();
    settings.server.max_connections = 1;
    let (addr, _broker) = setup_server(settings).await;

    let _first = open_channel(addr, "c1", "d1").await;

    let mut req = format!("ws://{addr}/").into_client_request().unwrap();
    req.headers_mut()
        .insert("x-client-id", HeaderValue::from_static("c2"));
    req.headers_mut()
        .insert("x-device-id", HeaderValue::from_static("d1"));
    assert!(connect_async(req).await.is_err());
}

#[tokio::test]
async fn test_rpc_connections_do_not_count_against_limit() {
    let mut settings = Settings::default();
    settings.server.max_connections = 1;
    let (addr, broker) = setup_server(settings).await;

    let (_idle_rpc, _) = connect_async(format!("ws://{addr}/rpc"))
        .await
        .expect("rpc handshake failed");

    let _channel = open_channel(addr, "c1", "d1").await;
    assert_eq!(broker.session_count(), 1);

    // Producers are still served while every channel slot is taken
    let resp = rpc(addr, &ServiceRequest::GetMetrics).await;
    let ServiceResponse::Metrics(snapshot) = resp else {
        panic!("Unexpected response {resp:?}");
    };
    assert_eq!(snapshot.connected_sessions, 1);
}

#[tokio::test]
async fn test_silent_peer_does_not_hold_a_slot() {
    let mut settings = Settings::default();
    settings.server.max_connections = 1;
    let (addr, broker) = setup_server(settings).await;

    // Connects but never sends the upgrade request
    let _silent = TcpStream::connect(addr).await.expect("Failed to connect");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let _channel = open_channel(addr, "c1", "d1").await;
    assert_eq!(broker.session_count(), 1);
}

#[tokio::test]
async fn test_rpc_reports_offline_device() {
    let (addr, _broker) = setup_server(Settings::default()).await;

    let resp = rpc(
        addr,
        &serde_json::json!({
            "type": "send_event_to_client_device_channel",
            "client_id": "c1",
            "device_id": "d9",
            "event": { "name": "ping", "format_type": "JSON", "data": "e30=" }
        }),
    )
    .await;

    let ServiceResponse::SendEventToClientDeviceChannel(resp) = resp else {
        panic!("Unexpected response {resp:?}");
    };
    assert!(!resp.status.success);
    assert_eq!(resp.status.error_code, "DeviceNotFound");
}

#[tokio::test]
async fn test_rpc_undecodable_request() {
    let (addr, _broker) = setup_server(Settings::default()).await;

    let resp = rpc(addr, &serde_json::json!({ "type": "no_such_thing" })).await;
    let ServiceResponse::Error { status } = resp else {
        panic!("Unexpected response {resp:?}");
    };
    assert_eq!(status.error_code, "MalformedRequest");
}
