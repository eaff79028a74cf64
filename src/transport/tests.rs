use crate::broker::Broker;
use crate::broker::request::SendEventToClientDeviceChannelRequest;
use crate::config::Settings;
use crate::transport::message::{ServiceRequest, ServiceResponse, decode, encode};
use crate::transport::websocket::{Route, handle_service_request, resolve_route};
use serde_json::json;
use tungstenite::handshake::server::Request;
use tungstenite::protocol::Message as WsMessage;

fn request(path: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = Request::builder().uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).unwrap()
}

#[test]
fn test_decode_service_requests() {
    let req: ServiceRequest = decode(
        &json!({
            "type": "send_event_to_client_device_channel",
            "client_id": "c1",
            "device_id": "d1",
            "event": { "name": "ping", "format_type": "JSON", "data": "e30=" }
        })
        .to_string(),
    )
    .unwrap();
    let ServiceRequest::SendEventToClientDeviceChannel(req) = req else {
        panic!("wrong variant: {req:?}");
    };
    assert_eq!(req.device_id, "d1");
    assert_eq!(req.event.unwrap().data(), b"{}");

    let req: ServiceRequest = decode(&json!({ "type": "get_metrics" }).to_string()).unwrap();
    assert_eq!(req, ServiceRequest::GetMetrics);

    let req: ServiceRequest = decode(
        &json!({ "type": "send_event_to_topics", "requests": [ { "topic": "a" } ] }).to_string(),
    )
    .unwrap();
    let ServiceRequest::SendEventToTopics(batch) = req else {
        panic!("wrong variant");
    };
    assert!(batch.requests[0].event.is_none());
}

#[test]
fn test_decode_rejects_unknown_type() {
    let err = decode::<ServiceRequest>(r#"{"type":"drop_tables"}"#).unwrap_err();
    assert_eq!(err.code(), "MalformedRequest");

    let err = decode::<ServiceRequest>("not json").unwrap_err();
    assert_eq!(err.code(), "MalformedRequest");
}

#[test]
fn test_encode_error_response() {
    let err = decode::<ServiceRequest>("{}").unwrap_err();
    let frame = encode(&ServiceResponse::Error { status: err.into() }).unwrap();

    let WsMessage::Text(text) = frame else {
        panic!("expected a text frame");
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "error");
    assert_eq!(value["status"]["success"], false);
    assert_eq!(value["status"]["error_code"], "MalformedRequest");
}

#[test]
fn test_resolve_rpc_route() {
    let settings = Settings::default();
    let route = resolve_route(&request("/rpc", &[]), &settings.client, true).unwrap();
    assert_eq!(route, Route::Rpc);
}

#[test]
fn test_resolve_channel_route() {
    let mut settings = Settings::default();
    settings.client.device_attribute_headers = vec!["x-platform".to_string()];

    let req = request(
        "/",
        &[
            ("x-client-id", "c1"),
            ("x-device-id", "d1"),
            ("x-platform", "ios"),
            ("x-ignored", "nope"),
        ],
    );
    let Route::Channel(identity) = resolve_route(&req, &settings.client, true).unwrap() else {
        panic!("expected a channel route");
    };

    assert_eq!(identity.client_id, "c1");
    assert_eq!(identity.device_id.as_deref(), Some("d1"));
    assert_eq!(identity.attributes.len(), 1);
    assert_eq!(identity.attributes["x-platform"], "ios");
}

#[test]
fn test_channel_route_requires_identity_headers() {
    let settings = Settings::default();

    let err = resolve_route(&request("/", &[("x-device-id", "d1")]), &settings.client, true)
        .unwrap_err();
    assert_eq!(err.code(), "MalformedRequest");

    let err = resolve_route(&request("/", &[("x-client-id", "c1")]), &settings.client, true)
        .unwrap_err();
    assert_eq!(err.code(), "MalformedRequest");

    // Device header is optional without device support
    let route = resolve_route(&request("/", &[("x-client-id", "c1")]), &settings.client, false)
        .unwrap();
    assert!(matches!(route, Route::Channel(identity) if identity.device_id.is_none()));
}

#[tokio::test]
async fn test_handle_service_request() {
    let broker = Broker::default();

    let resp = handle_service_request(
        &broker,
        ServiceRequest::SendEventToClientDeviceChannel(SendEventToClientDeviceChannelRequest {
            client_id: "c1".into(),
            device_id: "d9".into(),
            event: None,
        }),
    )
    .await;
    let ServiceResponse::SendEventToClientDeviceChannel(resp) = resp else {
        panic!("wrong variant");
    };
    assert_eq!(resp.status.error_code, "MalformedRequest");

    let resp = handle_service_request(&broker, ServiceRequest::GetMetrics).await;
    let ServiceResponse::Metrics(snapshot) = resp else {
        panic!("wrong variant");
    };
    assert_eq!(snapshot.connected_sessions, 0);
}
