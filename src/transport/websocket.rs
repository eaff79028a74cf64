//! WebSocket transport
//!
//! Accepts TCP connections, performs the WebSocket handshake and hands each
//! connection to one of two loops depending on the request path:
//! - the service path (`/rpc`) carries producer requests, answered in order
//! - any other path opens a channel session for the peer named by the
//!   identity headers
//!
//! A channel connection runs one reader loop (requests are handled one at a
//! time, so acknowledgments leave in request order) and one writer task that
//! drains the session's outbound queue to the socket. Whichever side stops
//! first closes the session, which in turn stops the other.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::sync::mpsc::Receiver;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, error, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::{HeaderMap, StatusCode};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::{ChannelRequest, ChannelResponse};
use crate::broker::{Broker, ChannelSession, CloseReason, Identity};
use crate::client::Client;
use crate::config::{ClientSettings, Settings};
use crate::transport::message::{ServiceRequest, ServiceResponse, decode, encode};
use crate::utils::BrokerError;

/// Request path for producer-facing operations.
pub const RPC_PATH: &str = "/rpc";

/// How long a peer gets to complete the upgrade request.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// What the handshake resolved the connection to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Rpc,
    Channel(Identity),
}

/// Bind `addr` and serve until the listener fails.
pub async fn start_websocket_server(
    addr: String,
    broker: Arc<Broker>,
    settings: Settings,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket server listening on ws://{addr}");
    serve(listener, broker, settings).await
}

/// Accept connections from an already bound listener. Only channel
/// connections count against `max_connections`; a slot is taken once the
/// handshake headers resolve to a channel and held until the session ends.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Broker>,
    settings: Settings,
) -> std::io::Result<()> {
    let settings = Arc::new(settings);
    let slots = Arc::new(Semaphore::new(settings.server.max_connections));

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let broker = broker.clone();
        let settings = settings.clone();
        let slots = slots.clone();

        tokio::spawn(async move {
            let mut route = None;
            let mut slot = None;
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let resolved =
                    resolve_route(req, &settings.client, broker.settings().enable_device_support)
                        .map_err(|e| reject(StatusCode::BAD_REQUEST, &e.to_string()))?;
                if matches!(resolved, Route::Channel(_)) {
                    match slots.try_acquire_owned() {
                        Ok(permit) => slot = Some(permit),
                        Err(_) => {
                            return Err(reject(
                                StatusCode::SERVICE_UNAVAILABLE,
                                "too many connections",
                            ));
                        }
                    }
                }
                route = Some(resolved);
                Ok(resp)
            };

            let ws_stream =
                match tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_hdr_async(stream, callback))
                    .await
                {
                    Ok(Ok(ws)) => ws,
                    Ok(Err(e)) => {
                        debug!(%peer, "WebSocket handshake rejected: {e}");
                        return;
                    }
                    Err(_) => {
                        debug!(%peer, "WebSocket handshake timed out");
                        return;
                    }
                };

            match route {
                Some(Route::Rpc) => serve_rpc(ws_stream, broker).await,
                Some(Route::Channel(identity)) => serve_channel(ws_stream, broker, identity).await,
                None => error!(%peer, "handshake accepted without a route"),
            }
            drop(slot);
        });
    }
}

/// Decide where a handshake request goes. Channel connections must name
/// their client, and their device when device support is on.
pub fn resolve_route(
    req: &Request,
    client: &ClientSettings,
    device_support: bool,
) -> Result<Route, BrokerError> {
    if req.uri().path() == RPC_PATH {
        return Ok(Route::Rpc);
    }
    identity_from_headers(req.headers(), client, device_support).map(Route::Channel)
}

pub fn identity_from_headers(
    headers: &HeaderMap,
    client: &ClientSettings,
    device_support: bool,
) -> Result<Identity, BrokerError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let client_id = header(&client.client_header).ok_or_else(|| {
        BrokerError::MalformedRequest(format!("missing {} header", client.client_header))
    })?;

    let device_id = header(&client.device_header);
    if device_support && device_id.is_none() {
        return Err(BrokerError::MalformedRequest(format!(
            "missing {} header",
            client.device_header
        )));
    }

    let attributes: BTreeMap<String, String> = client
        .device_attribute_headers
        .iter()
        .filter_map(|name| header(name).map(|v| (name.clone(), v.to_string())))
        .collect();

    Ok(Identity {
        client_id: client_id.to_string(),
        device_id: device_id.map(str::to_string),
        attributes,
    })
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_string()));
    *resp.status_mut() = status;
    resp
}

async fn serve_channel(ws_stream: WebSocketStream<TcpStream>, broker: Arc<Broker>, identity: Identity) {
    let (ws_sender, ws_receiver) = ws_stream.split();
    let (client, rx) = broker.new_client();
    let session = ChannelSession::new(broker, client.clone());

    let writer = tokio::spawn(write_loop(ws_sender, rx, client.clone()));

    let connect_ack = session.connect(identity);
    let connected = matches!(&connect_ack, ChannelResponse::ConnectAck(ack) if ack.status.success);
    let _ = client.reply(connect_ack).await;

    let reason = if connected {
        read_loop(ws_receiver, &session, &client).await
    } else {
        CloseReason::Explicit
    };

    session.close(reason);
    if let Err(e) = writer.await {
        warn!(session_id = %session.id(), "writer task failed: {e}");
    }
}

async fn read_loop(mut ws_receiver: WsSource, session: &ChannelSession, client: &Client) -> CloseReason {
    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = client.closed() => return CloseReason::Explicit,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => match decode::<ChannelRequest>(&text) {
                Ok(req) => {
                    if let Some(resp) = session.handle(req).await {
                        if client.reply(resp).await.is_err() {
                            return CloseReason::Explicit;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        session_id = %session.id(),
                        "invalid channel message: {e} | {}",
                        text.chars().take(100).collect::<String>()
                    );
                }
            },
            Some(Ok(WsMessage::Binary(_))) => {
                warn!(session_id = %session.id(), "binary frame on channel");
                return CloseReason::ProtocolViolation;
            }
            Some(Ok(WsMessage::Close(_))) | None => return CloseReason::PeerDisconnected,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(session_id = %session.id(), "read failed: {e}");
                return CloseReason::PeerDisconnected;
            }
        }
    }
}

async fn write_loop(mut ws_sender: WsSink, mut rx: Receiver<ChannelResponse>, client: Client) {
    loop {
        let msg = tokio::select! {
            msg = rx.recv() => msg,
            _ = client.closed() => break,
        };
        let Some(msg) = msg else { break };
        if let Err(e) = send(&mut ws_sender, &msg).await {
            debug!(session_id = %client.id, "send failed: {e}");
            client.close();
            return;
        }
    }

    // Flush what was queued before the close, then say goodbye
    while let Ok(msg) = rx.try_recv() {
        if send(&mut ws_sender, &msg).await.is_err() {
            return;
        }
    }
    let _ = ws_sender.close().await;
    debug!(session_id = %client.id, "send loop closed");
}

async fn send(ws_sender: &mut WsSink, msg: &ChannelResponse) -> Result<(), tungstenite::Error> {
    let frame = match encode(msg) {
        Ok(frame) => frame,
        Err(e) => {
            error!("failed to encode channel response: {e}");
            return Ok(());
        }
    };
    ws_sender.send(frame).await
}

async fn serve_rpc(ws_stream: WebSocketStream<TcpStream>, broker: Arc<Broker>) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("rpc read failed: {e}");
                break;
            }
        };

        let resp = match decode::<ServiceRequest>(&text) {
            Ok(req) => handle_service_request(&broker, req).await,
            Err(e) => ServiceResponse::Error { status: e.into() },
        };

        let frame = match encode(&resp) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to encode service response: {e}");
                continue;
            }
        };
        if let Err(e) = ws_sender.send(frame).await {
            debug!("rpc send failed: {e}");
            break;
        }
    }
}

/// Run one producer request against the broker.
pub async fn handle_service_request(broker: &Broker, req: ServiceRequest) -> ServiceResponse {
    match req {
        ServiceRequest::GetClientActiveDevices(req) => {
            ServiceResponse::GetClientActiveDevices(broker.get_client_active_devices(&req))
        }
        ServiceRequest::SendEventToTopic(req) => {
            ServiceResponse::SendEventToTopic(broker.send_event_to_topic(req).await)
        }
        ServiceRequest::SendEventToTopics(req) => {
            ServiceResponse::SendEventToTopics(broker.send_event_to_topics(req).await)
        }
        ServiceRequest::SendEventToClientChannel(req) => {
            ServiceResponse::SendEventToClientChannel(broker.send_event_to_client_channel(req).await)
        }
        ServiceRequest::SendEventToClientDeviceChannel(req) => {
            ServiceResponse::SendEventToClientDeviceChannel(
                broker.send_event_to_client_device_channel(req).await,
            )
        }
        ServiceRequest::GetMetrics => ServiceResponse::Metrics(broker.metrics()),
    }
}
