//! CLI for Pushline
//!
//! Subcommands:
//! - `server`: run the WebSocket broker
//! - `subscribe`: open a channel, subscribe to a topic and print what arrives
//! - `publish`: send one JSON event to a topic through the service path

use std::sync::Arc;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use pushline::broker::Broker;
use pushline::broker::message::{
    ChannelEventAck, ChannelRequest, ChannelResponse, Event, TopicSubscriptionRequest,
};
use pushline::broker::request::SendEventToTopicRequest;
use pushline::broker::status::ResponseStatus;
use pushline::config::{Settings, load_config};
use pushline::transport::message::{ServiceRequest, ServiceResponse, decode, encode};
use pushline::transport::websocket::{RPC_PATH, start_websocket_server};
use pushline::utils::logging;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pushline")]
enum Command {
    /// Start the WebSocket broker
    Server,
    /// Open a channel and print events pushed on a topic
    Subscribe {
        /// Broker URL (default: ws://127.0.0.1:8080)
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long)]
        client_id: String,
        #[arg(long, default_value = "cli")]
        device_id: String,
        #[arg(long)]
        topic: String,
    },
    /// Publish one JSON event to a topic
    Publish {
        /// Broker URL (default: ws://127.0.0.1:8080)
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "message")]
        name: String,
        /// Event payload; must be valid JSON
        #[arg(long)]
        data: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return;
        }
    };
    logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Server => run_server(settings).await,
        Command::Subscribe {
            url,
            client_id,
            device_id,
            topic,
        } => run_subscriber(&settings, &url, &client_id, &device_id, &topic).await,
        Command::Publish {
            url,
            topic,
            name,
            data,
        } => run_publisher(&url, &topic, &name, &data).await,
    };

    if let Err(e) = result {
        error!("{e}");
    }
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let broker = Arc::new(Broker::new(settings.broker.clone()));

    tokio::select! {
        res = start_websocket_server(addr, broker, settings) => {
            res?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_subscriber(
    settings: &Settings,
    url: &str,
    client_id: &str,
    device_id: &str,
    topic: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut req = url.into_client_request()?;
    req.headers_mut().insert(
        HeaderName::from_bytes(settings.client.client_header.as_bytes())?,
        HeaderValue::from_str(client_id)?,
    );
    req.headers_mut().insert(
        HeaderName::from_bytes(settings.client.device_header.as_bytes())?,
        HeaderValue::from_str(device_id)?,
    );

    let (mut ws_stream, _response) = connect_async(req).await?;

    let subscribe = ChannelRequest::TopicSubscriptionRequest(TopicSubscriptionRequest {
        topic: topic.to_string(),
    });
    ws_stream.send(encode(&subscribe)?).await?;

    while let Some(frame) = ws_stream.next().await {
        let WsMessage::Text(text) = frame? else {
            continue;
        };
        match decode::<ChannelResponse>(&text)? {
            ChannelResponse::ChannelEvent(event) => {
                let payload = event
                    .event
                    .as_deref()
                    .map(|e| String::from_utf8_lossy(e.data()).into_owned())
                    .unwrap_or_default();
                println!("[{}] {}", event.topic, payload);

                let ack = ChannelRequest::ChannelEventAck(ChannelEventAck {
                    unique_id: event.unique_id,
                    status: ResponseStatus::ok(),
                });
                ws_stream.send(encode(&ack)?).await?;
            }
            other => println!("{other:?}"),
        }
    }

    Ok(())
}

async fn run_publisher(
    url: &str,
    topic: &str,
    name: &str,
    data: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload: serde_json::Value = serde_json::from_str(data)?;
    let event = Event::json(name, &payload)?;

    let rpc_url = format!("{}{RPC_PATH}", url.trim_end_matches('/'));
    let (mut ws_stream, _response) = connect_async(rpc_url).await?;

    let req = ServiceRequest::SendEventToTopic(SendEventToTopicRequest {
        topic: topic.to_string(),
        event: Some(Arc::new(event)),
    });
    ws_stream.send(encode(&req)?).await?;

    if let Some(frame) = ws_stream.next().await {
        if let WsMessage::Text(text) = frame? {
            let resp: ServiceResponse = decode(&text)?;
            println!("{resp:?}");
        }
    }

    Ok(())
}
