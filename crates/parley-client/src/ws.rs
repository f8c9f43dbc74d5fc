//! WebSocket push channel.
//!
//! One connection carries every topic. Subscribe and unsubscribe frames are
//! written by a writer task; a reader task decodes server frames and fans them
//! out through the [`SubscriberRegistry`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::error::PushError;
use crate::push::{PushChannel, PushEvent, SubscriberRegistry, Subscription, Topic};
use crate::types::{ClientFrame, ServerFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push channel over a single WebSocket connection.
#[derive(Debug)]
pub struct WsPushChannel {
    registry: Arc<SubscriberRegistry>,
    connected: Arc<AtomicBool>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WsPushChannel {
    /// Connect to the push endpoint named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `PushError::Connection` if the handshake fails.
    pub async fn connect(config: &ClientConfig) -> Result<Self, PushError> {
        let mut request = config
            .push_url
            .as_str()
            .into_client_request()
            .map_err(|e| PushError::Connection(e.to_string()))?;

        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| PushError::Connection(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| PushError::Connection(e.to_string()))?;

        tracing::debug!(url = %config.push_url, "Push channel connected");

        let (write, read) = ws_stream.split();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SubscriberRegistry::with_control(control_tx));
        let connected = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(ws_writer(write, control_rx, Arc::clone(&connected)));
        let reader = tokio::spawn(ws_reader(
            read,
            Arc::clone(&registry),
            Arc::clone(&connected),
        ));

        Ok(Self {
            registry,
            connected,
            writer,
            reader,
        })
    }

    /// Returns true while the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Drop for WsPushChannel {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
        self.registry.close();
    }
}

#[async_trait]
impl PushChannel for WsPushChannel {
    async fn subscribe(&self, topic: Topic) -> Result<Subscription, PushError> {
        if !self.is_connected() {
            return Err(PushError::Closed);
        }
        self.registry.register(topic)
    }
}

/// Task that writes subscribe and unsubscribe frames.
async fn ws_writer(
    mut write: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<ClientFrame>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = rx.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode push frame");
                continue;
            }
        };
        if let Err(e) = write.send(WsMessage::Text(text)).await {
            tracing::warn!(error = %e, "Push channel write failed");
            break;
        }
    }
    connected.store(false, Ordering::Release);
}

/// Task that reads server frames and fans them out to subscribers.
async fn ws_reader(
    mut read: SplitStream<WsStream>,
    registry: Arc<SubscriberRegistry>,
    connected: Arc<AtomicBool>,
) {
    while let Some(result) = read.next().await {
        match result {
            Ok(WsMessage::Text(text)) => match decode_frame(&text) {
                Ok((topic, event)) => {
                    let reached = registry.dispatch(&topic, &event);
                    if reached == 0 {
                        tracing::debug!(topic = %topic, "Push event for topic without subscribers");
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, text = %text, "Failed to parse push frame");
                }
            },
            Ok(WsMessage::Close(_)) => break,
            // Ignore control frames and binary messages
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) | WsMessage::Binary(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Push channel read failed");
                break;
            }
        }
    }

    tracing::debug!("Push channel disconnected");
    connected.store(false, Ordering::Release);
    registry.close();
}

fn decode_frame(text: &str) -> Result<(Topic, PushEvent), PushError> {
    let frame: ServerFrame = serde_json::from_str(text)?;
    Ok(match frame {
        ServerFrame::Message { topic, message } => (topic.parse()?, PushEvent::Message(message)),
        ServerFrame::Activity {
            topic,
            conversation_id,
        } => (topic.parse()?, PushEvent::Activity(conversation_id)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ConversationId, SenderRole};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn decode_message_frame() {
        let text = json!({
            "type": "message",
            "topic": "conversations/42",
            "message": {
                "id": 9001,
                "conversationId": 42,
                "senderRole": "AI",
                "content": "Soup.",
                "createdAt": "2024-01-01T12:00:00Z"
            }
        })
        .to_string();

        let (topic, event) = decode_frame(&text).unwrap();
        assert_eq!(topic, Topic::Conversation(ConversationId::new(42)));
        assert!(matches!(event, PushEvent::Message(m) if m.sender_role == SenderRole::Ai));
    }

    #[test]
    fn decode_rejects_unknown_topic() {
        let text = json!({"type": "activity", "topic": "rooms/1", "conversationId": 1}).to_string();
        assert!(decode_frame(&text).is_err());
    }

    #[tokio::test]
    async fn subscribe_and_receive_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // Expect the subscribe frame, then push one activity signal.
            let frame = ws.next().await.unwrap().unwrap();
            let frame: ClientFrame = serde_json::from_str(frame.to_text().unwrap()).unwrap();
            assert_eq!(
                frame,
                ClientFrame::Subscribe {
                    topic: "agents/queue".to_string()
                }
            );

            let push = json!({"type": "activity", "topic": "agents/queue", "conversationId": 42});
            ws.send(WsMessage::Text(push.to_string())).await.unwrap();

            // Dropping the subscription must produce an unsubscribe frame.
            let frame = ws.next().await.unwrap().unwrap();
            let frame: ClientFrame = serde_json::from_str(frame.to_text().unwrap()).unwrap();
            assert_eq!(
                frame,
                ClientFrame::Unsubscribe {
                    topic: "agents/queue".to_string()
                }
            );
        });

        let mut config = ClientConfig::new(format!("http://{addr}"));
        config.push_url = format!("ws://{addr}/ws");
        let channel = WsPushChannel::connect(&config).await.unwrap();
        assert!(channel.is_connected());

        let mut sub = channel.subscribe(Topic::AgentQueue).await.unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event, PushEvent::Activity(ConversationId::new(42)));

        drop(sub);
        server.await.unwrap();
    }
}
