//! Websocket subscribers.
//!
//! Each upgraded connection is split: the write half becomes a [`Subscriber`]
//! owned by the registry, the read half stays in the connection task and only
//! watches for the peer going away. Inbound messages are ignored.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::sync::Mutex;

use crate::core::subscribers::close_with_timeout;
use crate::core::Subscriber;
use crate::error::DeliveryError;

use super::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

/// Write half of one websocket connection.
pub struct WsSubscriber {
    peer: SocketAddr,
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsSubscriber {
    pub fn new(peer: SocketAddr, sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            peer,
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload.to_owned()))
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        // Peer may already be gone; either way the sink is finished.
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let (sink, mut stream) = socket.split();
    let subscriber = Arc::new(WsSubscriber::new(peer, sink));
    let id = state
        .monitor
        .on_subscriber_connected(Arc::clone(&subscriber) as Arc<dyn Subscriber>)
        .await;

    let mut shutdown = state.shutdown.clone();
    if !*shutdown.borrow_and_update() {
        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    state.monitor.on_subscriber_disconnected(id);
    close_with_timeout(id, subscriber.as_ref(), state.monitor.delivery_timeout()).await;
    tracing::debug!(subscriber = %id, %peer, "Websocket connection finished");
}
