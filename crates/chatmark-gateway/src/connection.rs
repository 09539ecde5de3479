use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, trace, warn};

use crate::dispatcher::Dispatcher;

/// Handle a single UI WebSocket: relay every store event as JSON until the
/// client goes away. The socket is one-directional: mutations go
/// through the RPC surface, never the gateway.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = dispatcher.subscribe();

    info!("UI connected to gateway");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let json = serde_json::to_string(&event).unwrap();
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Slow consumer: it missed events and should re-fetch
                        warn!("UI event stream lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => trace!("ignoring inbound gateway message"),
                    Some(Err(e)) => {
                        warn!("gateway socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    info!("UI disconnected from gateway");
}
