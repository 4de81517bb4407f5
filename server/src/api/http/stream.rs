//! WebSocket transport for interactive converter sessions

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::events::{ClientMessage, StreamEvent};
use crate::domain::requests::RetocRequest;
use crate::error::Error;
use crate::service::stream::EVENT_CHANNEL_CAPACITY;
use crate::AppState;

const INPUT_CHANNEL_CAPACITY: usize = 32;

/// `GET /api/retoc/stream`
pub async fn retoc_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut source) = socket.split();

    // The first text frame is the request
    let parsed = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => break serde_json::from_str::<RetocRequest>(&text),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                debug!("Stream client left before sending a request");
                return;
            }
            Some(Ok(_)) => continue,
        }
    };

    let request = match parsed {
        Ok(request) => request,
        Err(e) => {
            let event = StreamEvent::error(Error::from(e).to_info());
            if let Ok(text) = serde_json::to_string(&event) {
                let _ = sink.send(Message::Text(text.into())).await;
            }
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let (event_tx, mut event_rx) = mpsc::channel::<StreamEvent>(EVENT_CHANNEL_CAPACITY);
    let (input_tx, input_rx) = mpsc::channel::<ClientMessage>(INPUT_CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode {} event: {}", event.kind(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                debug!("Stream client gone; dropping remaining events");
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = source.next().await {
            let message = match frame {
                Message::Text(text) => ClientMessage::from_text(&text),
                Message::Binary(data) => ClientMessage::Input(data.to_vec()),
                Message::Close(_) => break,
                _ => continue,
            };
            if input_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    state.streams.run(request, input_rx, event_tx).await;

    reader.abort();
    if let Err(e) = writer.await {
        debug!("Stream writer ended abnormally: {}", e);
    }
}
