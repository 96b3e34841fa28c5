//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake,
//! message parsing, and bidirectional communication with the ChatServer.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::relay::{OutgoingMessage, Relay, RelayOutcome};
use crate::server::ServerHandle;
use crate::types::ConnectionId;

/// Handle a new TCP connection
///
/// Performs WebSocket handshake, sets up bidirectional communication,
/// and manages the connection lifecycle.
pub async fn handle_connection(
    stream: TcpStream,
    server: ServerHandle,
    relay: Relay,
    outbound_buffer: usize,
) -> Result<(), AppError> {
    let peer_addr = stream.peer_addr().ok();

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let connection_id = ConnectionId::new();
    info!("Connection {} opened from {:?}", connection_id, peer_addr);

    // Channel for server -> client messages. Only the ChatServer holds a
    // strong sender, so the write task ends once the server drops us.
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(outbound_buffer);
    let reply_tx = msg_tx.downgrade();

    if let Err(e) = server
        .connect(connection_id, peer_addr.map(|a| a.ip()), msg_tx)
        .await
    {
        error!("Failed to register connection {} - server closed", connection_id);
        return Err(e);
    }

    let connected_msg = ServerMessage::Connected {
        connection_id: connection_id.to_string(),
    };
    let json = serde_json::to_string(&connected_msg)?;
    ws_sender.send(Message::Text(json.into())).await?;

    // Read task (WebSocket -> ServerCommand)
    //
    // Frames are handled strictly one at a time, including the image upload
    // inside a relay, so a sender's messages reach the partner in order.
    let server_read = server.clone();
    let read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        let result = handle_client_message(
                            connection_id,
                            client_msg,
                            &server_read,
                            &relay,
                            &reply_tx,
                        )
                        .await;
                        if result.is_err() {
                            debug!("Server closed, ending read task for {}", connection_id);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Invalid JSON from {}: {}", connection_id, e);
                        reply(&reply_tx, ServerMessage::invalid(&e)).await;
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Connection {} sent close frame", connection_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", connection_id);
                }
                Ok(Message::Pong(_)) => {
                    debug!("Pong from {}", connection_id);
                }
                Ok(_) => {
                    // Binary or other message types - ignore
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", connection_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", connection_id);
    });

    // Write task (ServerMessage -> WebSocket)
    let write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    // Continue - don't break on serialization errors
                }
            }
        }
        debug!("Write task ended for connection");

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete. A read task still finishing a relay
    // keeps running detached until that relay completes.
    tokio::select! {
        _ = read_task => {
            debug!("Read task completed for {}", connection_id);
        }
        _ = write_task => {
            debug!("Write task completed for {}", connection_id);
        }
    }

    let _ = server.disconnect(connection_id).await;

    info!("Connection {} closed", connection_id);

    Ok(())
}

/// Apply one parsed client message
///
/// Only fails when the ChatServer is gone.
async fn handle_client_message(
    connection_id: ConnectionId,
    msg: ClientMessage,
    server: &ServerHandle,
    relay: &Relay,
    reply_tx: &mpsc::WeakSender<ServerMessage>,
) -> Result<(), AppError> {
    match msg {
        ClientMessage::FindPartner => server.find_partner(connection_id).await,
        ClientMessage::EndChat => server.end_chat(connection_id).await,
        ClientMessage::Message {
            text,
            image,
            expires_at,
        } => {
            let message = OutgoingMessage {
                text,
                image,
                expires_at,
            };
            if message.is_empty() {
                reply(reply_tx, ServerMessage::empty()).await;
                return Ok(());
            }

            match relay.relay(connection_id, message).await? {
                RelayOutcome::Delivered { .. } => debug!("Relayed message from {}", connection_id),
                outcome => debug!("Message from {} not delivered: {:?}", connection_id, outcome),
            }
            Ok(())
        }
        ClientMessage::Status => {
            let status = server.status().await?;
            reply(
                reply_tx,
                ServerMessage::Status {
                    connection_count: status.connection_count,
                    waiting_count: status.waiting_count,
                    active_session_count: status.active_session_count,
                },
            )
            .await;
            Ok(())
        }
    }
}

/// Answer the client directly, unless the server already dropped it
async fn reply(reply_tx: &mpsc::WeakSender<ServerMessage>, msg: ServerMessage) {
    if let Some(tx) = reply_tx.upgrade() {
        let _ = tx.send(msg).await;
    }
}
