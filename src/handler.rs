//! Connection handler
//!
//! Owns one accepted socket: admits it to the registry as a guest, then
//! pumps bytes both ways. A read task decodes frames into requests and
//! funnels them to the ChatServer actor; a write task drains the
//! connection's response channel back onto the socket.
//!
//! Failure scoping follows the transport error taxonomy: an undecodable
//! frame is logged and dropped (the connection lives on), while EOF or a
//! socket error tears down only this connection.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::frame::FrameCodec;
use crate::message::Request;
use crate::server::{response_channel, Command};
use crate::types::ConnId;
use tokio_util::codec::Framed;

/// Handle one accepted TCP connection until either side goes away.
pub async fn handle_connection(
    stream: TcpStream,
    conn: ConnId,
    cmd_tx: mpsc::Sender<Command>,
) -> Result<(), AppError> {
    let peer_addr = stream.peer_addr()?;
    debug!("connection {} from {}", conn, peer_addr);

    let framed = Framed::new(stream, FrameCodec);
    let (mut sink, mut frames) = framed.split();

    // Register with the ChatServer as a guest.
    let (msg_tx, mut msg_rx) = response_channel();
    if cmd_tx
        .send(Command::Connect {
            conn,
            addr: peer_addr,
            sender: msg_tx,
        })
        .await
        .is_err()
    {
        error!("failed to admit connection {} - server closed", conn);
        return Err(AppError::ChannelSend);
    }

    // Read task: socket frames -> Commands.
    let cmd_read = cmd_tx.clone();
    let read_task = tokio::spawn(async move {
        while let Some(item) = frames.next().await {
            match item {
                Ok(frame) => match Request::from_frame(&frame) {
                    Ok(request) => {
                        if cmd_read
                            .send(Command::Request { conn, request })
                            .await
                            .is_err()
                        {
                            debug!("server closed, ending read task for {}", conn);
                            break;
                        }
                    }
                    Err(err) => {
                        // One bad frame does not cost the peer its
                        // connection.
                        warn!("connection {}: dropping request: {}", conn, err);
                    }
                },
                Err(err) => {
                    error!("connection {}: read error: {}", conn, err);
                    break;
                }
            }
        }
        debug!("read task ended for {}", conn);
    });

    // Write task: queued Responses -> socket.
    let write_task = tokio::spawn(async move {
        while let Some(response) = msg_rx.recv().await {
            let frame = response.to_frame(conn.0);
            if sink.send(frame).await.is_err() {
                debug!("socket send failed, ending write task for {}", conn);
                break;
            }
        }
        // Registry entry gone (terminate or disconnect): flush done, shut
        // the write half so the peer observes EOF.
        let _ = sink.close().await;
        debug!("write task ended for {}", conn);
    });

    // Wait for either direction to finish.
    tokio::select! {
        _ = read_task => {
            debug!("read task completed for {}", conn);
        }
        _ = write_task => {
            debug!("write task completed for {}", conn);
        }
    }

    let _ = cmd_tx.send(Command::Disconnect { conn }).await;
    info!("connection {} closed", conn);

    Ok(())
}
