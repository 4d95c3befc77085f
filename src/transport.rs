//! TCP transport: newline-delimited JSON over a plain socket (§4.5, §6).
//!
//! Each accepted connection becomes one task pair: a reader loop that decodes inbound frames and
//! dispatches them into the hub, and a writer loop that drains the session's outbound queue onto
//! the socket. The two halves only ever talk to each other through the session's `mpsc` channel
//! and the hub's public API — mirroring this codebase's ancestry, where a connection's inbound and
//! outbound directions were always separate tasks synchronized through channels, never a single
//! task juggling both.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{FrameError, HubError, SessionError};
use crate::frame::{decode_inbound, encode_outbound, InboundFrame, OutboundFrame};
use crate::hub::Hub;

/// Binds `config.listen_addr` and accepts connections until the process is killed. Each connection
/// is handled on its own task; a failure on one connection never affects another.
pub async fn serve(hub: Arc<Hub>, config: Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "listening");

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        let hub = hub.clone();
        let config = config.clone();
        tokio::spawn(async move {
            debug!(%peer_addr, "connection accepted");
            handle_connection(hub, socket, config).await;
            debug!(%peer_addr, "connection closed");
        });
    }
}

/// Drives one connection end to end: registers a session, sends the `init` frame, then runs the
/// reader loop until EOF, error, or idle timeout, tearing the session down exactly once on exit.
#[instrument(skip(hub, socket, config))]
async fn handle_connection(hub: Arc<Hub>, socket: TcpStream, config: Config) {
    let (id, mut outbound_rx) = hub.register();
    let (read_half, mut write_half) = socket.into_split();

    let init = hub.init_frame(id);
    if send_frame(&mut write_half, &init).await.is_err() {
        hub.disconnect(id).await;
        return;
    }

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if send_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    let idle_timeout = config.ping_timeout();

    loop {
        match timeout(idle_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if line.trim().is_empty() {
                    continue;
                }
                dispatch_line(&hub, id, &line).await;
            }
            Ok(Ok(None)) => {
                debug!(participant = %id, "peer closed the connection");
                break;
            }
            Ok(Err(err)) => {
                let err = SessionError::ReadFailed(err);
                warn!(participant = %id, error = %err, "read error");
                break;
            }
            Err(_) => {
                warn!(participant = %id, "idle timeout exceeded, dropping connection");
                break;
            }
        }
    }

    writer_task.abort();
    hub.disconnect(id).await;
}

/// Decodes and dispatches one line. Protocol errors (`MissingType`/`UnknownType`/malformed JSON)
/// and hub state errors both become an `error` frame back to the sender; neither mutates hub
/// state (§7).
async fn dispatch_line(hub: &Arc<Hub>, id: crate::ids::ParticipantId, line: &str) {
    let frame = match decode_inbound(line) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(participant = %id, error = %err, "rejecting malformed frame");
            hub.reply(id, error_frame(&err));
            return;
        }
    };

    let result: Result<(), HubError> = match frame {
        InboundFrame::Join { username, room_id } => {
            match hub.join(id, username, room_id).await {
                Ok(outcome) => {
                    hub.reply(
                        id,
                        OutboundFrame::JoinSuccess {
                            room: outcome.room_id,
                            users: outcome.users,
                            message_count: outcome.message_count,
                        },
                    );
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
        InboundFrame::Chat { text, vector_clock: _, metadata } => {
            hub.chat(id, text, metadata).await.map(|_| ())
        }
        InboundFrame::Typing { is_typing } => hub.typing(id, is_typing).await,
        InboundFrame::RequestHistory => match hub.request_history(id).await {
            Ok(messages) => {
                let total = messages.len();
                hub.reply(id, OutboundFrame::History { messages, total });
                Ok(())
            }
            Err(err) => Err(err),
        },
        InboundFrame::GetUsers => match hub.get_users(id).await {
            Ok(users) => {
                hub.reply(
                    id,
                    OutboundFrame::UserList {
                        users,
                        timestamp: crate::room::now_ms(),
                    },
                );
                Ok(())
            }
            Err(err) => Err(err),
        },
        InboundFrame::Ping => {
            hub.reply(id, OutboundFrame::Pong);
            Ok(())
        }
    };

    if let Err(err) = result {
        warn!(participant = %id, error = %err, "rejecting frame");
        hub.reply(
            id,
            OutboundFrame::Error {
                message: err.to_string(),
                timestamp: crate::room::now_ms(),
            },
        );
    }
}

fn error_frame(err: &FrameError) -> OutboundFrame {
    OutboundFrame::Error {
        message: err.to_string(),
        timestamp: crate::room::now_ms(),
    }
}

async fn send_frame(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    frame: &OutboundFrame,
) -> Result<(), SessionError> {
    let encoded = match encode_outbound(frame) {
        Ok(encoded) => encoded,
        Err(err) => {
            warn!(error = %err, "failed to encode outbound frame, dropping it");
            return Ok(());
        }
    };
    write_half
        .write_all(encoded.as_bytes())
        .await
        .map_err(SessionError::WriteFailed)?;
    write_half
        .write_all(b"\n")
        .await
        .map_err(SessionError::WriteFailed)?;
    write_half.flush().await.map_err(SessionError::WriteFailed)
}
