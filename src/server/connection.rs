//! Per-connection read and write loops.
//!
//! Each accepted socket gets one handler task running the sequential read
//! loop, plus a writer task draining the connection's outbound channel so
//! that an action status and an asynchronous push can never interleave
//! mid-frame. Requests are handled strictly in arrival order, which makes
//! responses FIFO per connection.

use crate::protocol::{
    Reply, Request, ServerFrame, Status, ACTION_JOIN, ACTION_MOVE, PROTOCOL_MAX, PROTOCOL_MIN,
};
use crate::server::session::{Session, SessionManager};
use anyhow::Result;
use async_std::channel::{unbounded, Receiver};
use async_std::io::BufReader;
use async_std::net::TcpStream;
use async_std::task;
use futures::{AsyncReadExt, AsyncWriteExt, StreamExt};
use log::{info, trace, warn};
use std::net::{Shutdown, SocketAddr};

pub(crate) async fn handle_connection(
    tcp: TcpStream,
    socket: SocketAddr,
    manager: SessionManager,
) -> Result<()> {
    let (frame_s, frame_r) = unbounded();
    let conn = manager.register(frame_s.clone()).await;
    info!("connection {} accepted from {}", conn, socket);
    run_writer(tcp.clone(), frame_r);
    let mut reader = BufReader::new(tcp);
    let mut session: Option<Session> = None;
    loop {
        // one octet of action preamble decides the body size
        let action = match read_octet(&mut reader).await {
            None => break,
            Some(action) => action,
        };
        let reply = match Request::body_len(action) {
            None => {
                warn!("connection {} sent unsupported action {}", conn, action);
                Some(Reply::Bare {
                    action,
                    status: Status::Unsupported,
                })
            }
            Some(len) => {
                let body = match read_exactly(&mut reader, len).await {
                    // the stream died inside a frame; nothing to answer
                    None => break,
                    Some(body) => body,
                };
                match Request::decode_body(action, &body) {
                    Err(_) => Some(Reply::Bare {
                        action,
                        status: Status::BadFormat,
                    }),
                    Ok(request) => {
                        trace!("connection {} request {:?}", conn, request);
                        dispatch(conn, &manager, &mut session, request).await
                    }
                }
            }
        };
        if let Some(reply) = reply {
            if frame_s.try_send(ServerFrame::Reply(reply)).is_err() {
                break;
            }
        }
    }
    manager
        .unregister(conn, session.as_ref().and_then(|s| s.game))
        .await;
    info!("connection {} ({}) closed", conn, socket);
    Ok(())
}

/// `None` means the reply was already enqueued through the manager
async fn dispatch(
    conn: u64,
    manager: &SessionManager,
    session: &mut Option<Session>,
    request: Request,
) -> Option<Reply> {
    match request {
        Request::Hello {
            max_version,
            user_id,
        } => Some(hello(conn, session, max_version, user_id)),
        Request::Join { game_id } => match session.as_mut() {
            // only HELLO may precede a session
            None => Some(Reply::Bare {
                action: ACTION_JOIN,
                status: Status::Invalid,
            }),
            Some(s) => {
                s.game = manager.join(conn, s.user_id, s.game, game_id).await;
                None
            }
        },
        Request::Move { x, y } => match session.as_ref() {
            None => Some(Reply::Bare {
                action: ACTION_MOVE,
                status: Status::Invalid,
            }),
            Some(s) => match s.game {
                // a game action needs a JOIN first
                None => Some(Reply::Bare {
                    action: ACTION_MOVE,
                    status: Status::Invalid,
                }),
                Some(game_id) => {
                    manager.play(conn, s.user_id, game_id, x, y).await;
                    None
                }
            },
        },
    }
}

/// Version negotiation. HELLO's frame layout is frozen across protocol
/// revisions, so this exchange works whatever the peer speaks.
fn hello(conn: u64, session: &mut Option<Session>, max_version: u16, user_id: u32) -> Reply {
    match session {
        Some(existing) => {
            warn!("connection {} sent duplicate HELLO", conn);
            Reply::HelloInvalid {
                user_id: existing.user_id,
            }
        }
        None => {
            if max_version < PROTOCOL_MIN {
                return Reply::HelloUnsupported {
                    min_version: PROTOCOL_MIN,
                };
            }
            let version = PROTOCOL_MAX.min(max_version);
            info!(
                "connection {} opened session for user {} (protocol {})",
                conn, user_id, version
            );
            *session = Some(Session {
                user_id,
                protocol: version,
                game: None,
            });
            Reply::HelloOk { version }
        }
    }
}

/// Drain the outbound channel onto the socket.
///
/// On write error both sides shut down, which also ends the read loop.
/// Dropping all senders closes the connection gracefully.
fn run_writer(tcp: TcpStream, mut frames: Receiver<ServerFrame>) {
    let mut tcp = tcp;
    task::spawn(async move {
        while let Some(frame) = frames.next().await {
            if tcp.write_all(&frame.encode()).await.is_err() {
                let _ = tcp.shutdown(Shutdown::Both);
                return;
            }
        }
        let _ = tcp.shutdown(Shutdown::Both);
    });
}

async fn read_octet(reader: &mut BufReader<TcpStream>) -> Option<u8> {
    let mut octet = [0u8; 1];
    match reader.read_exact(&mut octet).await {
        Ok(_) => Some(octet[0]),
        Err(_) => None,
    }
}

async fn read_exactly(reader: &mut BufReader<TcpStream>, n: usize) -> Option<Vec<u8>> {
    let mut body = vec![0u8; n];
    match reader.read_exact(&mut body).await {
        Ok(_) => Some(body),
        Err(_) => None,
    }
}
