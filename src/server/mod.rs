//! Server core
//!
//! Accepts TCP connections and serves the session, matchmaking, and game
//! machinery. One task per connection; the shared state lives behind the
//! session manager.
mod connection;
mod registry;
mod session;

use anyhow::Result;
use async_std::net::TcpListener;
use async_std::task;
use connection::handle_connection;
use log::{info, warn};
use session::SessionManager;
use std::net::SocketAddrV4;

pub async fn start_server(addrs: SocketAddrV4) -> Result<()> {
    let manager = SessionManager::new();
    let listener = TcpListener::bind(addrs).await?;
    info!("listening on {}", listener.local_addr()?);
    while let Ok((stream, socket)) = listener.accept().await {
        let manager = manager.clone();
        task::spawn(async move {
            if let Err(e) = handle_connection(stream, socket, manager).await {
                warn!("connection to {} unexpectedly interrupted: {}", socket, e);
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod test_server {
    use super::*;
    use crate::game::{Board, Color};
    use crate::protocol::{Push, Reply, Request, StateFrame, Status};
    use async_std::net::TcpStream;
    use futures::executor::block_on;
    use futures::{AsyncReadExt, AsyncWriteExt};
    use std::net::{Ipv4Addr, Shutdown};
    use std::time::Duration;

    fn spawn_server(port: u16) {
        task::spawn(async move {
            let _ = start_server(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port)).await;
        });
    }

    async fn connect(port: u16) -> TcpStream {
        for _ in 0..100 {
            if let Ok(tcp) =
                TcpStream::connect(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port)).await
            {
                return tcp;
            }
            task::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not come up on port {}", port)
    }

    async fn read_n(tcp: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        tcp.read_exact(&mut buf).await.unwrap();
        buf
    }

    async fn hello(tcp: &mut TcpStream, user_id: u32) {
        tcp.write_all(
            &Request::Hello {
                max_version: 0,
                user_id,
            }
            .encode(),
        )
        .await
        .unwrap();
        assert_eq!(
            read_n(tcp, 4).await,
            Reply::HelloOk { version: 0 }.encode()
        );
    }

    async fn join(tcp: &mut TcpStream, game_id: u32) -> Vec<u8> {
        tcp.write_all(&Request::Join { game_id }.encode())
            .await
            .unwrap();
        read_n(tcp, 23).await
    }

    fn state(color: Color, can_move: bool, turn: u8, board: Board) -> StateFrame {
        StateFrame {
            color,
            can_move,
            turn,
            board,
        }
    }

    #[test]
    fn test_hello_handshake() {
        spawn_server(18801);
        block_on(async {
            let mut tcp = connect(18801).await;
            tcp.write_all(&[0x00, 0x00, 0x00, 0xAA, 0xBB, 0xCC, 0xDD])
                .await
                .unwrap();
            assert_eq!(read_n(&mut tcp, 4).await, [0x00, 0x00, 0x00, 0x00]);
        });
    }

    #[test]
    fn test_pre_session_gate() {
        spawn_server(18802);
        block_on(async {
            let mut tcp = connect(18802).await;
            // MOVE before HELLO
            tcp.write_all(&[0x02, 0x00]).await.unwrap();
            assert_eq!(read_n(&mut tcp, 2).await, [0x03, 0x02]);
            // JOIN before HELLO
            tcp.write_all(&Request::Join { game_id: 0 }.encode())
                .await
                .unwrap();
            assert_eq!(read_n(&mut tcp, 2).await, [0x03, 0x01]);
        });
    }

    #[test]
    fn test_duplicate_hello_reports_user() {
        spawn_server(18803);
        block_on(async {
            let mut tcp = connect(18803).await;
            hello(&mut tcp, 0xAABBCCDD).await;
            tcp.write_all(
                &Request::Hello {
                    max_version: 0,
                    user_id: 7,
                }
                .encode(),
            )
            .await
            .unwrap();
            assert_eq!(
                read_n(&mut tcp, 6).await,
                Reply::HelloInvalid {
                    user_id: 0xAABBCCDD
                }
                .encode()
            );
        });
    }

    #[test]
    fn test_unknown_action_echoed() {
        spawn_server(18804);
        block_on(async {
            let mut tcp = connect(18804).await;
            tcp.write_all(&[0x07]).await.unwrap();
            assert_eq!(read_n(&mut tcp, 2).await, [0x04, 0x07]);
            // the connection stays usable
            hello(&mut tcp, 1).await;
        });
    }

    #[test]
    fn test_move_before_join_invalid() {
        spawn_server(18805);
        block_on(async {
            let mut tcp = connect(18805).await;
            hello(&mut tcp, 1).await;
            tcp.write_all(&Request::Move { x: 3, y: 2 }.encode())
                .await
                .unwrap();
            assert_eq!(read_n(&mut tcp, 2).await, [0x03, 0x02]);
        });
    }

    #[test]
    fn test_matchmaking_and_first_moves() {
        spawn_server(18806);
        block_on(async {
            let mut host = connect(18806).await;
            hello(&mut host, 1).await;
            assert_eq!(
                join(&mut host, 0).await,
                Reply::JoinOk {
                    game_id: 2,
                    state: state(Color::White, false, 1, Board::opening()),
                }
                .encode()
            );

            let mut guest = connect(18806).await;
            hello(&mut guest, 2).await;
            assert_eq!(
                join(&mut guest, 0).await,
                Reply::JoinOk {
                    game_id: 2,
                    state: state(Color::Black, true, 1, Board::opening()),
                }
                .encode()
            );
            // the host learns the match is on
            assert_eq!(read_n(&mut host, 2).await, Push::Connect.encode());

            // black opens at D3
            guest
                .write_all(&Request::Move { x: 3, y: 2 }.encode())
                .await
                .unwrap();
            let after = Board::opening().apply(Color::Black, 3, 2).unwrap();
            assert_eq!(
                read_n(&mut guest, 19).await,
                Reply::Move {
                    status: Status::Ok,
                    state: state(Color::Black, false, 2, after),
                }
                .encode()
            );
            assert_eq!(
                read_n(&mut host, 19).await,
                Push::GameState(state(Color::White, true, 2, after)).encode()
            );

            // moving again out of turn: rejected with the same board
            guest
                .write_all(&Request::Move { x: 2, y: 2 }.encode())
                .await
                .unwrap();
            assert_eq!(
                read_n(&mut guest, 19).await,
                Reply::Move {
                    status: Status::Invalid,
                    state: state(Color::Black, false, 2, after),
                }
                .encode()
            );

            // white answering on an occupied square: illegal, no push
            host.write_all(&Request::Move { x: 3, y: 3 }.encode())
                .await
                .unwrap();
            assert_eq!(
                read_n(&mut host, 19).await,
                Reply::Move {
                    status: Status::Illegal,
                    state: state(Color::White, true, 2, after),
                }
                .encode()
            );
        });
    }

    #[test]
    fn test_join_errors() {
        spawn_server(18807);
        block_on(async {
            let mut host = connect(18807).await;
            hello(&mut host, 1).await;
            join(&mut host, 0).await;

            let mut guest = connect(18807).await;
            hello(&mut guest, 2).await;
            join(&mut guest, 2).await;
            read_n(&mut host, 2).await;

            // an outsider cannot enter the ready game
            let mut other = connect(18807).await;
            hello(&mut other, 3).await;
            other
                .write_all(&Request::Join { game_id: 2 }.encode())
                .await
                .unwrap();
            assert_eq!(read_n(&mut other, 2).await, [0x05, 0x01]);
            // and a made-up id does not exist
            other
                .write_all(&Request::Join { game_id: 444 }.encode())
                .await
                .unwrap();
            assert_eq!(read_n(&mut other, 2).await, [0x03, 0x01]);
        });
    }

    #[test]
    fn test_disconnect_and_rejoin() {
        spawn_server(18808);
        block_on(async {
            let mut host = connect(18808).await;
            hello(&mut host, 1).await;
            join(&mut host, 0).await;

            let mut guest = connect(18808).await;
            hello(&mut guest, 2).await;
            join(&mut guest, 0).await;
            assert_eq!(read_n(&mut host, 2).await, Push::Connect.encode());

            guest.shutdown(Shutdown::Both).unwrap();
            drop(guest);
            assert_eq!(read_n(&mut host, 2).await, Push::Dconnect.encode());

            // same user comes back to the same game, board unchanged
            let mut guest = connect(18808).await;
            hello(&mut guest, 2).await;
            assert_eq!(
                join(&mut guest, 2).await,
                Reply::JoinOk {
                    game_id: 2,
                    state: state(Color::Black, true, 1, Board::opening()),
                }
                .encode()
            );
            assert_eq!(read_n(&mut host, 2).await, Push::Connect.encode());
        });
    }
}
