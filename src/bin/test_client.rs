//! Raw protocol driver for manual testing against a running server.
use anyhow::{Error, Result};
use async_std::io::{stdin, BufReader as StdinReader, Stdin};
use async_std::net::TcpStream;
use async_std::task;
use async_std::task::{block_on, JoinHandle};
use futures::io::BufReader;
use futures::{join, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, StreamExt};
use log::{error, LevelFilter};
use othello::protocol::{Push, Reply, Request, StateFrame, Status};
use othello::{Cell, Color};
use std::env;
use std::str::FromStr;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();
    if let Err(e) = block_on(run_client()) {
        error!("client stopped on error {}", e);
    }
}

async fn run_client() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        Err(Error::msg(
            "usage: ./test_client {server address}, example: ./test_client 127.0.0.1:9999",
        ))?
    }
    let tcp = TcpStream::connect(&args[1]).await?;
    println!("connected to {}", tcp.peer_addr()?);
    let handle1 = accept_input(stdin(), tcp.clone());
    let handle2 = print_server_frames(tcp);
    join!(handle1, handle2);
    Ok(())
}

fn accept_input(input: Stdin, mut tcp: TcpStream) -> JoinHandle<()> {
    task::spawn(async move {
        let reader = StdinReader::new(input);
        let mut lines = reader.lines();
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    if let Some(request) = string_to_request(&line) {
                        if tcp.write_all(&request.encode()).await.is_err() {
                            println!("server closed");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("read line error: {}", e);
                    break;
                }
            }
        }
    })
}

fn print_server_frames(tcp: TcpStream) -> JoinHandle<()> {
    task::spawn(async move {
        let mut reader = BufReader::new(tcp);
        // whether a game is joined decides the shape of MOVE statuses
        let mut in_game = false;
        loop {
            let mut frame = vec![0u8; 2];
            if reader.read_exact(&mut frame).await.is_err() {
                break;
            }
            let body_len = if frame[0] & 0x80 != 0 {
                let message_type = u16::from_be_bytes([frame[0], frame[1]]) & 0x7fff;
                Push::body_len(message_type)
            } else {
                match Status::from_octet(frame[0]) {
                    Ok(status) => Reply::body_len(frame[1], status, in_game),
                    Err(_) => {
                        error!("server sent unknown status {}", frame[0]);
                        break;
                    }
                }
            };
            let mut body = vec![0u8; body_len];
            if reader.read_exact(&mut body).await.is_err() {
                break;
            }
            frame.extend(body);
            if frame[0] & 0x80 != 0 {
                match Push::decode(&frame) {
                    Ok(push) => println!("{}", push_to_string(&push)),
                    Err(e) => {
                        error!("undecodable push: {}", e);
                        break;
                    }
                }
            } else {
                match Reply::decode(&frame) {
                    Ok(reply) => {
                        if matches!(reply, Reply::JoinOk { .. }) {
                            in_game = true;
                        }
                        println!("{}", reply_to_string(&reply));
                    }
                    Err(e) => {
                        error!("undecodable reply: {}", e);
                        break;
                    }
                }
            }
        }
        println!("connection closed");
    })
}

fn string_to_request(line: &str) -> Option<Request> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["hello", user] => match u32::from_str(user) {
            Ok(user_id) => Some(Request::Hello {
                max_version: 0,
                user_id,
            }),
            Err(_) => {
                print_help();
                None
            }
        },
        ["join", "match"] => Some(Request::Join { game_id: 0 }),
        ["join", "new"] => Some(Request::Join { game_id: 1 }),
        ["join", id] => match u32::from_str(id) {
            Ok(game_id) => Some(Request::Join { game_id }),
            Err(_) => {
                print_help();
                None
            }
        },
        ["move", x, y] => match (u8::from_str(x), u8::from_str(y)) {
            (Ok(x), Ok(y)) => Some(Request::Move { x, y }),
            _ => {
                print_help();
                None
            }
        },
        _ => {
            print_help();
            None
        }
    }
}

fn print_help() {
    println!(
        "commands:\n\
        - hello 'user id'\n\
        - join match\n\
        - join new\n\
        - join 'game id'\n\
        - move 'x' 'y'"
    );
}

fn reply_to_string(reply: &Reply) -> String {
    match reply {
        Reply::HelloOk { version } => format!("session established (protocol {})", version),
        Reply::HelloUnsupported { min_version } => {
            format!("server requires protocol {} or newer", min_version)
        }
        Reply::HelloInvalid { user_id } => {
            format!("session already established for user {}", user_id)
        }
        Reply::JoinOk { game_id, state } => {
            format!("joined game {}\n{}", game_id, state_to_string(state))
        }
        Reply::Move { status, state } => {
            let verdict = match status {
                Status::Ok => "move accepted",
                Status::Illegal => "move is not legal",
                Status::Invalid => "it is not your turn",
                _ => "move rejected",
            };
            format!("{}\n{}", verdict, state_to_string(state))
        }
        Reply::Bare { action, status } => {
            format!("action {} answered with {:?}", action, status)
        }
    }
}

fn push_to_string(push: &Push) -> String {
    match push {
        Push::Connect => "opponent is here".to_string(),
        Push::Dconnect => "opponent is now away".to_string(),
        Push::GameState(state) => state_to_string(state),
        Push::Win => "you won the match!".to_string(),
        Push::Lose => "you lost the match.".to_string(),
        Push::Tie => "the match ended in a tie".to_string(),
    }
}

fn state_to_string(state: &StateFrame) -> String {
    let mut out = format!(
        "you play {}, turn {}, {}\n  0 1 2 3 4 5 6 7\n",
        match state.color {
            Color::Black => "black (X)",
            Color::White => "white (O)",
        },
        state.turn,
        if state.can_move {
            "your move"
        } else {
            "waiting"
        },
    );
    for (y, row) in state.board.rows().iter().enumerate() {
        out.push_str(&format!("{} ", y));
        for cell in row {
            out.push_str(match cell {
                Cell::E => ". ",
                Cell::B => "X ",
                Cell::W => "O ",
            });
        }
        out.push('\n');
    }
    out
}
