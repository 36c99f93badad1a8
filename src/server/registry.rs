//! Game table, matchmaking queue, and the game lifecycle machine.
//!
//! The registry performs no I/O: every mutating operation returns the
//! requester's reply plus the `(connection, push)` pairs the session layer
//! must deliver. All operations run under the session manager's lock, so
//! dequeue-and-attach is a single critical section.

use crate::game::{Board, Color};
use crate::protocol::{Push, Reply, StateFrame, Status, ACTION_JOIN, ACTION_MOVE};
use log::info;
use std::collections::{HashMap, VecDeque};

pub(crate) type ConnId = u64;
pub(crate) type GameId = u32;

// game ids 0 and 1 are request-only markers in JOIN
pub(crate) const JOIN_MATCHMAKE: u32 = 0;
pub(crate) const JOIN_CREATE: u32 = 1;
const FIRST_GAME_ID: GameId = 2;

pub(crate) type Pushes = Vec<(ConnId, Push)>;

#[derive(Clone, PartialEq, Eq, Copy, Debug)]
pub(crate) enum Lifecycle {
    Unready,
    Ready,
    Completed,
}

/// One game. The host seat is white, the guest seat black; each seat also
/// records the connection currently bound to it, which is the single source
/// of truth for push routing.
///
/// `to_move` is carried as its own state: after a forced pass the turn
/// counter's parity no longer matches the real alternation, so the mover
/// cannot be recomputed from `turn` and the board.
pub(crate) struct Game {
    id: GameId,
    host: u32,
    guest: Option<u32>,
    board: Board,
    turn: u32,
    to_move: Color,
    lifecycle: Lifecycle,
    queued: bool,
    host_conn: Option<ConnId>,
    guest_conn: Option<ConnId>,
}

impl Game {
    fn color_of(&self, user: u32) -> Option<Color> {
        if self.host == user {
            Some(Color::White)
        } else if self.guest == Some(user) {
            Some(Color::Black)
        } else {
            None
        }
    }

    fn state_frame(&self, recipient: Color) -> StateFrame {
        StateFrame {
            color: recipient,
            can_move: self.lifecycle == Lifecycle::Ready && self.to_move == recipient,
            turn: (self.turn & 0x3f) as u8,
            board: self.board,
        }
    }

    fn seat_conn(&self, color: Color) -> Option<ConnId> {
        match color {
            Color::White => self.host_conn,
            Color::Black => self.guest_conn,
        }
    }
}

pub(crate) struct Registry {
    games: HashMap<GameId, Game>,
    queue: VecDeque<GameId>,
    next_id: GameId,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            games: HashMap::new(),
            queue: VecDeque::new(),
            next_id: FIRST_GAME_ID,
        }
    }

    /// ids are monotone for the process lifetime, never reused
    fn create_unready(&mut self, host: u32, host_conn: ConnId, queued: bool) -> GameId {
        let id = self.next_id;
        self.next_id += 1;
        self.games.insert(
            id,
            Game {
                id,
                host,
                guest: None,
                board: Board::opening(),
                turn: 1,
                to_move: Color::Black,
                lifecycle: Lifecycle::Unready,
                queued,
                host_conn: Some(host_conn),
                guest_conn: None,
            },
        );
        if queued {
            self.queue.push_back(id);
        }
        info!("game {} created by user {} (queued: {})", id, host, queued);
        id
    }

    pub fn join(&mut self, conn: ConnId, user: u32, requested: u32) -> (Reply, Pushes) {
        match requested {
            JOIN_MATCHMAKE => {
                // first pending game hosted by someone else; a user is
                // never matched with themself, their own pending games
                // stay queued behind
                let matched = self
                    .queue
                    .iter()
                    .position(|id| self.games.get(id).map_or(false, |g| g.host != user));
                match matched.and_then(|idx| self.queue.remove(idx)) {
                    Some(id) => self.attach_guest(conn, user, id),
                    None => {
                        let id = self.create_unready(user, conn, true);
                        (self.ok_reply(id, Color::White), Vec::new())
                    }
                }
            }
            JOIN_CREATE => {
                let id = self.create_unready(user, conn, false);
                (self.ok_reply(id, Color::White), Vec::new())
            }
            id => self.join_existing(conn, user, id),
        }
    }

    fn join_existing(&mut self, conn: ConnId, user: u32, id: GameId) -> (Reply, Pushes) {
        let seat = match self.games.get(&id) {
            None => None,
            Some(game) => match game.lifecycle {
                Lifecycle::Completed => None,
                Lifecycle::Unready | Lifecycle::Ready => match game.color_of(user) {
                    Some(color) => Some(Some(color)),
                    None if game.lifecycle == Lifecycle::Unready => Some(None),
                    None => {
                        return (
                            Reply::Bare {
                                action: ACTION_JOIN,
                                status: Status::Unauthorized,
                            },
                            Vec::new(),
                        )
                    }
                },
            },
        };
        match seat {
            // unknown or completed game
            None => (
                Reply::Bare {
                    action: ACTION_JOIN,
                    status: Status::Invalid,
                },
                Vec::new(),
            ),
            Some(None) => self.attach_guest(conn, user, id),
            Some(Some(color)) => self.rebind(conn, user, id, color),
        }
    }

    /// second player arrives: the game becomes Ready and leaves the queue
    fn attach_guest(&mut self, conn: ConnId, user: u32, id: GameId) -> (Reply, Pushes) {
        let mut pushes = Vec::new();
        let reply = match self.games.get_mut(&id) {
            None => Reply::Bare {
                action: ACTION_JOIN,
                status: Status::Invalid,
            },
            Some(game) => {
                game.guest = Some(user);
                game.guest_conn = Some(conn);
                game.lifecycle = Lifecycle::Ready;
                game.queued = false;
                if let Some(host_conn) = game.host_conn {
                    pushes.push((host_conn, Push::Connect));
                }
                info!("user {} readied game {} as guest", user, game.id);
                Reply::JoinOk {
                    game_id: id,
                    state: game.state_frame(Color::Black),
                }
            }
        };
        self.queue.retain(|queued| *queued != id);
        (reply, pushes)
    }

    /// a player returns to their own game, possibly from a new connection
    fn rebind(&mut self, conn: ConnId, user: u32, id: GameId, color: Color) -> (Reply, Pushes) {
        let mut pushes = Vec::new();
        let reply = match self.games.get_mut(&id) {
            None => Reply::Bare {
                action: ACTION_JOIN,
                status: Status::Invalid,
            },
            Some(game) => {
                match color {
                    Color::White => game.host_conn = Some(conn),
                    Color::Black => game.guest_conn = Some(conn),
                }
                if let Some(peer_conn) = game.seat_conn(color.switch()) {
                    pushes.push((peer_conn, Push::Connect));
                }
                info!("user {} rejoined game {}", user, game.id);
                Reply::JoinOk {
                    game_id: id,
                    state: game.state_frame(color),
                }
            }
        };
        (reply, pushes)
    }

    fn ok_reply(&self, id: GameId, color: Color) -> Reply {
        match self.games.get(&id) {
            None => Reply::Bare {
                action: ACTION_JOIN,
                status: Status::Invalid,
            },
            Some(game) => Reply::JoinOk {
                game_id: id,
                state: game.state_frame(color),
            },
        }
    }

    pub fn play(&mut self, user: u32, game_id: GameId, x: u8, y: u8) -> (Reply, Pushes) {
        let bare_invalid = (
            Reply::Bare {
                action: ACTION_MOVE,
                status: Status::Invalid,
            },
            Vec::new(),
        );
        let game = match self.games.get_mut(&game_id) {
            None => return bare_invalid,
            Some(game) => game,
        };
        let color = match game.color_of(user) {
            None => return bare_invalid,
            Some(color) => color,
        };
        if x >= 8 || y >= 8 {
            return (
                Reply::Move {
                    status: Status::Illegal,
                    state: game.state_frame(color),
                },
                Vec::new(),
            );
        }
        if game.lifecycle != Lifecycle::Ready || game.to_move != color {
            return (
                Reply::Move {
                    status: Status::Invalid,
                    state: game.state_frame(color),
                },
                Vec::new(),
            );
        }
        let next = match game.board.apply(color, x, y) {
            // empty capture set: the move flips nothing
            None => {
                return (
                    Reply::Move {
                        status: Status::Illegal,
                        state: game.state_frame(color),
                    },
                    Vec::new(),
                )
            }
            Some(board) => board,
        };
        game.board = next;
        game.turn += 1;
        // turn advancement: the opponent moves unless blocked, in which
        // case the mover goes again (forced pass); blocked both ways ends
        // the game and leaves to_move at its last holder
        let opponent = color.switch();
        if game.board.has_any_legal(opponent) {
            game.to_move = opponent;
        } else if game.board.has_any_legal(color) {
            game.to_move = color;
        } else {
            game.lifecycle = Lifecycle::Completed;
            let (black, white) = game.board.score();
            info!("game {} completed, black {} white {}", game.id, black, white);
        }
        let mut pushes = Vec::new();
        if let Some(peer_conn) = game.seat_conn(color.switch()) {
            pushes.push((peer_conn, Push::GameState(game.state_frame(color.switch()))));
        }
        if game.lifecycle == Lifecycle::Completed {
            let (black, white) = game.board.score();
            if let Some(peer_conn) = game.seat_conn(color.switch()) {
                pushes.push((peer_conn, verdict(black, white, color.switch())));
            }
            if let Some(own_conn) = game.seat_conn(color) {
                pushes.push((own_conn, verdict(black, white, color)));
            }
        }
        (
            Reply::Move {
                status: Status::Ok,
                state: game.state_frame(color),
            },
            pushes,
        )
    }

    /// Detach a closing connection from its game.
    ///
    /// Only the seat still bound to `conn` is cleared; a binding already
    /// superseded by a newer session is left alone. The game survives.
    pub fn unbind(&mut self, conn: ConnId, game_id: GameId) -> Pushes {
        let game = match self.games.get_mut(&game_id) {
            None => return Vec::new(),
            Some(game) => game,
        };
        let peer = if game.host_conn == Some(conn) {
            game.host_conn = None;
            game.guest_conn
        } else if game.guest_conn == Some(conn) {
            game.guest_conn = None;
            game.host_conn
        } else {
            None
        };
        match peer {
            Some(peer_conn) => vec![(peer_conn, Push::Dconnect)],
            None => Vec::new(),
        }
    }
}

fn verdict(black: u8, white: u8, recipient: Color) -> Push {
    if black == white {
        Push::Tie
    } else {
        let winner = if black > white {
            Color::Black
        } else {
            Color::White
        };
        if winner == recipient {
            Push::Win
        } else {
            Push::Lose
        }
    }
}
