//! Frame encoding and decoding.
//!
//! The codec is pure: both directions work on byte buffers and return
//! structured frame values, without touching sockets or session state.
//! Every multi-octet word is big-endian and fields narrower than an octet
//! are packed MSB-first, independent of the host.
//!
//! Client frames carry a one-octet action preamble followed by a fixed-size
//! body. Server frames carry a two-octet preamble whose most significant
//! bit separates action statuses (responses to a specific request) from
//! state pushes (unsolicited notifications).

use crate::game::{Board, Color};
use crate::protocol::board_pack::{pack_board, unpack_board, BOARD_OCTETS};
use std::fmt::{Display, Formatter};

// client action preambles
pub const ACTION_HELLO: u8 = 0;
pub const ACTION_JOIN: u8 = 1;
pub const ACTION_MOVE: u8 = 2;

// state push message types, carried with the push bit set
const PUSH_CONNECT: u16 = 0;
const PUSH_DCONNECT: u16 = 1;
const PUSH_GAMESTATE: u16 = 2;
const PUSH_WIN: u16 = 3;
const PUSH_LOSE: u16 = 4;
const PUSH_TIE: u16 = 5;

const PUSH_BIT: u16 = 0x8000;

/// the single protocol revision spoken today
pub const PROTOCOL_MIN: u16 = 0;
pub const PROTOCOL_MAX: u16 = 0;

pub const STATE_FRAME_OCTETS: usize = 1 + BOARD_OCTETS;

/// Decode failure classes.
///
/// `BadFormat` covers truncated bodies and undecodable field values;
/// `Unsupported` carries an action preamble the server does not implement.
/// Semantically invalid but well-formed data is not the codec's business.
#[derive(Clone, PartialEq, Eq, Copy, Debug)]
pub enum WireError {
    BadFormat,
    Unsupported(u8),
}

impl Display for WireError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::BadFormat => f.write_str("malformed frame"),
            WireError::Unsupported(action) => {
                write!(f, "unsupported action preamble {}", action)
            }
        }
    }
}

impl std::error::Error for WireError {}

#[derive(Clone, PartialEq, Eq, Copy, Debug)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    BadFormat = 1,
    Illegal = 2,
    Invalid = 3,
    Unsupported = 4,
    Unauthorized = 5,
}

impl Status {
    pub fn from_octet(octet: u8) -> Result<Self, WireError> {
        match octet {
            0 => Ok(Status::Ok),
            1 => Ok(Status::BadFormat),
            2 => Ok(Status::Illegal),
            3 => Ok(Status::Invalid),
            4 => Ok(Status::Unsupported),
            5 => Ok(Status::Unauthorized),
            _ => Err(WireError::BadFormat),
        }
    }
}

/// A client request.
#[derive(Clone, PartialEq, Eq, Copy, Debug)]
pub enum Request {
    Hello { max_version: u16, user_id: u32 },
    Join { game_id: u32 },
    /// nibble coordinates; range checking is the registry's job
    Move { x: u8, y: u8 },
}

impl Request {
    pub fn action(&self) -> u8 {
        match self {
            Request::Hello { .. } => ACTION_HELLO,
            Request::Join { .. } => ACTION_JOIN,
            Request::Move { .. } => ACTION_MOVE,
        }
    }

    /// body size for an action preamble, `None` when unimplemented
    pub fn body_len(action: u8) -> Option<usize> {
        match action {
            ACTION_HELLO => Some(6),
            ACTION_JOIN => Some(4),
            ACTION_MOVE => Some(1),
            _ => None,
        }
    }

    pub fn decode_body(action: u8, body: &[u8]) -> Result<Self, WireError> {
        match Request::body_len(action) {
            None => Err(WireError::Unsupported(action)),
            Some(len) if body.len() != len => Err(WireError::BadFormat),
            Some(_) => Ok(match action {
                ACTION_HELLO => Request::Hello {
                    max_version: u16::from_be_bytes([body[0], body[1]]),
                    user_id: u32::from_be_bytes([body[2], body[3], body[4], body[5]]),
                },
                ACTION_JOIN => Request::Join {
                    game_id: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
                },
                _ => Request::Move {
                    x: body[0] >> 4,
                    y: body[0] & 0x0f,
                },
            }),
        }
    }

    /// decode one whole frame from a buffer
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        match buf.split_first() {
            None => Err(WireError::BadFormat),
            Some((&action, body)) => Request::decode_body(action, body),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dat = Vec::with_capacity(7);
        dat.push(self.action());
        match *self {
            Request::Hello {
                max_version,
                user_id,
            } => {
                dat.extend(max_version.to_be_bytes());
                dat.extend(user_id.to_be_bytes());
            }
            Request::Join { game_id } => dat.extend(game_id.to_be_bytes()),
            Request::Move { x, y } => dat.push(x << 4 | (y & 0x0f)),
        }
        dat
    }
}

/// The GAMESTATE body: one packed octet of `color:1, can_move:1, turn:6`
/// followed by the 128-bit board.
///
/// `color` is the recipient's color, not the side to move; the two coincide
/// exactly when `can_move` is set. `turn` is the ply counter truncated to
/// six bits.
#[derive(Clone, PartialEq, Eq, Copy, Debug)]
pub struct StateFrame {
    pub color: Color,
    pub can_move: bool,
    pub turn: u8,
    pub board: Board,
}

impl StateFrame {
    pub fn pack(&self) -> [u8; STATE_FRAME_OCTETS] {
        let mut dat = [0u8; STATE_FRAME_OCTETS];
        let color_bit: u8 = match self.color {
            Color::Black => 0,
            Color::White => 1,
        };
        dat[0] = color_bit << 7 | (self.can_move as u8) << 6 | (self.turn & 0x3f);
        dat[1..].copy_from_slice(&pack_board(&self.board));
        dat
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != STATE_FRAME_OCTETS {
            return Err(WireError::BadFormat);
        }
        Ok(StateFrame {
            color: if bytes[0] & 0x80 != 0 {
                Color::White
            } else {
                Color::Black
            },
            can_move: bytes[0] & 0x40 != 0,
            turn: bytes[0] & 0x3f,
            board: unpack_board(&bytes[1..])?,
        })
    }
}

/// An action status: the server's response to one client request.
///
/// The body shape depends on both the action type and the status code, so
/// each distinct shape is its own variant. `Bare` covers every empty-bodied
/// combination: BAD_FORMAT for any action, the UNSUPPORTED echo of an
/// unknown preamble, JOIN failures, and the INVALID gating replies sent
/// before a session or a joined game exists.
#[derive(Clone, PartialEq, Eq, Copy, Debug)]
pub enum Reply {
    HelloOk { version: u16 },
    HelloUnsupported { min_version: u16 },
    HelloInvalid { user_id: u32 },
    JoinOk { game_id: u32, state: StateFrame },
    Move { status: Status, state: StateFrame },
    Bare { action: u8, status: Status },
}

impl Reply {
    fn preamble(&self) -> [u8; 2] {
        match *self {
            Reply::HelloOk { .. } => [Status::Ok as u8, ACTION_HELLO],
            Reply::HelloUnsupported { .. } => [Status::Unsupported as u8, ACTION_HELLO],
            Reply::HelloInvalid { .. } => [Status::Invalid as u8, ACTION_HELLO],
            Reply::JoinOk { .. } => [Status::Ok as u8, ACTION_JOIN],
            Reply::Move { status, .. } => [status as u8, ACTION_MOVE],
            Reply::Bare { action, status } => [status as u8, action],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dat = Vec::with_capacity(2 + 4 + STATE_FRAME_OCTETS);
        dat.extend(self.preamble());
        match *self {
            Reply::HelloOk { version } => dat.extend(version.to_be_bytes()),
            Reply::HelloUnsupported { min_version } => dat.extend(min_version.to_be_bytes()),
            Reply::HelloInvalid { user_id } => dat.extend(user_id.to_be_bytes()),
            Reply::JoinOk { game_id, state } => {
                dat.extend(game_id.to_be_bytes());
                dat.extend(state.pack());
            }
            Reply::Move { state, .. } => dat.extend(state.pack()),
            Reply::Bare { .. } => {}
        }
        dat
    }

    /// Decode one whole action-status frame.
    ///
    /// A MOVE status normally carries the full game state; the gating
    /// replies sent before a game is joined do not, and only the receiver
    /// knows which situation it is in. Absent that context, the body is
    /// taken when the buffer holds one.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 2 || buf[0] & 0x80 != 0 {
            return Err(WireError::BadFormat);
        }
        let status = Status::from_octet(buf[0])?;
        let action = buf[1];
        let body = &buf[2..];
        let reply = match (action, status) {
            (ACTION_HELLO, Status::Ok) => Reply::HelloOk {
                version: decode_u16(body)?,
            },
            (ACTION_HELLO, Status::Unsupported) => Reply::HelloUnsupported {
                min_version: decode_u16(body)?,
            },
            (ACTION_HELLO, Status::Invalid) => Reply::HelloInvalid {
                user_id: decode_u32(body)?,
            },
            (ACTION_JOIN, Status::Ok) => {
                if body.len() != 4 + STATE_FRAME_OCTETS {
                    return Err(WireError::BadFormat);
                }
                Reply::JoinOk {
                    game_id: decode_u32(&body[..4])?,
                    state: StateFrame::unpack(&body[4..])?,
                }
            }
            (ACTION_MOVE, status) if !body.is_empty() => Reply::Move {
                status,
                state: StateFrame::unpack(body)?,
            },
            (action, status) => {
                if !body.is_empty() {
                    return Err(WireError::BadFormat);
                }
                Reply::Bare { action, status }
            }
        };
        Ok(reply)
    }

    /// Body size of an action status, as the client must compute it from
    /// the preamble. `in_game` tells whether the receiving session has a
    /// joined game; the gating MOVE replies carry no body.
    pub fn body_len(action: u8, status: Status, in_game: bool) -> usize {
        match (action, status) {
            (_, Status::BadFormat) => 0,
            (ACTION_HELLO, Status::Ok | Status::Unsupported) => 2,
            (ACTION_HELLO, Status::Invalid) => 4,
            (ACTION_JOIN, Status::Ok) => 4 + STATE_FRAME_OCTETS,
            (ACTION_MOVE, _) if in_game => STATE_FRAME_OCTETS,
            _ => 0,
        }
    }
}

/// A state push: a server-initiated frame unsolicited by any request.
#[derive(Clone, PartialEq, Eq, Copy, Debug)]
pub enum Push {
    Connect,
    Dconnect,
    GameState(StateFrame),
    Win,
    Lose,
    Tie,
}

impl Push {
    fn message_type(&self) -> u16 {
        match self {
            Push::Connect => PUSH_CONNECT,
            Push::Dconnect => PUSH_DCONNECT,
            Push::GameState(_) => PUSH_GAMESTATE,
            Push::Win => PUSH_WIN,
            Push::Lose => PUSH_LOSE,
            Push::Tie => PUSH_TIE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dat = Vec::with_capacity(2 + STATE_FRAME_OCTETS);
        dat.extend((PUSH_BIT | self.message_type()).to_be_bytes());
        if let Push::GameState(state) = self {
            dat.extend(state.pack());
        }
        dat
    }

    /// body size for a push preamble with the push bit stripped
    pub fn body_len(message_type: u16) -> usize {
        if message_type == PUSH_GAMESTATE {
            STATE_FRAME_OCTETS
        } else {
            0
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 2 {
            return Err(WireError::BadFormat);
        }
        let preamble = u16::from_be_bytes([buf[0], buf[1]]);
        if preamble & PUSH_BIT == 0 {
            return Err(WireError::BadFormat);
        }
        let body = &buf[2..];
        match preamble & !PUSH_BIT {
            PUSH_GAMESTATE => Ok(Push::GameState(StateFrame::unpack(body)?)),
            _ if !body.is_empty() => Err(WireError::BadFormat),
            PUSH_CONNECT => Ok(Push::Connect),
            PUSH_DCONNECT => Ok(Push::Dconnect),
            PUSH_WIN => Ok(Push::Win),
            PUSH_LOSE => Ok(Push::Lose),
            PUSH_TIE => Ok(Push::Tie),
            _ => Err(WireError::BadFormat),
        }
    }
}

/// Any server-to-client frame; the preamble's most significant bit picks
/// the kind.
#[derive(Clone, PartialEq, Eq, Copy, Debug)]
pub enum ServerFrame {
    Reply(Reply),
    Push(Push),
}

impl ServerFrame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ServerFrame::Reply(reply) => reply.encode(),
            ServerFrame::Push(push) => push.encode(),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        match buf.first() {
            None => Err(WireError::BadFormat),
            Some(octet) if octet & 0x80 != 0 => Push::decode(buf).map(ServerFrame::Push),
            Some(_) => Reply::decode(buf).map(ServerFrame::Reply),
        }
    }
}

fn decode_u16(body: &[u8]) -> Result<u16, WireError> {
    match body.try_into() {
        Ok(bytes) => Ok(u16::from_be_bytes(bytes)),
        Err(_) => Err(WireError::BadFormat),
    }
}

fn decode_u32(body: &[u8]) -> Result<u32, WireError> {
    match body.try_into() {
        Ok(bytes) => Ok(u32::from_be_bytes(bytes)),
        Err(_) => Err(WireError::BadFormat),
    }
}
