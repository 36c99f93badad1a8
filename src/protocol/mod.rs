//! Wire protocol
//!
//! Bit-accurate framing for the client actions, the conditional-shape
//! action statuses, and the state pushes.
pub(crate) mod board_pack;
pub(crate) mod frames;

pub use board_pack::{pack_board, unpack_board, BOARD_OCTETS};
pub use frames::{
    Push, Reply, Request, ServerFrame, StateFrame, Status, WireError, ACTION_HELLO, ACTION_JOIN,
    ACTION_MOVE, PROTOCOL_MAX, PROTOCOL_MIN, STATE_FRAME_OCTETS,
};
