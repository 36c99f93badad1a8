pub mod game;
pub mod protocol;
pub mod server;

pub use game::{Board, Cell, Color};
pub use protocol::{Push, Reply, Request, ServerFrame, StateFrame, Status, WireError};
pub use server::start_server;
