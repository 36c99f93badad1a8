mod board;

pub use board::{Board, Cell, Color, SIDE};
