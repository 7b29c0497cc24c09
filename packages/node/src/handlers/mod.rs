pub mod contents;
pub mod pieces;
pub mod stats;
pub mod transfers;
