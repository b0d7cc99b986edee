pub mod command;
pub mod data_structures;
pub mod error;
pub mod rpc;
pub mod setup;
pub mod utils;
