pub mod autostash;
pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod git;
pub mod stack;
pub mod state;
pub mod storage;
pub mod utils;

pub use errors::StackError;
