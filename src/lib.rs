pub mod annex;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod error;
pub mod pilot;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod secrets;
pub mod shared;
pub mod signals;
pub mod ssh;
pub mod state;
pub mod transfer;
