pub mod cli;
pub mod config;
pub mod data;
pub mod output;
pub mod tracing;
pub mod verify;
