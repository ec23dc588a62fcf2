pub mod analytical;
pub mod benchmark;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod types;
pub mod wire;
