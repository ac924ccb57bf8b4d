pub mod config;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod state;
