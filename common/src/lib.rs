pub mod config;
pub mod exchange;
pub mod frame;
pub mod health;
pub mod snapshot;
