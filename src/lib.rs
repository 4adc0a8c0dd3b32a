pub mod config;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod sweep;
pub mod validate;
pub mod wal;
pub mod wire;
