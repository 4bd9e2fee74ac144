pub mod config;
pub mod engine;
pub mod limits;
pub mod logging;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod reference;
pub mod wal;
pub mod wire;
