pub mod config;
pub mod error;
pub mod log;
pub mod util;

// Task graphs and their execution
pub mod core;
pub mod lock;
pub mod orchestration;

// Domain state and vendor plugins
pub mod conformance;
pub mod persistence;
pub mod plugin;

pub use error::{Error, Result};
