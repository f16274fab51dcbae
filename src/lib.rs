pub mod backlog;
pub mod config;
pub mod db;
mod error;
pub mod fetch;
pub mod orchestrator;
pub mod paths;
pub mod runlog;
pub mod session;
pub mod videos;

pub use error::{EngineError, Result};
