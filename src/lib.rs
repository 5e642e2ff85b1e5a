#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cli;
pub mod compaction;
pub mod config;
pub mod error;
pub mod provider;
pub mod session;

pub use compaction::{ContextManager, ContextStats, ContextWindow};
pub use config::ContextManagerConfig;
pub use error::{Error, Result};
