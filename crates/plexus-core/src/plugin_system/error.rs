//! # Plexus Plugin Errors
//!
//! [`PluginError`] is what a plugin's lifecycle hooks return. The kernel wraps
//! it with the failing plugin's name (`InitFailed`, `StartFailed`, or an entry
//! in an aggregate `StopFailed`) before handing it to the host.
use std::error::Error as StdError;

use crate::event::error::EventSystemError;
use crate::kernel::context::ContextError;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("start failed: {0}")]
    Start(String),

    #[error("stop failed: {0}")]
    Stop(String),

    #[error("event bus error: {0}")]
    Bus(#[from] EventSystemError),

    #[error("{0}")]
    Context(#[from] ContextError),

    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl PluginError {
    /// Wrap any error a plugin's own dependencies produced.
    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        PluginError::Other(error.into())
    }
}

pub type PluginResult<T> = std::result::Result<T, PluginError>;
