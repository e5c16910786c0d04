//! # Plexus Event System Errors
//!
//! Defines error types specific to the event bus.
//!
//! [`EventSystemError`] covers both bus implementations: the in-process bus
//! only ever produces [`EventSystemError::HandlerTimeout`] (which is logged,
//! never returned from `publish`) and [`EventSystemError::Closed`], while the
//! networked bus adds transport and codec failures.
use std::time::Duration;

use thiserror::Error;

use crate::event::SubscriptionId;

#[derive(Debug, Error)]
pub enum EventSystemError {
    #[error("Event bus unavailable at '{endpoint}': {reason}")]
    BusUnavailable { endpoint: String, reason: String },

    #[error("Handler {subscription} on topic '{topic}' exceeded {timeout:?}")]
    HandlerTimeout {
        topic: String,
        subscription: SubscriptionId,
        timeout: Duration,
    },

    #[error("Failed to encode or decode event: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Transport error during '{operation}': {source}")]
    Transport {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Event bus is closed")]
    Closed,
}

impl EventSystemError {
    pub fn unavailable(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        EventSystemError::BusUnavailable {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(operation: impl Into<String>, source: std::io::Error) -> Self {
        EventSystemError::Transport {
            operation: operation.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EventSystemError>;
