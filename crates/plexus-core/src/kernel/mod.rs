//! # Plexus Kernel
//!
//! The `kernel` module is the lifecycle manager at the heart of `plexus-core`.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Lifecycle**: [`Microkernel`] owns the plugin registry and the event
//!   bus, starts plugins in registration order, stops them in reverse start
//!   order, rolls back partial startups and aggregates health.
//! - **Plugin access**: [`KernelHandle`] is the narrow view a plugin gets in
//!   `init`: publish/subscribe under its own identity plus the descriptors of
//!   already-initialized plugins.
//! - **Cancellation**: [`Context`] carries the cancellation token and deadline
//!   every lifecycle and health call must respect.
//! - **Constants** and **errors** ([`Error`], [`Result`]).
pub mod constants;
pub mod context;
pub mod error;
pub mod handle;
pub mod microkernel;

pub use context::{Context, ContextError};
pub use error::{Error, Result, StopFailure};
pub use handle::KernelHandle;
pub use microkernel::{KernelState, Microkernel};
