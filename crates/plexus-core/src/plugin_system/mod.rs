//! # Plexus Plugin System
//!
//! The contract every unit of business logic implements and the ordered
//! registry the kernel drives it through.
//!
//! - **[`traits`]**: the [`Plugin`] trait, [`PluginState`] and the
//!   [`PluginDescriptor`] other plugins can see.
//! - **[`registry`]**: [`PluginRegistry`], registration-ordered and frozen
//!   once the kernel starts.
//! - **[`error`]**: [`PluginError`], returned by plugin hooks.
//!
//! Plugins never see the kernel directly; `init` hands them a
//! [`KernelHandle`](crate::kernel::KernelHandle) for bus access and descriptor
//! lookup. Whether that bus is in-process or networked is invisible to them.
pub mod error;
pub mod registry;
pub mod traits;

pub use error::{PluginError, PluginResult};
pub use registry::PluginRegistry;
pub use traits::{Plugin, PluginDescriptor, PluginState};
