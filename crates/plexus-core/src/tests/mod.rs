// Shared fixtures for module tests and cross-module scenarios.
pub(crate) mod common;
mod scenarios;
