use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "plexus";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer identity stamped on events the kernel publishes.
pub const KERNEL_PRODUCER: &str = "kernel";

/// Prefix of broker subjects used by the networked bus.
pub const DEFAULT_SUBJECT_PREFIX: &str = "plexus";

/// Upper bound on one handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline applied to a whole kernel shutdown (and to rollback).
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared deadline for one health check fan-out.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconnect attempts after a networked transport loses its broker.
pub const DEFAULT_MAX_RECONNECTS: u32 = 10;

pub const DEFAULT_RECONNECT_WAIT: Duration = Duration::from_secs(2);

/// Largest frame the TCP transport will read or write (16 MiB).
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Environment variables consulted by `KernelConfig::apply_overrides`.
pub const ENV_BUS_MODE: &str = "PLEXUS_BUS_MODE";
pub const ENV_BROKER_ENDPOINT: &str = "PLEXUS_BROKER_ENDPOINT";
pub const ENV_SERVICE_NAME: &str = "PLEXUS_SERVICE_NAME";
