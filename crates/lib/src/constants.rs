//! Constants used throughout the vaultsync library.

/// Default delay between the last observer detaching and upstream teardown.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 1000;

/// Default per-request timeout for the HTTP remote.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Path prefix of every HTTP remote endpoint.
pub const API_PREFIX: &str = "api";
