// Runtime configuration
// Decision: Read from environment variables with defaults, like the rest of the service

use std::time::Duration;

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Configuration of entity actors and the transfer protocol
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Save an account snapshot every N events (0 disables)
    pub account_snapshot_interval: u64,
    /// Save a transfer snapshot every N events (0 disables)
    pub transfer_snapshot_interval: u64,
    /// How long a transfer or deposit request may stay in its readiness phase
    pub pending_request_timeout: Duration,
    /// How long a delivery waits for an account reply before resending
    pub redelivery_interval: Duration,
    /// Capacity of every entity mailbox
    pub mailbox_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            account_snapshot_interval: 100,
            transfer_snapshot_interval: 100,
            pending_request_timeout: Duration::from_millis(1000),
            redelivery_interval: Duration::from_millis(500),
            mailbox_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            account_snapshot_interval: env_or(
                "SNAPSHOT_INTERVAL_ACCOUNT",
                defaults.account_snapshot_interval,
            ),
            transfer_snapshot_interval: env_or(
                "SNAPSHOT_INTERVAL_TRANSFER",
                defaults.transfer_snapshot_interval,
            ),
            pending_request_timeout: env_millis(
                "PENDING_REQUEST_TIMEOUT_MS",
                defaults.pending_request_timeout,
            ),
            redelivery_interval: env_millis("REDELIVERY_INTERVAL_MS", defaults.redelivery_interval),
            ..defaults
        }
    }
}

// =============================================================================
// ServiceTimeouts
// =============================================================================

/// Upper bound on each service operation, end to end
#[derive(Debug, Clone)]
pub struct ServiceTimeouts {
    pub create_account: Duration,
    pub retrieve_account: Duration,
    pub deposit_money: Duration,
    pub make_transfer: Duration,
    pub retrieve_transfer: Duration,
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        let five_seconds = Duration::from_millis(5000);
        Self {
            create_account: five_seconds,
            retrieve_account: five_seconds,
            deposit_money: five_seconds,
            make_transfer: five_seconds,
            retrieve_transfer: five_seconds,
        }
    }
}

impl ServiceTimeouts {
    /// Create timeouts from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            create_account: env_millis("TIMEOUT_ACCOUNT_CREATE_MS", defaults.create_account),
            retrieve_account: env_millis("TIMEOUT_ACCOUNT_RETRIEVE_MS", defaults.retrieve_account),
            deposit_money: env_millis("TIMEOUT_ACCOUNT_DEPOSIT_MS", defaults.deposit_money),
            make_transfer: env_millis("TIMEOUT_TRANSFER_MAKE_MS", defaults.make_transfer),
            retrieve_transfer: env_millis("TIMEOUT_TRANSFER_RETRIEVE_MS", defaults.retrieve_transfer),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %value, "Invalid configuration value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(env_or(key, default_ms))
}
