use std::time::Duration;

/// The number of seconds an unconfirmed transaction may go without the server
/// re-reporting it before serialization stops saving it.
pub const DEFAULT_UNCONFIRMED_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// How often the updater asks the server for the current chain tip.
pub const HEIGHT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default polling interval for a watched address.
pub const DEFAULT_ADDRESS_POLL: Duration = Duration::from_secs(10);

/// Polling interval for the single prioritized address.
pub const PRIORITY_ADDRESS_POLL: Duration = Duration::from_secs(1);
