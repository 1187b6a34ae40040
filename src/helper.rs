use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::{Address, Network, Script};

/// Extracts the payment address from an output script, if the script has a
/// standard address form.
pub fn extract_address(script: &Script, network: Network) -> Option<Address> {
    Address::from_script(script, network).ok()
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
