//! Fixed operating parameters. Everything here is agreed out-of-band with
//! the relay unit or baked in at flash time; nothing is negotiated at
//! runtime and nothing persists across boots.

/// Physical-layer parameters for the long-range link. Both ends must run the
/// same set; a mismatch is indistinguishable from a dead peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkParams {
    pub frequency_hz: u64,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    /// Denominator of the 4/x coding rate.
    pub coding_rate: u8,
    pub sync_word: u8,
    pub tx_power_dbm: i8,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            frequency_hz: 433_000_000,
            spreading_factor: 12,
            bandwidth_hz: 125_000,
            coding_rate: 8,
            sync_word: 0xF3,
            tx_power_dbm: 20,
        }
    }
}

/// Credentials for the maintenance access point the remote hosts in
/// interactive mode. Overridable at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApConfig {
    pub ssid: &'static str,
    pub passphrase: &'static str,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            ssid: option_env!("RELAYFOB_AP_SSID").unwrap_or("FIELD-RELAY-REMOTE"),
            passphrase: option_env!("RELAYFOB_AP_PASS").unwrap_or("admin1234"),
        }
    }
}
