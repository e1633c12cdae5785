/// Default configuration values and fixed limits.
///
/// Scan timing defaults follow the component's historical behavior: one
/// five-second scan every minute, and a thirty-second manual window when a
/// scan-mode request carries no duration.

/// Time between the starts of two periodic scans.
pub const DEFAULT_SCAN_INTERVAL_MS: u32 = 60_000;

/// Length of one scan window.
pub const DEFAULT_SCAN_DURATION_MS: u32 = 5_000;

/// Manual scan-mode window used when a request omits the duration.
pub const DEFAULT_MANUAL_SCAN_MS: u32 = 30_000;

/// Whether the persisted registry is loaded at startup.
pub const DEFAULT_RESTORE_ON_STARTUP: bool = true;

/// How often the firmware drives the scheduler tick.
pub const TICK_INTERVAL_MS: u64 = 250;

/// Maximum number of keys the registry holds.
pub const MAX_KEYS: usize = 20;

/// Maximum key name length in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Maximum number of authorized-detection subscribers.
pub const MAX_SUBSCRIBERS: usize = 4;

/// NVS namespace used by the ESP-IDF firmware.
pub const NVS_NAMESPACE: &str = "keywarden";

/// NVS key holding the registry blob (NVS keys are limited to 15 bytes).
pub const NVS_KEY: &str = "keys";

/// Worst-case serialized size of one key in the JSON listing, including the
/// separating comma.
pub const MAX_KEY_JSON_LEN: usize = 160;

/// Size of the persisted blob / listing scratch buffer (one flash sector).
pub const MAX_BLOB_LEN: usize = 4096;
