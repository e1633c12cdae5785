/// Boundary to the BLE scan subsystem.
///
/// The scheduler drives the radio through [`ScanControl`]; the radio reports
/// each advertiser address back to the manager. Both firmwares implement the
/// trait by signalling the task/thread that owns the BLE stack, so neither
/// call blocks.
use heapless::Vec;
use thiserror::Error;

use crate::defaults::MAX_KEYS;
use crate::mac::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("scan subsystem unavailable")]
    Unavailable,
}

/// Start/stop control over the scan subsystem. Both calls are
/// fire-and-forget and expected to be idempotent.
pub trait ScanControl {
    fn start_scan(&mut self) -> Result<(), ScanError>;
    fn stop_scan(&mut self) -> Result<(), ScanError>;
}

impl<T: ScanControl + ?Sized> ScanControl for &mut T {
    fn start_scan(&mut self) -> Result<(), ScanError> {
        (**self).start_scan()
    }

    fn stop_scan(&mut self) -> Result<(), ScanError> {
        (**self).stop_scan()
    }
}

/// Scan subsystem that is not present. Every call reports `Unavailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRadio;

impl ScanControl for NoRadio {
    fn start_scan(&mut self) -> Result<(), ScanError> {
        Err(ScanError::Unavailable)
    }

    fn stop_scan(&mut self) -> Result<(), ScanError> {
        Err(ScanError::Unavailable)
    }
}

/// Registered addresses already reported in the current scan window.
///
/// A nearby beacon advertises several times a second. Only its first report
/// in each window reaches the matcher and the store.
#[derive(Debug, Default)]
pub struct SightingFilter {
    seen: Vec<MacAddress, MAX_KEYS>,
}

impl SightingFilter {
    pub const fn new() -> Self {
        Self { seen: Vec::new() }
    }

    pub fn contains(&self, mac: MacAddress) -> bool {
        self.seen.contains(&mac)
    }

    /// Remember `mac` until the next reset. A full filter lets reports through.
    pub fn note(&mut self, mac: MacAddress) {
        if !self.contains(mac) {
            let _ = self.seen.push(mac);
        }
    }

    /// Start a new scan window.
    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

/// Convert an HCI address (least significant octet first, as carried in
/// advertising reports) into a [`MacAddress`].
pub fn address_from_le(raw: &[u8]) -> Option<MacAddress> {
    let bytes: [u8; 6] = raw.try_into().ok()?;
    let mut octets = bytes;
    octets.reverse();
    Some(MacAddress(octets))
}
