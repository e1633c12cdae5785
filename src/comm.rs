/// Communication layer — NDJSON command surface over BLE GATT.
///
/// The companion writes newline-delimited JSON commands to the RX
/// characteristic; the device answers with NDJSON messages on TX. Commands
/// are dispatched on their `cmd` field onto [`KeyManager`] operations, and
/// every command except `get_status` is answered with an `ack`.
use crate::board;
use crate::defaults::DEFAULT_MANUAL_SCAN_MS;
use crate::error::Error;
use crate::mac::MacAddress;
use crate::manager::KeyManager;
use crate::protocol::{CommandError, DeviceMessage, HostCommand, RawCommand, MAX_MSG_LEN, VERSION};
use crate::scanner::ScanControl;
use crate::schedule::Millis;
use crate::storage::KeyStore;
use crate::summary::SummarySink;

/// BLE GATT service UUIDs for keywarden.
///
/// These duplicate the string literals in the `#[gatt_service]` and `#[characteristic]`
/// proc macro attributes in the firmware — Rust proc macros require string literals, so we
/// can't reference these constants there. Kept here as the canonical source of truth.
#[allow(dead_code)]
pub mod ble_uuids {
    /// keywarden primary service UUID
    pub const SERVICE: &str = "6b770001-5d2e-4f8a-9c31-0e7a4b2d9f15";
    /// TX characteristic — replies and detections, notify
    pub const TX_CHAR: &str = "6b770002-5d2e-4f8a-9c31-0e7a4b2d9f15";
    /// RX characteristic — commands, write
    pub const RX_CHAR: &str = "6b770003-5d2e-4f8a-9c31-0e7a4b2d9f15";
}

/// BLE advertising name
pub const BLE_ADV_NAME: &str = "keywarden";

/// Maximum BLE notification payload (MTU-3)
pub const BLE_MAX_NOTIFY: usize = 20;

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    let len = serde_json_core::to_slice(msg, buf).ok()?;
    // Newline terminator for NDJSON; a message that fills the buffer is dropped
    let slot = buf.get_mut(len)?;
    *slot = b'\n';
    Some(len + 1)
}

/// Deserialize a HostCommand from a JSON byte slice.
///
/// A rejected line should be answered with [`CommandError::ack`].
pub fn parse_command(data: &[u8]) -> Result<HostCommand, CommandError> {
    let (raw, _) = serde_json_core::from_slice::<RawCommand>(data.trim_ascii())
        .map_err(|_| CommandError::Malformed)?;

    let cmd = match raw.cmd.as_str() {
        "add_key" => HostCommand::AddKey {
            name: required(raw.name, "add_key", "name")?,
            mac: required(raw.mac, "add_key", "mac")?,
            require_button: raw.require_button.unwrap_or(false),
        },
        "remove_key" => HostCommand::RemoveKey {
            mac: required(raw.mac, "remove_key", "mac")?,
        },
        "set_key_status" => HostCommand::SetKeyStatus {
            mac: required(raw.mac, "set_key_status", "mac")?,
            enabled: required(raw.enabled, "set_key_status", "enabled")?,
        },
        "clear_keys" => HostCommand::ClearKeys,
        "start_scan_mode" => HostCommand::StartScanMode {
            duration_ms: raw.duration_ms.unwrap_or(DEFAULT_MANUAL_SCAN_MS),
        },
        "stop_scan_mode" => HostCommand::StopScanMode,
        "get_keys" => HostCommand::GetKeys,
        "get_status" => HostCommand::GetStatus,
        other => {
            log::warn!("Unknown command '{}'", other);
            return Err(CommandError::Unknown);
        }
    };
    Ok(cmd)
}

fn required<T>(
    value: Option<T>,
    cmd: &'static str,
    field: &'static str,
) -> Result<T, CommandError> {
    value.ok_or(CommandError::MissingField { cmd, field })
}

/// Apply a host command to the manager, passing every reply message to
/// `emit` in order.
pub fn handle_command<S, R, P, F>(
    cmd: &HostCommand,
    manager: &mut KeyManager<'_, S, R, P>,
    now: Millis,
    mut emit: F,
) where
    S: KeyStore,
    R: ScanControl,
    P: SummarySink,
    F: FnMut(&DeviceMessage<'_>),
{
    let result = match cmd {
        HostCommand::AddKey {
            name,
            mac,
            require_button,
        } => manager.add_key(name, mac, *require_button).map(|_| ()),
        HostCommand::RemoveKey { mac } => require_found(manager.remove_key(mac), mac),
        HostCommand::SetKeyStatus { mac, enabled } => {
            require_found(manager.set_key_status(mac, *enabled), mac)
        }
        HostCommand::ClearKeys => manager.clear_all_keys(),
        HostCommand::StartScanMode { duration_ms } => {
            manager.start_scan_mode(*duration_ms, now);
            Ok(())
        }
        HostCommand::StopScanMode => {
            manager.stop_scan_mode();
            Ok(())
        }
        HostCommand::GetKeys => {
            for key in manager.get_keys() {
                emit(&DeviceMessage::Key {
                    name: key.name.as_str(),
                    mac: key.mac_address,
                    enabled: key.enabled,
                    require_button: key.require_button,
                    last_seen: key.last_seen,
                });
            }
            Ok(())
        }
        HostCommand::GetStatus => {
            // The status report is the reply
            emit(&status_message(manager, now));
            return;
        }
    };

    let error = match result {
        Ok(()) => None,
        Err(e) => {
            if e.is_storage() {
                log::error!("Command {} not persisted: {}", cmd.name(), e);
            } else {
                log::warn!("Command {} failed: {}", cmd.name(), e);
            }
            Some(e.code())
        }
    };
    emit(&DeviceMessage::Ack {
        cmd: cmd.name(),
        ok: error.is_none(),
        error,
    });
}

/// Live status report for the manager at `now`.
pub fn status_message<S, R, P>(
    manager: &KeyManager<'_, S, R, P>,
    now: Millis,
) -> DeviceMessage<'static>
where
    S: KeyStore,
    R: ScanControl,
    P: SummarySink,
{
    DeviceMessage::Status {
        scanning: manager.is_scanning(),
        manual: manager.manual_mode_active(now),
        keys: u8::try_from(manager.get_keys().len()).unwrap_or(u8::MAX),
        uptime: u32::try_from(now / 1000).unwrap_or(u32::MAX),
        board: board::BOARD_NAME,
        version: VERSION,
    }
}

/// Turn a manager's "nothing matched" result into a reportable error.
fn require_found(result: Result<bool, Error>, mac: &str) -> Result<(), Error> {
    if result? {
        Ok(())
    } else {
        let mac = MacAddress::parse(mac)?;
        Err(Error::KeyNotFound(mac.to_mac_string()))
    }
}

// ── NDJSON line reader ─────────────────────────────────────────────────

/// NDJSON reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
/// A line longer than the buffer is discarded up to its newline.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    pos: usize,
    overflowed: bool,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            pos: 0,
            overflowed: false,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            let pos = core::mem::take(&mut self.pos);
            if core::mem::take(&mut self.overflowed) {
                log::warn!("Dropped over-long command line");
                return None;
            }
            return (pos > 0).then(|| &self.buf[..pos]);
        }

        if self.overflowed {
            return None;
        }
        if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
        } else {
            self.overflowed = true;
        }
        None
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}
