/// JSON message protocol between keywarden and a companion app.
///
/// All messages are newline-delimited JSON (NDJSON).
/// Uses `heapless` types for no_std/no-alloc operation.
use heapless::{String, Vec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mac::MacAddress;

/// Raw MAC text as received from the host, validated by the key manager.
/// Sized for padded or dash-separated input.
pub type MacInput = String<24>;

/// Raw key name as received from the host, clamped when stored. Any name
/// that fits a command line fits here.
pub type NameInput = String<MAX_MSG_LEN>;

/// Messages sent from the device to the companion app
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// Device status report
    #[serde(rename = "status")]
    Status {
        scanning: bool,
        /// Manual scan window open
        manual: bool,
        /// Number of registered keys
        keys: u8,
        /// Uptime in seconds
        uptime: u32,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
    /// An authorized key fired the detection event
    #[serde(rename = "detected")]
    Detected {
        name: &'a str,
        mac: MacAddress,
        /// Uptime in milliseconds at detection
        ts: u64,
    },
    /// One registry entry (sent once per key in reply to `get_keys`)
    #[serde(rename = "key")]
    Key {
        name: &'a str,
        mac: MacAddress,
        enabled: bool,
        require_button: bool,
        last_seen: u64,
    },
    /// Result of a host command
    #[serde(rename = "ack")]
    Ack {
        cmd: &'static str,
        ok: bool,
        /// Failure code, see `Error::code`
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'static str>,
    },
}

/// Commands sent from the companion app to the device.
///
/// Deserialized manually via [`RawCommand`] in `comm::parse_command()` because
/// `serde_json_core` does not support internally tagged enums (`deserialize_any`).
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    /// Register a key, or update the one with the same address
    AddKey {
        name: NameInput,
        mac: MacInput,
        require_button: bool,
    },
    RemoveKey { mac: MacInput },
    SetKeyStatus { mac: MacInput, enabled: bool },
    /// Remove every key
    ClearKeys,
    /// Open the manual scan window
    StartScanMode { duration_ms: u32 },
    /// Close the manual scan window early
    StopScanMode,
    /// Request the full key listing
    GetKeys,
    /// Request current status
    GetStatus,
}

impl HostCommand {
    /// Wire name of the command, echoed back in its `ack`.
    pub fn name(&self) -> &'static str {
        match self {
            HostCommand::AddKey { .. } => "add_key",
            HostCommand::RemoveKey { .. } => "remove_key",
            HostCommand::SetKeyStatus { .. } => "set_key_status",
            HostCommand::ClearKeys => "clear_keys",
            HostCommand::StartScanMode { .. } => "start_scan_mode",
            HostCommand::StopScanMode => "stop_scan_mode",
            HostCommand::GetKeys => "get_keys",
            HostCommand::GetStatus => "get_status",
        }
    }
}

/// Why a command line was rejected before reaching the key manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command line is not a valid command object")]
    Malformed,
    #[error("unknown command")]
    Unknown,
    #[error("{cmd} is missing '{field}'")]
    MissingField {
        cmd: &'static str,
        field: &'static str,
    },
}

impl CommandError {
    /// Short machine-readable code for the rejection `ack`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Unknown => "unknown_command",
            Self::MissingField { .. } => "missing_field",
        }
    }

    /// The `ack` answering a rejected line. Lines that never named a known
    /// command are acked as `invalid`.
    pub fn ack(&self) -> DeviceMessage<'static> {
        let cmd = match self {
            Self::MissingField { cmd, .. } => cmd,
            Self::Malformed | Self::Unknown => "invalid",
        };
        DeviceMessage::Ack {
            cmd,
            ok: false,
            error: Some(self.code()),
        }
    }
}

/// Wire format for host commands — flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`. Converted to [`HostCommand`] in
/// `comm::parse_command()`.
#[derive(Deserialize)]
pub(crate) struct RawCommand {
    pub cmd: String<16>,
    #[serde(default)]
    pub name: Option<NameInput>,
    #[serde(default)]
    pub mac: Option<MacInput>,
    #[serde(default)]
    pub require_button: Option<bool>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub duration_ms: Option<u32>,
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 256;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;
