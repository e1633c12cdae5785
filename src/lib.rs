//! keywarden library — authorized BLE key registry and scan scheduler.
//!
//! Keeps a small registry of authorized beacon identities ("keys"), drives
//! periodic BLE scanning with a manual override window, and raises an event
//! when an enabled key is seen. The registry survives power cycles through a
//! pluggable store.
//!
//! Everything here is `no_std`, no allocator, and testable on any host with
//! `cargo test`. Platform binaries (the Embassy firmware in `src/main.rs` and
//! the ESP-IDF firmware in `firmware-std/`) are thin consumers that provide
//! the radio, the flash, a clock, and output sinks.
//!
//! Layout:
//! - core: `mac`, `registry`, `schedule`, `matcher`, `notify`, `manager`
//! - boundaries: `scanner` (radio), `storage` + `journal` (flash), `summary` (outputs)
//! - wiring: `protocol`, `comm`, `config`, `error`, `defaults`, `board`

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod comm;
pub mod config;
pub mod defaults;
pub mod error;
pub mod journal;
pub mod mac;
pub mod manager;
pub mod matcher;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod schedule;
pub mod storage;
pub mod summary;

pub use config::ManagerConfig;
pub use error::Error;
pub use mac::MacAddress;
pub use manager::KeyManager;
pub use registry::Key;
