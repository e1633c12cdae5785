/// Ordered registry of authorized keys.
///
/// The registry is the single source of truth for the key collection. MAC
/// identity is unique: adding an address that is already present updates the
/// entry in place. Insertion order is preserved and is also the lookup order.
///
/// Persistence and summary publication are not done here; [`KeyManager`]
/// wraps every mutation with both so they stay consistent.
///
/// [`KeyManager`]: crate::manager::KeyManager
use heapless::{String, Vec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults::{MAX_KEYS, MAX_NAME_LEN};
use crate::mac::MacAddress;

/// Display label of a key.
pub type KeyName = String<MAX_NAME_LEN>;

/// Fixed-capacity ordered key collection.
pub type KeyList = Vec<Key, MAX_KEYS>;

/// One authorized beacon identity.
///
/// Field order is the serialized order of the persisted blob and the key
/// listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub name: KeyName,
    pub mac_address: MacAddress,
    pub enabled: bool,
    pub require_button: bool,
    /// Milliseconds since boot of the last match, 0 if never seen.
    pub last_seen: u64,
}

impl Key {
    pub fn new(name: &str, mac_address: MacAddress, require_button: bool) -> Self {
        Self {
            name: sanitize_name(name),
            mac_address,
            enabled: true,
            require_button,
            last_seen: 0,
        }
    }
}

/// What `add` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The address was already registered; name and confirmation flag were
    /// replaced and the key re-enabled.
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry is full")]
    Full,
}

#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    keys: KeyList,
}

impl KeyRegistry {
    pub const fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Add a key, or update the existing entry with the same address.
    ///
    /// An update keeps `last_seen` and forces `enabled` back on.
    pub fn add(
        &mut self,
        name: &str,
        mac: MacAddress,
        require_button: bool,
    ) -> Result<AddOutcome, RegistryError> {
        if let Some(key) = self.find_mut(mac) {
            key.name = sanitize_name(name);
            key.require_button = require_button;
            key.enabled = true;
            return Ok(AddOutcome::Updated);
        }

        self.keys
            .push(Key::new(name, mac, require_button))
            .map_err(|_| RegistryError::Full)?;
        Ok(AddOutcome::Added)
    }

    /// Remove the key with this address. Returns the removed key, if any.
    pub fn remove(&mut self, mac: MacAddress) -> Option<Key> {
        let index = self.position(mac)?;
        Some(self.keys.remove(index))
    }

    /// Set the enabled flag. Returns false if the address is not registered.
    pub fn set_enabled(&mut self, mac: MacAddress, enabled: bool) -> bool {
        match self.find_mut(mac) {
            Some(key) => {
                key.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn find(&self, mac: MacAddress) -> Option<&Key> {
        self.keys.iter().find(|k| k.mac_address == mac)
    }

    pub fn find_mut(&mut self, mac: MacAddress) -> Option<&mut Key> {
        self.keys.iter_mut().find(|k| k.mac_address == mac)
    }

    /// Read-only ordered view of every key.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Replace the whole collection (used when restoring from storage).
    ///
    /// Duplicate addresses in `keys` are collapsed, first occurrence wins.
    pub fn replace_all(&mut self, keys: KeyList) {
        self.keys.clear();
        for key in keys {
            if self.find(key.mac_address).is_some() {
                log::warn!("Dropping duplicate stored key {}", key.mac_address);
                continue;
            }
            // Capacity equals the source list's, so this cannot fail.
            let _ = self.keys.push(key);
        }
    }

    fn position(&self, mac: MacAddress) -> Option<usize> {
        self.keys.iter().position(|k| k.mac_address == mac)
    }
}

/// Clamp a display name to the stored capacity.
///
/// Quotes, backslashes and control characters become `_` so the JSON
/// encoding of a key never contains escape sequences.
pub fn sanitize_name(name: &str) -> KeyName {
    let mut out = KeyName::new();
    for c in name.chars() {
        let c = if c == '"' || c == '\\' || c.is_control() {
            '_'
        } else {
            c
        };
        if out.push(c).is_err() {
            log::warn!("Key name truncated to {} bytes", MAX_NAME_LEN);
            break;
        }
    }
    out
}
