/// Bluetooth device address — the identity of a key.
///
/// Always rendered in canonical form `XX:XX:XX:XX:XX:XX` (uppercase hex,
/// colon separated). Parsing is case-insensitive and also accepts `-`
/// separators, so `aa-bb-cc-dd-ee-ff` and `AA:BB:CC:DD:EE:FF` name the same key.
use core::fmt;

use serde::de::{self, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Maximum length for MAC address strings ("AA:BB:CC:DD:EE:FF")
pub type MacString = heapless::String<17>;

/// Why a MAC address string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MacParseError {
    #[error("expected 6 octets, found {0}")]
    OctetCount(usize),
    #[error("octet {index} is not two hex digits")]
    InvalidOctet { index: usize },
    #[error("mixed ':' and '-' separators")]
    MixedSeparators,
}

/// A 6-byte hardware address, most significant octet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Parse a textual address into canonical form.
    pub fn parse(text: &str) -> Result<Self, MacParseError> {
        let text = text.trim();
        let sep = if text.contains(':') { ':' } else { '-' };
        if sep == ':' && text.contains('-') {
            return Err(MacParseError::MixedSeparators);
        }

        let mut octets = [0u8; 6];
        let mut count = 0;
        for (index, part) in text.split(sep).enumerate() {
            if index >= 6 {
                count = index + 1;
                continue;
            }
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(MacParseError::InvalidOctet { index });
            }
            octets[index] =
                u8::from_str_radix(part, 16).map_err(|_| MacParseError::InvalidOctet { index })?;
            count = index + 1;
        }

        if count != 6 {
            return Err(MacParseError::OctetCount(count));
        }
        Ok(Self(octets))
    }

    /// Canonical string form in a fixed-capacity buffer.
    pub fn to_mac_string(&self) -> MacString {
        use core::fmt::Write;
        let mut buf = MacString::new();
        let _ = write!(buf, "{self}");
        buf
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl core::str::FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_mac_string())
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MacVisitor;

        impl Visitor<'_> for MacVisitor {
            type Value = MacAddress;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a MAC address like AA:BB:CC:DD:EE:FF")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MacAddress, E> {
                MacAddress::parse(v).map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_str(MacVisitor)
    }
}
