/// Derived registry summaries pushed to external observers.
///
/// Three independent outputs, each replacing its previous value:
/// - key count (numeric)
/// - full key listing (JSON array, field order `name`, `mac_address`,
///   `enabled`, `require_button`, `last_seen`)
/// - name of the last detected enabled key
///
/// The listing is the same JSON the registry blob stores, so export tooling
/// can feed it straight back through [`parse_key_list`].
use crate::registry::{Key, KeyList};

/// Receiver for registry summaries (display, status endpoint, log...).
///
/// Every method defaults to a no-op so a sink only implements the outputs it
/// actually has.
pub trait SummarySink {
    fn publish_key_count(&mut self, _count: usize) {}
    fn publish_key_list(&mut self, _json: &str) {}
    fn publish_last_detected(&mut self, _name: &str) {}
}

/// A device without any summary outputs.
impl SummarySink for () {}

impl<T: SummarySink + ?Sized> SummarySink for &mut T {
    fn publish_key_count(&mut self, count: usize) {
        (**self).publish_key_count(count);
    }

    fn publish_key_list(&mut self, json: &str) {
        (**self).publish_key_list(json);
    }

    fn publish_last_detected(&mut self, name: &str) {
        (**self).publish_last_detected(name);
    }
}

/// Serialize the key listing into `buf`. Returns the number of bytes written.
///
/// An empty registry renders as `[]`.
pub fn render_key_list(keys: &[Key], buf: &mut [u8]) -> Result<usize, serde_json_core::ser::Error> {
    serde_json_core::to_slice(&keys, buf)
}

/// Parse a key listing produced by [`render_key_list`].
pub fn parse_key_list(json: &[u8]) -> Result<KeyList, serde_json_core::de::Error> {
    serde_json_core::from_slice::<KeyList>(json).map(|(keys, _)| keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddress;

    fn sample() -> KeyList {
        let mut keys = KeyList::new();
        let fob_mac = MacAddress([0xA4, 0xC1, 0x38, 0x0B, 0x7E, 0x21]);
        let mut fob = Key::new("Front door", fob_mac, false);
        fob.last_seen = 65_000;
        keys.push(fob).unwrap();
        let mut tag = Key::new("Garage", MacAddress([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]), true);
        tag.enabled = false;
        keys.push(tag).unwrap();
        keys
    }

    #[test]
    fn empty_listing_is_valid_json_array() {
        let mut buf = [0u8; 16];
        let len = render_key_list(&[], &mut buf).unwrap();
        assert_eq!(&buf[..len], b"[]");
        assert!(parse_key_list(&buf[..len]).unwrap().is_empty());
    }

    #[test]
    fn listing_field_order() {
        let keys = sample();
        let mut buf = [0u8; 512];
        let len = render_key_list(&keys, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(
            json,
            concat!(
                r#"[{"name":"Front door","mac_address":"A4:C1:38:0B:7E:21","#,
                r#""enabled":true,"require_button":false,"last_seen":65000},"#,
                r#"{"name":"Garage","mac_address":"DE:AD:BE:EF:00:01","#,
                r#""enabled":false,"require_button":true,"last_seen":0}]"#
            )
        );
    }

    #[test]
    fn listing_reimports_equivalent_registry() {
        let keys = sample();
        let mut buf = [0u8; 512];
        let len = render_key_list(&keys, &mut buf).unwrap();
        let parsed = parse_key_list(&buf[..len]).unwrap();
        assert_eq!(parsed, keys);
    }

    #[test]
    fn listing_too_large_for_buffer_errors() {
        let keys = sample();
        let mut buf = [0u8; 32];
        assert!(render_key_list(&keys, &mut buf).is_err());
    }

    #[test]
    fn parse_rejects_bad_mac() {
        let json = concat!(
            r#"[{"name":"x","mac_address":"zz","#,
            r#""enabled":true,"require_button":false,"last_seen":0}]"#
        );
        assert!(parse_key_list(json.as_bytes()).is_err());
    }
}
