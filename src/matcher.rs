/// Match engine: observed beacon address → registry lookup → gating decision.
///
/// Any registered key that is observed gets its `last_seen` stamped, enabled
/// or not. Only enabled keys authorize, and a key that requires a button
/// press only fires the event while the manual scan window is open (the
/// manual request itself is the confirming action).
use crate::mac::MacAddress;
use crate::notify::Detection;
use crate::registry::KeyRegistry;
use crate::schedule::Millis;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The address is not registered. Nothing changed.
    NoMatch,
    /// Registered but disabled. `last_seen` was updated.
    NotAuthorized,
    /// Registered and enabled. `last_seen` was updated; `fire` says whether
    /// the authorized-detection event should be raised.
    Authorized { detection: Detection, fire: bool },
}

/// Look `mac` up and apply the gating rules.
pub fn observe(
    registry: &mut KeyRegistry,
    mac: MacAddress,
    now: Millis,
    manual_active: bool,
) -> MatchOutcome {
    let Some(key) = registry.find_mut(mac) else {
        return MatchOutcome::NoMatch;
    };

    key.last_seen = now;

    if !key.enabled {
        return MatchOutcome::NotAuthorized;
    }

    MatchOutcome::Authorized {
        detection: Detection {
            name: key.name.clone(),
            mac: key.mac_address,
        },
        fire: !key.require_button || manual_active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOB: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x0B, 0x7E, 0x21]);
    const TAG: MacAddress = MacAddress([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
    const STRANGER: MacAddress = MacAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn registry() -> KeyRegistry {
        let mut reg = KeyRegistry::new();
        reg.add("Fob", FOB, false).unwrap();
        reg.add("Tag", TAG, true).unwrap();
        reg
    }

    #[test]
    fn unknown_address_no_match() {
        let mut reg = registry();
        let before = reg.keys().to_vec();
        assert_eq!(observe(&mut reg, STRANGER, 5_000, false), MatchOutcome::NoMatch);
        assert_eq!(reg.keys(), &before[..]);
    }

    #[test]
    fn enabled_key_without_button_fires() {
        let mut reg = registry();
        let outcome = observe(&mut reg, FOB, 5_000, false);
        match outcome {
            MatchOutcome::Authorized { detection, fire } => {
                assert!(fire);
                assert_eq!(detection.name.as_str(), "Fob");
                assert_eq!(detection.mac, FOB);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(reg.find(FOB).unwrap().last_seen, 5_000);
    }

    #[test]
    fn button_key_outside_manual_window_suppressed() {
        let mut reg = registry();
        let outcome = observe(&mut reg, TAG, 7_000, false);
        assert!(matches!(outcome, MatchOutcome::Authorized { fire: false, .. }));
        assert_eq!(reg.find(TAG).unwrap().last_seen, 7_000);
    }

    #[test]
    fn button_key_inside_manual_window_fires() {
        let mut reg = registry();
        let outcome = observe(&mut reg, TAG, 7_000, true);
        assert!(matches!(outcome, MatchOutcome::Authorized { fire: true, .. }));
    }

    #[test]
    fn disabled_key_stamps_last_seen_only() {
        let mut reg = registry();
        reg.set_enabled(FOB, false);
        let outcome = observe(&mut reg, FOB, 9_000, true);
        assert_eq!(outcome, MatchOutcome::NotAuthorized);
        assert_eq!(reg.find(FOB).unwrap().last_seen, 9_000);
    }

    #[test]
    fn repeated_observation_updates_timestamp() {
        let mut reg = registry();
        observe(&mut reg, FOB, 1_000, false);
        observe(&mut reg, FOB, 1_250, false);
        assert_eq!(reg.find(FOB).unwrap().last_seen, 1_250);
        assert_eq!(reg.find(TAG).unwrap().last_seen, 0);
    }
}
