/// Key manager facade: one owner for the registry, scheduler, storage,
/// summaries and detection subscribers.
///
/// Every public mutation runs as one logical step: registry change, then a
/// persistence write, then a summary refresh. A failed write leaves the
/// in-memory registry authoritative and is reported as [`Error::Storage`].
///
/// Callers that receive ticks and observations on different execution
/// contexts must funnel them through a single owner (both firmwares run the
/// manager inside one actor task).
use crate::config::ManagerConfig;
use crate::defaults::MAX_BLOB_LEN;
use crate::error::Error;
use crate::mac::MacAddress;
use crate::matcher::{self, MatchOutcome};
use crate::notify::{DetectionCallback, EventNotifier};
use crate::registry::{AddOutcome, Key, KeyRegistry};
use crate::scanner::{ScanControl, SightingFilter};
use crate::schedule::{Millis, ScanPhase, ScanScheduler};
use crate::storage::{decode_keys, encode_keys, KeyStore, StoreError};
use crate::summary::{render_key_list, SummarySink};

pub struct KeyManager<'a, S, R, P> {
    config: ManagerConfig,
    registry: KeyRegistry,
    scheduler: ScanScheduler<R>,
    store: S,
    sink: P,
    notifier: EventNotifier<'a>,
    sightings: SightingFilter,
    /// Shared buffer for the persisted blob and the rendered listing.
    scratch: [u8; MAX_BLOB_LEN],
}

impl<'a, S, R, P> KeyManager<'a, S, R, P>
where
    S: KeyStore,
    R: ScanControl,
    P: SummarySink,
{
    pub fn new(config: ManagerConfig, radio: R, store: S, sink: P) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            registry: KeyRegistry::new(),
            scheduler: ScanScheduler::new(
                radio,
                Millis::from(config.scan_interval_ms),
                Millis::from(config.scan_duration_ms),
            ),
            store,
            sink,
            notifier: EventNotifier::new(),
            sightings: SightingFilter::new(),
            scratch: [0; MAX_BLOB_LEN],
        })
    }

    /// Restore the stored registry (if configured) and publish the initial
    /// summaries. Call once before the first tick.
    pub fn setup(&mut self) {
        if self.config.restore_on_startup {
            self.restore();
        }
        self.refresh_summary();
    }

    /// Drive the scan scheduler.
    pub fn tick(&mut self, now: Millis) {
        let was_scanning = self.scheduler.is_scanning();
        let window = self.scheduler.state().last_scan_start_time;
        self.scheduler.tick(now);
        let opened = self.scheduler.state().last_scan_start_time != window;
        if self.scheduler.is_scanning() && (opened || !was_scanning) {
            self.sightings.reset();
        }
    }

    /// Handle one advertising report from the scan subsystem.
    ///
    /// Repeat reports of a registered key within one scan window are dropped
    /// before they reach the matcher, so a beacon costs at most one registry
    /// write per window. Returns what [`Self::on_device_observed`] would.
    pub fn on_scan_report(&mut self, mac: MacAddress, now: Millis) -> bool {
        if self.sightings.contains(mac) {
            return self.registry.find(mac).is_some_and(|key| key.enabled);
        }
        let handled = self.on_device_observed(mac, now);
        if self.is_registered(mac) {
            self.sightings.note(mac);
        }
        handled
    }

    /// Handle one advertiser address reported by the scan subsystem.
    ///
    /// Returns true when the address belongs to an enabled key, meaning the
    /// caller may suppress its own logging of it.
    pub fn on_device_observed(&mut self, mac: MacAddress, now: Millis) -> bool {
        let manual = self.scheduler.manual_active_at(now);
        match matcher::observe(&mut self.registry, mac, now, manual) {
            MatchOutcome::NoMatch => false,
            MatchOutcome::NotAuthorized => {
                log::debug!("Disabled key {} seen", mac);
                let _ = self.persist();
                false
            }
            MatchOutcome::Authorized { detection, fire } => {
                self.sink.publish_last_detected(detection.name.as_str());
                if fire {
                    log::info!("Authorized key detected: {} ({})", detection.name, detection.mac);
                    self.notifier.fire(&detection);
                } else {
                    log::info!(
                        "Key {} present, waiting for button confirmation",
                        detection.name
                    );
                }
                let _ = self.commit();
                true
            }
        }
    }

    // ── Registry operations ─────────────────────────────────────────

    pub fn add_key(
        &mut self,
        name: &str,
        mac: &str,
        require_button: bool,
    ) -> Result<AddOutcome, Error> {
        let mac = MacAddress::parse(mac)?;
        let outcome = self.registry.add(name, mac, require_button)?;
        match outcome {
            AddOutcome::Added => log::info!("Added key {} ({})", name, mac),
            AddOutcome::Updated => log::info!("Updated key {} ({})", name, mac),
        }
        self.commit()?;
        Ok(outcome)
    }

    /// Returns `Ok(false)` when no key has this address; nothing is written.
    pub fn remove_key(&mut self, mac: &str) -> Result<bool, Error> {
        let mac = MacAddress::parse(mac)?;
        let Some(key) = self.registry.remove(mac) else {
            log::warn!("Remove: key {} not found", mac);
            return Ok(false);
        };
        log::info!("Removed key {} ({})", key.name, mac);
        self.commit()?;
        Ok(true)
    }

    /// Returns `Ok(false)` when no key has this address; nothing is written.
    pub fn set_key_status(&mut self, mac: &str, enabled: bool) -> Result<bool, Error> {
        let mac = MacAddress::parse(mac)?;
        if !self.registry.set_enabled(mac, enabled) {
            log::warn!("Set status: key {} not found", mac);
            return Ok(false);
        }
        log::info!(
            "Key {} {}",
            mac,
            if enabled { "enabled" } else { "disabled" }
        );
        self.commit()?;
        Ok(true)
    }

    pub fn clear_all_keys(&mut self) -> Result<(), Error> {
        let count = self.registry.len();
        self.registry.clear();
        log::info!("Cleared {} keys", count);
        self.commit()
    }

    /// Ordered read-only view of the registry.
    pub fn get_keys(&self) -> &[Key] {
        self.registry.keys()
    }

    pub fn is_registered(&self, mac: MacAddress) -> bool {
        self.registry.find(mac).is_some()
    }

    // ── Scanning ────────────────────────────────────────────────────

    /// Open the manual window for `duration_ms` and scan immediately.
    pub fn start_scan_mode(&mut self, duration_ms: u32, now: Millis) {
        log::info!("Manual scan mode for {} ms", duration_ms);
        self.scheduler.start_scan_mode(Millis::from(duration_ms), now);
        self.sightings.reset();
    }

    pub fn stop_scan_mode(&mut self) {
        self.scheduler.stop_scan_mode();
    }

    pub fn is_scanning(&self) -> bool {
        self.scheduler.is_scanning()
    }

    pub fn scan_phase(&self) -> ScanPhase {
        self.scheduler.phase()
    }

    pub fn manual_mode_active(&self, now: Millis) -> bool {
        self.scheduler.manual_active_at(now)
    }

    // ── Subscribers ─────────────────────────────────────────────────

    pub fn register_on_authorized_key_detected(
        &mut self,
        callback: DetectionCallback<'a>,
    ) -> Result<(), Error> {
        self.notifier.subscribe(callback)?;
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn radio(&self) -> &R {
        self.scheduler.radio()
    }

    /// Log the configuration and every registered key.
    pub fn dump_config(&self) {
        log::info!("Key manager:");
        log::info!("  Scan interval: {} ms", self.config.scan_interval_ms);
        log::info!("  Scan duration: {} ms", self.config.scan_duration_ms);
        log::info!("  Restore on startup: {}", self.config.restore_on_startup);
        log::info!("  Subscribers: {}", self.notifier.len());
        log::info!("  Keys: {}", self.registry.len());
        for key in self.registry.keys() {
            log::info!(
                "    {} ({}) enabled={} require_button={} last_seen={}",
                key.name,
                key.mac_address,
                key.enabled,
                key.require_button,
                key.last_seen
            );
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn restore(&mut self) {
        let len = match self.store.load(&mut self.scratch) {
            Ok(Some(len)) => len,
            Ok(None) => {
                log::info!("No stored keys");
                return;
            }
            Err(e) => {
                log::warn!("Key store load failed: {:?}", e);
                return;
            }
        };

        match decode_keys(&self.scratch[..len]) {
            Ok(Some(keys)) => {
                self.registry.replace_all(keys);
                log::info!("Restored {} keys", self.registry.len());
            }
            Ok(None) => log::info!("No stored keys"),
            Err(e) => log::warn!("Stored keys unreadable, starting empty: {}", e),
        }
    }

    /// Persist, then publish summaries whether or not the write landed.
    fn commit(&mut self) -> Result<(), Error> {
        let saved = self.persist();
        self.refresh_summary();
        saved
    }

    fn persist(&mut self) -> Result<(), Error> {
        let len = encode_keys(self.registry.keys(), &mut self.scratch).map_err(|e| {
            log::warn!("Key encode failed: {}", e);
            Error::Storage(e)
        })?;
        self.store.save(&self.scratch[..len]).map_err(|e| {
            log::warn!("Key store save failed: {:?}", e);
            Error::Storage(StoreError::Backend)
        })
    }

    fn refresh_summary(&mut self) {
        self.sink.publish_key_count(self.registry.len());
        match render_key_list(self.registry.keys(), &mut self.scratch) {
            Ok(len) => match core::str::from_utf8(&self.scratch[..len]) {
                Ok(json) => self.sink.publish_key_list(json),
                Err(_) => log::warn!("Key listing is not UTF-8"),
            },
            Err(_) => log::warn!("Key listing does not fit the buffer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Detection;
    use crate::registry::RegistryError;
    use crate::scanner::ScanError;
    use crate::storage::MemoryStore;
    use std::cell::{Cell, RefCell};
    use std::string::{String, ToString};
    use std::vec::Vec;

    const FOB: &str = "A4:C1:38:0B:7E:21";
    const TAG: &str = "DE:AD:BE:EF:00:01";

    fn mac(text: &str) -> MacAddress {
        MacAddress::parse(text).unwrap()
    }

    #[derive(Default)]
    struct RecordingRadio {
        starts: u32,
        stops: u32,
    }

    impl ScanControl for RecordingRadio {
        fn start_scan(&mut self) -> Result<(), ScanError> {
            self.starts += 1;
            Ok(())
        }

        fn stop_scan(&mut self) -> Result<(), ScanError> {
            self.stops += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        count: Option<usize>,
        list: String,
        list_pushes: u32,
        detected: Vec<String>,
    }

    impl SummarySink for RecordingSink {
        fn publish_key_count(&mut self, count: usize) {
            self.count = Some(count);
        }

        fn publish_key_list(&mut self, json: &str) {
            self.list = json.to_string();
            self.list_pushes += 1;
        }

        fn publish_last_detected(&mut self, name: &str) {
            self.detected.push(name.to_string());
        }
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    impl KeyStore for BrokenStore {
        type Error = StoreError;

        fn load(&mut self, _buf: &mut [u8]) -> Result<Option<usize>, StoreError> {
            Err(StoreError::Backend)
        }

        fn save(&mut self, _blob: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Backend)
        }
    }

    type TestManager<'a> = KeyManager<'a, MemoryStore, RecordingRadio, RecordingSink>;

    fn manager<'a>() -> TestManager<'a> {
        manager_with(MemoryStore::new())
    }

    fn manager_with<'a>(store: MemoryStore) -> TestManager<'a> {
        let mut m = KeyManager::new(
            ManagerConfig::default(),
            RecordingRadio::default(),
            store,
            RecordingSink::default(),
        )
        .unwrap();
        m.setup();
        m
    }

    // ── Setup ───────────────────────────────────────────────────────

    #[test]
    fn setup_publishes_empty_summary() {
        let m = manager();
        assert_eq!(m.sink().count, Some(0));
        assert_eq!(m.sink().list, "[]");
        assert!(m.get_keys().is_empty());
        assert_eq!(m.store().save_count(), 0);
    }

    #[test]
    fn invalid_config_rejected() {
        let result = KeyManager::new(
            ManagerConfig::new().with_scan_duration(0),
            RecordingRadio::default(),
            MemoryStore::new(),
            (),
        );
        assert!(matches!(result, Err(ref e) if e.is_validation()));
    }

    #[test]
    fn restore_round_trip() {
        let mut first = manager();
        first.add_key("Front door", FOB, false).unwrap();
        first.add_key("Garage", TAG, true).unwrap();
        first.set_key_status(TAG, false).unwrap();
        first.on_device_observed(mac(FOB), 61_000);

        let blob = first.store().blob().unwrap().to_vec();
        let second = manager_with(MemoryStore::with_blob(&blob).unwrap());

        assert_eq!(second.get_keys(), first.get_keys());
        assert_eq!(second.get_keys()[0].last_seen, 61_000);
        assert!(!second.get_keys()[1].enabled);
        assert_eq!(second.sink().count, Some(2));
        assert_eq!(second.sink().list, first.sink().list);
    }

    #[test]
    fn restore_skipped_when_disabled() {
        let mut first = manager();
        first.add_key("Front door", FOB, false).unwrap();
        let blob = first.store().blob().unwrap().to_vec();

        let mut second = KeyManager::new(
            ManagerConfig::new().with_restore_on_startup(false),
            RecordingRadio::default(),
            MemoryStore::with_blob(&blob).unwrap(),
            RecordingSink::default(),
        )
        .unwrap();
        second.setup();
        assert!(second.get_keys().is_empty());
        assert_eq!(second.sink().count, Some(0));
    }

    #[test]
    fn unreadable_blob_starts_empty() {
        let blob = [b'K', b'W', 9, 2, 0, b'[', b']'];
        let m = manager_with(MemoryStore::with_blob(&blob).unwrap());
        assert!(m.get_keys().is_empty());
        assert_eq!(m.sink().list, "[]");
    }

    #[test]
    fn erased_flash_starts_empty() {
        let m = manager_with(MemoryStore::with_blob(&[0xFF; 64]).unwrap());
        assert!(m.get_keys().is_empty());
    }

    // ── Registry operations ─────────────────────────────────────────

    #[test]
    fn add_key_persists_and_publishes() {
        let mut m = manager();
        assert_eq!(m.add_key("Front door", FOB, false), Ok(AddOutcome::Added));
        assert_eq!(m.store().save_count(), 1);
        assert_eq!(m.sink().count, Some(1));
        assert!(m.sink().list.contains(r#""mac_address":"A4:C1:38:0B:7E:21""#));
    }

    #[test]
    fn add_normalizes_mac() {
        let mut m = manager();
        m.add_key("Fob", "a4-c1-38-0b-7e-21", false).unwrap();
        assert_eq!(m.get_keys()[0].mac_address.to_mac_string().as_str(), FOB);
        assert_eq!(m.add_key("Fob", FOB, false), Ok(AddOutcome::Updated));
        assert_eq!(m.get_keys().len(), 1);
    }

    #[test]
    fn add_existing_mac_updates_in_place() {
        let mut m = manager();
        m.add_key("Old", FOB, false).unwrap();
        m.add_key("Other", TAG, false).unwrap();
        m.set_key_status(FOB, false).unwrap();

        assert_eq!(m.add_key("New", FOB, true), Ok(AddOutcome::Updated));
        let keys = m.get_keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name.as_str(), "New");
        assert!(keys[0].require_button);
        assert!(keys[0].enabled);
        assert_eq!(keys[1].name.as_str(), "Other");
    }

    #[test]
    fn add_rejects_malformed_mac() {
        let mut m = manager();
        let err = m.add_key("Bad", "not-a-mac", false).unwrap_err();
        assert!(err.is_validation());
        assert!(m.get_keys().is_empty());
        assert_eq!(m.store().save_count(), 0);
    }

    #[test]
    fn add_to_full_registry_fails() {
        let mut m = manager();
        for i in 0..crate::defaults::MAX_KEYS as u8 {
            let text = MacAddress([0, 0, 0, 0, 0, i]).to_mac_string();
            m.add_key("k", &text, false).unwrap();
        }
        let saves = m.store().save_count();
        assert_eq!(
            m.add_key("extra", TAG, false),
            Err(Error::Registry(RegistryError::Full))
        );
        assert_eq!(m.store().save_count(), saves);
        assert_eq!(m.get_keys().len(), crate::defaults::MAX_KEYS);
    }

    #[test]
    fn remove_absent_key_has_no_side_effects() {
        let mut m = manager();
        m.add_key("Front door", FOB, false).unwrap();
        let saves = m.store().save_count();
        let pushes = m.sink().list_pushes;
        let before = m.get_keys().to_vec();

        assert_eq!(m.remove_key(TAG), Ok(false));
        assert_eq!(m.get_keys(), &before[..]);
        assert_eq!(m.store().save_count(), saves);
        assert_eq!(m.sink().list_pushes, pushes);
    }

    #[test]
    fn remove_existing_key() {
        let mut m = manager();
        m.add_key("Front door", FOB, false).unwrap();
        assert_eq!(m.remove_key(FOB), Ok(true));
        assert!(m.get_keys().is_empty());
        assert_eq!(m.sink().count, Some(0));
        assert_eq!(m.store().save_count(), 2);
    }

    #[test]
    fn set_status_on_absent_key_is_noop() {
        let mut m = manager();
        assert_eq!(m.set_key_status(FOB, false), Ok(false));
        assert_eq!(m.store().save_count(), 0);
    }

    #[test]
    fn clear_produces_empty_summary() {
        let mut m = manager();
        m.add_key("Front door", FOB, false).unwrap();
        m.add_key("Garage", TAG, true).unwrap();
        m.clear_all_keys().unwrap();
        assert!(m.get_keys().is_empty());
        assert_eq!(m.sink().count, Some(0));
        assert_eq!(m.sink().list, "[]");

        let blob = m.store().blob().unwrap().to_vec();
        let restored = manager_with(MemoryStore::with_blob(&blob).unwrap());
        assert!(restored.get_keys().is_empty());
    }

    #[test]
    fn save_failure_keeps_memory_authoritative() {
        let mut m = KeyManager::new(
            ManagerConfig::default(),
            RecordingRadio::default(),
            BrokenStore,
            RecordingSink::default(),
        )
        .unwrap();
        m.setup();
        assert!(m.get_keys().is_empty());

        let err = m.add_key("Front door", FOB, false).unwrap_err();
        assert_eq!(err, Error::Storage(StoreError::Backend));
        assert!(err.is_storage());
        assert_eq!(m.get_keys().len(), 1);
        assert_eq!(m.sink().count, Some(1));

        assert!(m.clear_all_keys().unwrap_err().is_storage());
        assert!(m.get_keys().is_empty());
        assert_eq!(m.sink().count, Some(0));
    }

    #[test]
    fn save_failure_does_not_block_detection() {
        let fired = Cell::new(0u32);
        let on_detect = |_: &Detection| fired.set(fired.get() + 1);
        let mut m = KeyManager::new(
            ManagerConfig::default(),
            RecordingRadio::default(),
            BrokenStore,
            RecordingSink::default(),
        )
        .unwrap();
        m.register_on_authorized_key_detected(&on_detect).unwrap();
        let _ = m.add_key("Front door", FOB, false);

        assert!(m.on_device_observed(mac(FOB), 2_000));
        assert_eq!(fired.get(), 1);
        assert_eq!(m.get_keys()[0].last_seen, 2_000);
    }

    // ── Observation ─────────────────────────────────────────────────

    #[test]
    fn unknown_address_ignored() {
        let fired = Cell::new(0u32);
        let on_detect = |_: &Detection| fired.set(fired.get() + 1);
        let mut m = manager();
        m.register_on_authorized_key_detected(&on_detect).unwrap();
        m.add_key("Front door", FOB, false).unwrap();
        let saves = m.store().save_count();

        assert!(!m.on_device_observed(mac(TAG), 1_000));
        assert_eq!(fired.get(), 0);
        assert_eq!(m.store().save_count(), saves);
        assert!(m.sink().detected.is_empty());
    }

    #[test]
    fn enabled_key_fires_and_persists() {
        let seen = RefCell::new(Vec::new());
        let on_detect = |d: &Detection| seen.borrow_mut().push(d.mac);
        let mut m = manager();
        m.register_on_authorized_key_detected(&on_detect).unwrap();
        m.add_key("Front door", FOB, false).unwrap();

        assert!(m.on_device_observed(mac(FOB), 2_000));
        assert_eq!(*seen.borrow(), [mac(FOB)]);
        assert_eq!(m.sink().detected, ["Front door"]);
        assert_eq!(m.get_keys()[0].last_seen, 2_000);
        assert_eq!(m.store().save_count(), 2);
        assert!(m.sink().list.contains(r#""last_seen":2000"#));
    }

    #[test]
    fn button_key_gated_by_manual_window() {
        let fired = Cell::new(0u32);
        let on_detect = |_: &Detection| fired.set(fired.get() + 1);
        let mut m = manager();
        m.register_on_authorized_key_detected(&on_detect).unwrap();
        m.add_key("Garage", TAG, true).unwrap();

        assert!(m.on_device_observed(mac(TAG), 3_000));
        assert_eq!(fired.get(), 0);
        assert_eq!(m.get_keys()[0].last_seen, 3_000);
        assert_eq!(m.sink().detected, ["Garage"]);

        m.start_scan_mode(10_000, 4_000);
        assert!(m.on_device_observed(mac(TAG), 5_000));
        assert_eq!(fired.get(), 1);

        // Window closed, even before the next tick clears the flag
        assert!(m.on_device_observed(mac(TAG), 14_001));
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn disabled_key_updates_last_seen_only() {
        let fired = Cell::new(0u32);
        let on_detect = |_: &Detection| fired.set(fired.get() + 1);
        let mut m = manager();
        m.register_on_authorized_key_detected(&on_detect).unwrap();
        m.add_key("Front door", FOB, false).unwrap();
        m.set_key_status(FOB, false).unwrap();
        let saves = m.store().save_count();
        let pushes = m.sink().list_pushes;

        assert!(!m.on_device_observed(mac(FOB), 7_000));
        assert_eq!(fired.get(), 0);
        assert!(m.sink().detected.is_empty());
        assert_eq!(m.get_keys()[0].last_seen, 7_000);
        assert_eq!(m.store().save_count(), saves + 1);
        assert_eq!(m.sink().list_pushes, pushes);
    }

    #[test]
    fn subscribers_fire_in_order() {
        let log = RefCell::new(Vec::new());
        let first = |_: &Detection| log.borrow_mut().push("first");
        let second = |_: &Detection| log.borrow_mut().push("second");
        let mut m = manager();
        m.register_on_authorized_key_detected(&first).unwrap();
        m.register_on_authorized_key_detected(&second).unwrap();
        m.add_key("Front door", FOB, false).unwrap();

        m.on_device_observed(mac(FOB), 1_000);
        assert_eq!(*log.borrow(), ["first", "second"]);
    }

    // ── Scan reports ────────────────────────────────────────────────

    #[test]
    fn repeat_reports_in_one_window_saved_once() {
        let fired = Cell::new(0u32);
        let on_detect = |_: &Detection| fired.set(fired.get() + 1);
        let mut m = manager();
        m.register_on_authorized_key_detected(&on_detect).unwrap();
        m.add_key("Front door", FOB, false).unwrap();
        let saves = m.store().save_count();

        // Advertising every 100 ms through a 5 s window
        m.tick(60_000);
        assert!(m.is_scanning());
        for i in 0..50 {
            assert!(m.on_scan_report(mac(FOB), 60_000 + i * 100));
        }
        assert_eq!(m.store().save_count(), saves + 1);
        assert_eq!(fired.get(), 1);
        assert_eq!(m.get_keys()[0].last_seen, 60_000);

        m.tick(65_000);
        m.tick(120_000);
        assert!(m.on_scan_report(mac(FOB), 120_100));
        assert_eq!(m.store().save_count(), saves + 2);
        assert_eq!(fired.get(), 2);
        assert_eq!(m.get_keys()[0].last_seen, 120_100);
    }

    #[test]
    fn unknown_reports_never_filtered() {
        let mut m = manager();
        m.tick(60_000);
        assert!(!m.on_scan_report(mac(TAG), 60_100));
        assert!(!m.is_registered(mac(TAG)));

        m.add_key("Garage", TAG, false).unwrap();
        assert!(m.is_registered(mac(TAG)));
        assert!(m.on_scan_report(mac(TAG), 60_200));
        assert_eq!(m.get_keys()[0].last_seen, 60_200);
    }

    #[test]
    fn manual_scan_reopens_filter() {
        let fired = Cell::new(0u32);
        let on_detect = |_: &Detection| fired.set(fired.get() + 1);
        let mut m = manager();
        m.register_on_authorized_key_detected(&on_detect).unwrap();
        m.add_key("Garage", TAG, true).unwrap();

        m.tick(60_000);
        assert!(m.on_scan_report(mac(TAG), 60_100));
        assert_eq!(fired.get(), 0);

        // Button pressed mid-window: the next report must get through
        m.start_scan_mode(10_000, 61_000);
        assert!(m.on_scan_report(mac(TAG), 61_100));
        assert_eq!(fired.get(), 1);
        assert!(m.on_scan_report(mac(TAG), 61_200));
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn disabled_key_repeat_reports_filtered() {
        let mut m = manager();
        m.add_key("Front door", FOB, false).unwrap();
        m.set_key_status(FOB, false).unwrap();
        let saves = m.store().save_count();

        m.tick(60_000);
        assert!(!m.on_scan_report(mac(FOB), 60_100));
        assert!(!m.on_scan_report(mac(FOB), 60_200));
        assert_eq!(m.store().save_count(), saves + 1);
    }

    #[test]
    fn commands_still_apply_during_report_flood() {
        let mut m = manager();
        m.add_key("Front door", FOB, false).unwrap();
        m.tick(60_000);
        for i in 0..200 {
            m.on_scan_report(mac(FOB), 60_000 + i * 10);
            if i == 100 {
                m.add_key("Garage", TAG, true).unwrap();
            }
        }
        assert_eq!(m.get_keys().len(), 2);
        assert_eq!(m.store().save_count(), 3);
    }

    // ── Scanning ────────────────────────────────────────────────────

    #[test]
    fn periodic_scan_through_facade() {
        let mut m = manager();
        m.tick(0);
        assert!(!m.is_scanning());
        m.tick(60_000);
        assert!(m.is_scanning());
        assert_eq!(m.radio().starts, 1);
        m.tick(65_000);
        assert_eq!(m.scan_phase(), ScanPhase::Idle);
        assert_eq!(m.radio().stops, 1);
    }

    #[test]
    fn manual_scan_starts_immediately() {
        let mut m = manager();
        m.tick(12_000);
        m.start_scan_mode(10_000, 12_000);
        assert!(m.is_scanning());
        assert!(m.manual_mode_active(12_000));
        assert_eq!(m.radio().starts, 1);

        m.stop_scan_mode();
        assert!(!m.manual_mode_active(12_500));
    }
}
