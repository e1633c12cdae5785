//! keywarden — ESP-IDF std firmware
//!
//! Thread-based implementation using FreeRTOS threads and std::sync::mpsc
//! channels. Feature-equivalent to the no_std Embassy firmware but uses
//! ESP-IDF services (NimBLE via esp32-nimble, NVS for the key registry).

mod buzzer;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::task::block_on;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::sys::EspError;

use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{BLEAdvertisementData, BLEDevice, BLEScan, NimbleProperties};

use keywarden::notify::Detection;
use keywarden::scanner::{ScanControl, ScanError};
use keywarden::storage::KeyStore;
use keywarden::summary::SummarySink;
use keywarden::{board, comm, defaults, protocol};
use keywarden::{KeyManager, MacAddress, ManagerConfig};

use comm::LineReader;
use protocol::{DeviceMessage, HostCommand, MsgBuffer, MAX_MSG_LEN, VERSION};

// ── Shared state ─────────────────────────────────────────────────────

/// Set by the manager thread's scheduler, polled by the BLE scan thread.
static SCAN_ENABLED: AtomicBool = AtomicBool::new(false);
static BLE_CLIENTS: AtomicU8 = AtomicU8::new(0);

/// Boot time — captured once in main, used for uptime calculation.
static BOOT_INSTANT: OnceLock<Instant> = OnceLock::new();

fn uptime_ms() -> u64 {
    BOOT_INSTANT
        .get()
        .map(|boot| boot.elapsed().as_millis() as u64)
        .unwrap_or(0)
}

/// One BLE scan round; the scan thread re-checks `SCAN_ENABLED` between rounds.
const SCAN_ROUND_MS: i32 = 1000;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Longest the manager thread waits on scan reports before checking for
/// commands again.
const COMMAND_POLL: Duration = Duration::from_millis(50);

// ── Key manager collaborators ────────────────────────────────────────

/// Scan control backed by the `SCAN_ENABLED` flag.
struct ThreadRadio;

impl ScanControl for ThreadRadio {
    fn start_scan(&mut self) -> Result<(), ScanError> {
        SCAN_ENABLED.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), ScanError> {
        SCAN_ENABLED.store(false, Ordering::Relaxed);
        Ok(())
    }
}

/// Registry blob under one NVS key.
struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl KeyStore for NvsStore {
    type Error = EspError;

    fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, EspError> {
        Ok(self.nvs.get_blob(defaults::NVS_KEY, buf)?.map(<[u8]>::len))
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), EspError> {
        self.nvs.set_blob(defaults::NVS_KEY, blob)
    }
}

struct LogSummary;

impl SummarySink for LogSummary {
    fn publish_key_count(&mut self, count: usize) {
        log::info!("Registered keys: {}", count);
    }

    fn publish_key_list(&mut self, json: &str) {
        log::debug!("Keys: {}", json);
    }

    fn publish_last_detected(&mut self, name: &str) {
        log::info!("Last detected: {}", name);
    }
}

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    let _ = BOOT_INSTANT.set(Instant::now());

    log::info!("keywarden v{} starting on {} (std)", VERSION, board::BOARD_NAME);

    // ── Peripherals ──────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let store = NvsStore {
        nvs: EspNvs::new(nvs_partition, defaults::NVS_NAMESPACE, true)?,
    };

    // Hold power on (M5StickC Plus2)
    #[cfg(feature = "m5stickc")]
    let _power_hold = {
        use esp_idf_svc::hal::gpio::PinDriver;
        let mut p = PinDriver::output(peripherals.pins.gpio4)?;
        p.set_high()?;
        p
    };

    // ── Channels ─────────────────────────────────────────────────────

    let (obs_tx, obs_rx) = mpsc::sync_channel::<MacAddress>(16);
    let (cmd_tx, cmd_rx) = mpsc::sync_channel::<HostCommand>(4);
    let (output_tx, output_rx) = mpsc::sync_channel::<MsgBuffer>(8);
    let (ble_output_tx, ble_output_rx) = mpsc::sync_channel::<MsgBuffer>(4);
    let (buzzer_tx, buzzer_rx) = mpsc::sync_channel::<()>(1);

    // ── Buzzer thread ────────────────────────────────────────────────

    {
        let ledc_timer = peripherals.ledc.timer0;
        let ledc_channel = peripherals.ledc.channel0;
        #[cfg(feature = "m5stickc")]
        let buzzer_pin = peripherals.pins.gpio2;
        #[cfg(not(feature = "m5stickc"))]
        let buzzer_pin = peripherals.pins.gpio3;
        thread::Builder::new()
            .name("buzzer".into())
            .stack_size(2048)
            .spawn(move || {
                buzzer::tone_thread(buzzer_rx, ledc_timer, ledc_channel, buzzer_pin);
            })?;
        log::info!("Buzzer thread spawned");
    }

    // ── Manager thread ───────────────────────────────────────────────

    let manager_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("keys".into())
        .stack_size(12 * 1024)
        .spawn(move || {
            manager_thread(store, obs_rx, cmd_rx, manager_output_tx, buzzer_tx);
        })?;
    log::info!("Manager thread spawned");

    // ── Output thread ────────────────────────────────────────────────

    thread::Builder::new()
        .name("output".into())
        .stack_size(4096)
        .spawn(move || {
            output_thread(output_rx, ble_output_tx);
        })?;

    // ── Status thread ────────────────────────────────────────────────

    let status_cmd_tx = cmd_tx.clone();
    thread::Builder::new()
        .name("status".into())
        .stack_size(2048)
        .spawn(move || {
            status_thread(status_cmd_tx);
        })?;

    log::info!(
        "Build target: {}",
        if cfg!(feature = "xiao") {
            "xiao (ESP32-S3)"
        } else if cfg!(feature = "m5stickc") {
            "m5stickc (ESP32)"
        } else {
            "unknown"
        }
    );

    // ── BLE (NimBLE) — runs on main thread ───────────────────────────

    ble_main(obs_tx, cmd_tx, output_tx, ble_output_rx)
}

/// Serialize a message onto the output channel. Drops it if the channel is
/// full.
fn send_message(output_tx: &SyncSender<MsgBuffer>, msg: &DeviceMessage<'_>) {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    if let Some(len) = comm::serialize_message(msg, &mut buf) {
        buf.truncate(len);
        let _ = output_tx.try_send(buf);
    }
}

// ── Manager thread ───────────────────────────────────────────────────

/// Sole owner of the key manager. Host commands and scan reports arrive on
/// separate channels; pending commands are applied before every wait on scan
/// reports, and the scheduler is ticked every `TICK_INTERVAL_MS` in between.
fn manager_thread(
    store: NvsStore,
    obs_rx: Receiver<MacAddress>,
    cmd_rx: Receiver<HostCommand>,
    output_tx: SyncSender<MsgBuffer>,
    buzzer_tx: SyncSender<()>,
) {
    let beep = |_: &Detection| {
        let _ = buzzer_tx.try_send(());
    };
    let report = |d: &Detection| {
        send_message(
            &output_tx,
            &DeviceMessage::Detected {
                name: d.name.as_str(),
                mac: d.mac,
                ts: uptime_ms(),
            },
        );
    };

    let config = ManagerConfig::default();
    let mut manager = match KeyManager::new(config, ThreadRadio, store, LogSummary) {
        Ok(manager) => manager,
        Err(e) => {
            log::error!("Key manager config rejected: {}", e);
            return;
        }
    };
    for callback in [&beep as &dyn Fn(&Detection), &report] {
        if let Err(e) = manager.register_on_authorized_key_detected(callback) {
            log::warn!("Detection subscriber not registered: {}", e);
        }
    }

    manager.setup();
    manager.dump_config();

    let tick = Duration::from_millis(defaults::TICK_INTERVAL_MS);
    let mut next_tick = Instant::now();

    loop {
        loop {
            match cmd_rx.try_recv() {
                Ok(cmd) => comm::handle_command(&cmd, &mut manager, uptime_ms(), |msg| {
                    send_message(&output_tx, msg)
                }),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::error!("Command channel closed");
                    return;
                }
            }
        }

        let timeout = next_tick
            .saturating_duration_since(Instant::now())
            .min(COMMAND_POLL);
        match obs_rx.recv_timeout(timeout) {
            Ok(mac) => {
                manager.on_scan_report(mac, uptime_ms());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("Scan report channel closed");
                return;
            }
        }

        if Instant::now() >= next_tick {
            manager.tick(uptime_ms());
            next_tick = Instant::now() + tick;
        }
    }
}

// ── Output thread ────────────────────────────────────────────────────

fn output_thread(output_rx: Receiver<MsgBuffer>, ble_output_tx: SyncSender<MsgBuffer>) {
    while let Ok(msg) = output_rx.recv() {
        let _ = ble_output_tx.try_send(msg.clone());

        if let Ok(s) = std::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

// ── Status thread ────────────────────────────────────────────────────

/// Asks the manager thread for a live status report every `STATUS_INTERVAL`.
/// A full command queue skips the report rather than waiting.
fn status_thread(cmd_tx: SyncSender<HostCommand>) {
    loop {
        thread::sleep(STATUS_INTERVAL);
        match cmd_tx.try_send(HostCommand::GetStatus) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::debug!("Command queue full, status skipped"),
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

// ── BLE (NimBLE) main loop ───────────────────────────────────────────

fn ble_main(
    obs_tx: SyncSender<MacAddress>,
    cmd_tx: SyncSender<HostCommand>,
    output_tx: SyncSender<MsgBuffer>,
    ble_output_rx: Receiver<MsgBuffer>,
) -> anyhow::Result<()> {
    let ble_device = BLEDevice::take();
    let server = ble_device.get_server();

    // Track connections — NimBLE auto-restarts advertising on disconnect
    server.on_connect(|_server, desc| {
        log::info!("BLE client connected: {}", desc.address());
        BLE_CLIENTS.fetch_add(1, Ordering::Relaxed);
    });
    server.on_disconnect(|desc, _reason| {
        log::info!("BLE client disconnected: {}", desc.address());
        BLE_CLIENTS.fetch_sub(1, Ordering::Relaxed);
    });

    let service_uuid = BleUuid::from_uuid128_string(comm::ble_uuids::SERVICE)
        .map_err(|e| anyhow!("invalid service UUID: {:?}", e))?;
    let tx_uuid = BleUuid::from_uuid128_string(comm::ble_uuids::TX_CHAR)
        .map_err(|e| anyhow!("invalid TX UUID: {:?}", e))?;
    let rx_uuid = BleUuid::from_uuid128_string(comm::ble_uuids::RX_CHAR)
        .map_err(|e| anyhow!("invalid RX UUID: {:?}", e))?;

    let service = server.create_service(service_uuid);
    let tx_char = service.lock().create_characteristic(tx_uuid, NimbleProperties::NOTIFY);
    let rx_char = service.lock().create_characteristic(rx_uuid, NimbleProperties::WRITE);

    // RX write handler — parse incoming NDJSON commands
    let mut line_reader = LineReader::new();
    rx_char.lock().on_write(move |args| {
        for &byte in args.recv_data() {
            if let Some(line) = line_reader.feed(byte) {
                match comm::parse_command(line) {
                    Ok(cmd) => {
                        if cmd_tx.try_send(cmd).is_err() {
                            log::warn!("Command queue full, dropping");
                        }
                    }
                    Err(e) => {
                        log::warn!("Rejected command: {}", e);
                        send_message(&output_tx, &e.ack());
                    }
                }
            }
        }
    });

    let mut adv_data = BLEAdvertisementData::new();
    adv_data.name(comm::BLE_ADV_NAME).add_service_uuid(service_uuid);
    ble_device
        .get_advertising()
        .lock()
        .set_data(&mut adv_data)
        .map_err(|e| anyhow!("BLE advertising data failed: {:?}", e))?;
    ble_device
        .get_advertising()
        .lock()
        .start()
        .map_err(|e| anyhow!("BLE advertising start failed: {:?}", e))?;
    log::info!("BLE advertising as '{}'", comm::BLE_ADV_NAME);

    thread::Builder::new()
        .name("blescan".into())
        .stack_size(4096)
        .spawn(move || {
            ble_scan_thread(obs_tx);
        })?;
    log::info!("BLE scan thread spawned");

    // TX notify loop — read from ble_output_rx, notify connected clients
    loop {
        match ble_output_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(msg) => {
                if BLE_CLIENTS.load(Ordering::Relaxed) == 0 {
                    continue;
                }
                for chunk in msg.chunks(comm::BLE_MAX_NOTIFY) {
                    let mut padded = [b'\n'; 20];
                    padded[..chunk.len()].copy_from_slice(chunk);
                    tx_char.lock().set_value(&padded).notify();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("BLE output channel disconnected"));
            }
        }
    }
}

// ── BLE scan thread ──────────────────────────────────────────────────

/// Runs short scan rounds while the scheduler has scanning enabled and
/// forwards every advertiser address to the manager thread. Reports are
/// dropped when the queue is full; commands travel on their own channel.
fn ble_scan_thread(obs_tx: SyncSender<MacAddress>) {
    let ble_device = BLEDevice::take();
    let mut scan = BLEScan::new();
    scan.active_scan(false).interval(100).window(99);

    loop {
        if !SCAN_ENABLED.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100));
            continue;
        }

        let result = block_on(scan.start(ble_device, SCAN_ROUND_MS, |device, _data| {
            let mac = MacAddress::new(device.addr().as_be_bytes());
            let _ = obs_tx.try_send(mac);
            None::<()>
        }));
        if let Err(e) = result {
            log::warn!("BLE scan round failed: {:?}", e);
            thread::sleep(Duration::from_secs(1));
        }
    }
}
