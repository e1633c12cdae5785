//! keywarden — BLE key manager firmware (Embassy, bare metal)
//!
//! Scans for authorized BLE beacons on a schedule, beeps when an enabled
//! key is detected, and accepts NDJSON key-management commands over a BLE
//! GATT service. The registry is journalled across the raw flash of the
//! `nvs` partition.

#![no_std]
#![no_main]

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

// Hardware-specific modules (binary crate only)
#[cfg(any(feature = "board-xiao", feature = "board-m5stickc"))]
mod buzzer;

// Re-export library modules so binary submodules (buzzer) can use crate::*
pub(crate) use keywarden::{board, comm, defaults, protocol, scanner};

use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker, Timer};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use esp_storage::FlashStorage;
use static_cell::StaticCell;

use trouble_host::prelude::*;

use comm::LineReader;
use keywarden::journal::FlashJournal;
use keywarden::notify::{Detection, DetectionCallback};
use keywarden::summary::SummarySink;
use keywarden::{KeyManager, MacAddress, ManagerConfig};
use protocol::{DeviceMessage, HostCommand, MsgBuffer, MAX_MSG_LEN, VERSION};
use scanner::{ScanControl, ScanError};

// ── BLE GATT server definition ──────────────────────────────────────
//
// Proc macros depend on trouble-host which is firmware-only. The UUID
// constants in comm::ble_uuids are the canonical source; proc macros
// require string literals.

#[gatt_service(uuid = "6b770001-5d2e-4f8a-9c31-0e7a4b2d9f15")]
struct KeywardenGattService {
    /// TX — command replies and detections, notify-only.
    /// Messages are chunked into BLE_MAX_NOTIFY-sized pieces.
    /// The companion accumulates until it sees '\n' (NDJSON delimiter).
    #[characteristic(uuid = "6b770002-5d2e-4f8a-9c31-0e7a4b2d9f15", notify)]
    tx: [u8; 20],

    /// RX — host commands, write-only.
    /// Companion sends NDJSON commands which are accumulated via LineReader.
    #[characteristic(uuid = "6b770003-5d2e-4f8a-9c31-0e7a4b2d9f15", write)]
    rx: [u8; 20],
}

#[gatt_server]
struct KeywardenServer {
    keywarden_service: KeywardenGattService,
}

// ── Channel type aliases ──────────────────────────────────────────────

type ObservationChannel = Channel<CriticalSectionRawMutex, MacAddress, 16>;
type OutputChannel = Channel<CriticalSectionRawMutex, MsgBuffer, 8>;
type BleOutputChannel = Channel<CriticalSectionRawMutex, MsgBuffer, 4>;
type CommandChannel = Channel<CriticalSectionRawMutex, HostCommand, 4>;

type KeyJournal = FlashJournal<FlashStorage<'static>>;
type Manager = KeyManager<'static, KeyJournal, SignalRadio, LogSummary>;

// ── Static channels and shared state ─────────────────────────────────

/// Advertiser addresses reported by the BLE runner while a scan is active
static OBS_CHANNEL: ObservationChannel = Channel::new();

/// Static channel for serialized output messages
static OUTPUT_CHANNEL: OutputChannel = Channel::new();

/// Static channel for host commands
static CMD_CHANNEL: CommandChannel = Channel::new();

/// Static channel for BLE output — serial task clones messages here
/// for the GATT server to send as notifications.
static BLE_OUTPUT_CHANNEL: BleOutputChannel = Channel::new();

/// Scan on/off requests from the scheduler to the BLE scanner future.
/// Only the latest value matters.
static SCAN_SIGNAL: Signal<CriticalSectionRawMutex, bool> = Signal::new();

/// One pending detection tone for the piezo task
pub(crate) static BUZZER_SIGNAL: Channel<CriticalSectionRawMutex, (), 1> = Channel::new();

/// How often the status task requests a status report
const STATUS_INTERVAL_SECS: u64 = 30;

// ── Collaborators for the key manager ───────────────────────────────

/// Scan control that hands start/stop requests to the BLE scanner future.
struct SignalRadio;

impl ScanControl for SignalRadio {
    fn start_scan(&mut self) -> Result<(), ScanError> {
        SCAN_SIGNAL.signal(true);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), ScanError> {
        SCAN_SIGNAL.signal(false);
        Ok(())
    }
}

/// Summaries go to the serial log.
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

// ── BLE scan event handler ───────────────────────────────────────────

/// EventHandler for BLE advertisement reports from trouble-host.
///
/// Forwards each advertiser address to the manager task. Called
/// synchronously from the runner — must not block.
struct ScanEventHandler;

impl EventHandler for ScanEventHandler {
    fn on_adv_reports(&self, mut it: LeAdvReportsIter<'_>) {
        while let Some(Ok(report)) = it.next() {
            if let Some(mac) = scanner::address_from_le(report.addr.raw()) {
                let _ = OBS_CHANNEL.try_send(mac);
            }
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Heap for the BLE controller
    esp_alloc::heap_allocator!(size: 64 * 1024);

    // Start the RTOS — requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!("keywarden v{} starting on {}", VERSION, board::BOARD_NAME);

    // Hold power on (M5StickC Plus2 needs GPIO4 HIGH to stay powered)
    #[cfg(feature = "board-m5stickc")]
    let _power_hold = esp_hal::gpio::Output::new(
        peripherals.GPIO4,
        esp_hal::gpio::Level::High,
        esp_hal::gpio::OutputConfig::default(),
    );

    let store = match KeyJournal::new(
        FlashStorage::new(peripherals.FLASH),
        board::STORAGE_FLASH_OFFSET,
        board::STORAGE_SECTORS,
    ) {
        Ok(store) => store,
        Err(e) => {
            log::error!("Key journal unavailable: {}", e);
            return;
        }
    };

    // The manager carries its blob buffer, so it lives in static memory
    static MANAGER: StaticCell<Manager> = StaticCell::new();
    let manager = match KeyManager::new(ManagerConfig::default(), SignalRadio, store, LogSummary) {
        Ok(manager) => MANAGER.init(manager),
        Err(e) => {
            log::error!("Key manager config rejected: {}", e);
            return;
        }
    };
    let subscribers: [DetectionCallback<'static>; 2] = [&beep_on_detection, &report_detection];
    for callback in subscribers {
        if let Err(e) = manager.register_on_authorized_key_detected(callback) {
            log::warn!("Detection subscriber not registered: {}", e);
        }
    }

    spawner.must_spawn(manager_task(manager));
    spawner.must_spawn(output_serial_task());
    spawner.must_spawn(status_task());

    #[cfg(feature = "board-m5stickc")]
    spawner.must_spawn(buzzer::tone_task(peripherals.LEDC, peripherals.GPIO2));
    #[cfg(feature = "board-xiao")]
    spawner.must_spawn(buzzer::tone_task(peripherals.LEDC, peripherals.GPIO3));

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

    // ── BLE radio initialization ───────────────────────────────────────

    let connector =
        match esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default()) {
            Ok(connector) => connector,
            Err(e) => {
                log::error!("BLE connector init failed: {:?}", e);
                return;
            }
        };

    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 2>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xff, 0x4b, 0x57, 0x11, 0xe4, 0xc2]);

    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        mut peripheral,
        central,
        mut runner,
        ..
    } = stack.build();

    log::info!("BLE radio initialized");

    let server = match KeywardenServer::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: comm::BLE_ADV_NAME,
        appearance: &appearance::UNKNOWN,
    })) {
        Ok(server) => server,
        Err(e) => {
            log::error!("GATT server init failed: {:?}", e);
            return;
        }
    };

    let scan_handler = ScanEventHandler;

    // ── BLE orchestration ──────────────────────────────────────────────
    //
    // Three concurrent futures via join3:
    //   1. BLE stack runner (drives HCI, delivers scan reports to handler)
    //   2. BLE scanner (opens/closes scan sessions on SCAN_SIGNAL)
    //   3. GATT server (advertise, accept connections, send notifications)

    let _ = embassy_futures::join::join3(
        // ── Runner: drives the BLE stack ────────────────────────────────
        async {
            loop {
                if let Err(e) = runner.run_with_handler(&scan_handler).await {
                    log::error!("BLE runner error: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        // ── Scanner: one session per scheduled scan window ──────────────
        async {
            let mut scanner = trouble_host::scan::Scanner::new(central);
            let config = ScanConfig::default();

            loop {
                if !SCAN_SIGNAL.wait().await {
                    continue;
                }

                let session = match scanner.scan(&config).await {
                    Ok(session) => session,
                    Err(e) => {
                        log::warn!("BLE scan failed to start: {:?}", e);
                        continue;
                    }
                };
                log::debug!("BLE scan session open");

                // Reports flow through ScanEventHandler until the stop request
                while SCAN_SIGNAL.wait().await {}
                drop(session);
                log::debug!("BLE scan session closed");
            }
        },
        // ── GATT server: advertise, connect, notify ─────────────────────
        async {
            loop {
                let mut adv_data = [0u8; 31];
                let adv_len = match AdStructure::encode_slice(
                    &[
                        AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                        AdStructure::CompleteLocalName(comm::BLE_ADV_NAME.as_bytes()),
                    ],
                    &mut adv_data[..],
                ) {
                    Ok(len) => len,
                    Err(e) => {
                        log::error!("Ad encode error: {:?}", e);
                        Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let advertiser = match peripheral
                    .advertise(
                        &Default::default(),
                        Advertisement::ConnectableScannableUndirected {
                            adv_data: &adv_data[..adv_len],
                            scan_data: &[],
                        },
                    )
                    .await
                {
                    Ok(adv) => adv,
                    Err(e) => {
                        log::error!("BLE advertise error: {:?}", e);
                        Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                log::info!("BLE advertising as '{}'", comm::BLE_ADV_NAME);

                let conn = match advertiser.accept().await {
                    Ok(c) => c,
                    Err(e) => {
                        log::error!("BLE accept error: {:?}", e);
                        continue;
                    }
                };

                let gatt_conn = match conn.with_attribute_server(&server) {
                    Ok(gc) => gc,
                    Err(e) => {
                        log::error!("GATT setup error: {:?}", e);
                        continue;
                    }
                };

                log::info!("BLE client connected");
                handle_gatt_connection(&gatt_conn, &server).await;
                log::info!("BLE client disconnected, re-advertising");
            }
        },
    )
    .await;
}

/// Handle a GATT connection: forward output messages as notifications
/// and queue incoming writes as host commands.
async fn handle_gatt_connection<'s, P: PacketPool>(
    conn: &GattConnection<'_, 's, P>,
    server: &'s KeywardenServer<'_>,
) {
    let ble_rx = BLE_OUTPUT_CHANNEL.receiver();
    let mut line_reader = LineReader::new();

    loop {
        match embassy_futures::select::select(ble_rx.receive(), conn.next()).await {
            embassy_futures::select::Either::First(msg) => {
                // Pad with newlines so the companion NDJSON parser sees
                // harmless empty lines instead of null bytes.
                for chunk in msg.chunks(comm::BLE_MAX_NOTIFY) {
                    let mut padded = [b'\n'; 20];
                    padded[..chunk.len()].copy_from_slice(chunk);
                    if server
                        .keywarden_service
                        .tx
                        .notify(conn, &padded)
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            embassy_futures::select::Either::Second(event) => match event {
                GattConnectionEvent::Disconnected { .. } => return,
                GattConnectionEvent::Gatt { event } => {
                    if let GattEvent::Write(ref write_event) = event {
                        if write_event.handle() == server.keywarden_service.rx.handle {
                            for &byte in write_event.data() {
                                if let Some(line) = line_reader.feed(byte) {
                                    match comm::parse_command(line) {
                                        Ok(cmd) => {
                                            if CMD_CHANNEL.try_send(cmd).is_err() {
                                                log::warn!("Command queue full, dropping");
                                            }
                                        }
                                        Err(e) => {
                                            log::warn!("Rejected command: {}", e);
                                            send_message(&e.ack());
                                        }
                                    }
                                }
                            }
                        }
                    }
                    // Must accept/reply to all GATT events
                    if let Ok(reply) = event.accept() {
                        reply.send().await;
                    }
                }
                _ => {}
            },
        }
    }
}

/// Serialize a message onto the output channel. Drops it if the channel is
/// full.
fn send_message(msg: &DeviceMessage<'_>) {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    if let Some(len) = comm::serialize_message(msg, &mut buf) {
        buf.truncate(len);
        let _ = OUTPUT_CHANNEL.try_send(buf);
    }
}

fn now_ms() -> u64 {
    Instant::now().as_millis()
}

fn beep_on_detection(_: &Detection) {
    let _ = BUZZER_SIGNAL.try_send(());
}

fn report_detection(d: &Detection) {
    send_message(&DeviceMessage::Detected {
        name: d.name.as_str(),
        mac: d.mac,
        ts: now_ms(),
    });
}

/// Key manager actor: sole owner of the registry, scheduler and flash.
///
/// Serializes host commands, scheduler ticks and scan reports so each one is
/// applied as a single step. Commands are polled first so a busy scan
/// window cannot starve them.
#[embassy_executor::task]
async fn manager_task(manager: &'static mut Manager) {
    manager.setup();
    manager.dump_config();

    let mut ticker = Ticker::every(Duration::from_millis(defaults::TICK_INTERVAL_MS));
    let obs_rx = OBS_CHANNEL.receiver();
    let cmd_rx = CMD_CHANNEL.receiver();

    loop {
        match select3(cmd_rx.receive(), ticker.next(), obs_rx.receive()).await {
            Either3::First(cmd) => {
                comm::handle_command(&cmd, manager, now_ms(), send_message);
            }
            Either3::Second(()) => manager.tick(now_ms()),
            Either3::Third(mac) => {
                manager.on_scan_report(mac, now_ms());
            }
        }
    }
}

/// Serial output task — reads from output channel, logs to serial,
/// and forwards a clone to the BLE output channel.
#[embassy_executor::task]
async fn output_serial_task() {
    let output_rx = OUTPUT_CHANNEL.receiver();

    loop {
        let msg = output_rx.receive().await;

        // Forward to BLE output channel (non-blocking, drops if full or no client)
        let _ = BLE_OUTPUT_CHANNEL.try_send(msg.clone());

        if let Ok(s) = core::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

/// Periodic status reporting — asks the manager task for a live report.
#[embassy_executor::task]
async fn status_task() {
    loop {
        Timer::after(Duration::from_secs(STATUS_INTERVAL_SECS)).await;
        let _ = CMD_CHANNEL.try_send(HostCommand::GetStatus);
    }
}
