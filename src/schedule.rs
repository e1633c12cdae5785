/// Scan scheduling state machine.
///
/// Two orthogonal axes collapsed into one tick:
/// - periodic scanning: `Idle` → `Scanning` once per `scan_interval`, for
///   `scan_duration`
/// - manual override: a time-bounded window opened by [`ScanScheduler::start_scan_mode`]
///   that forces an immediate scan and waives confirmation gating
///
/// Each tick evaluates, in order:
/// 1. manual window expired (`now > manual_mode_end_time`) → clear the flag
/// 2. idle, no manual window, interval elapsed → start a scan
/// 3. scanning and `now >= scan_end_time` → stop
///
/// A scan therefore covers the half-open window `[start, start + duration)`.
/// The radio is driven through [`ScanControl`]; a failing call is logged and
/// the state still advances, so an absent radio never causes a start storm.
use crate::scanner::ScanControl;

/// Milliseconds since boot.
pub type Millis = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Scanning,
}

/// Scheduler working state. Reset on every boot, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleState {
    pub scanning: bool,
    pub scan_end_time: Millis,
    pub last_scan_start_time: Millis,
    pub manual_mode: bool,
    pub manual_mode_end_time: Millis,
}

pub struct ScanScheduler<R> {
    radio: R,
    scan_interval: Millis,
    scan_duration: Millis,
    state: ScheduleState,
}

impl<R: ScanControl> ScanScheduler<R> {
    pub fn new(radio: R, scan_interval: Millis, scan_duration: Millis) -> Self {
        Self {
            radio,
            scan_interval,
            scan_duration,
            state: ScheduleState::default(),
        }
    }

    /// Advance the state machine to `now`.
    pub fn tick(&mut self, now: Millis) {
        if self.state.manual_mode && now > self.state.manual_mode_end_time {
            self.state.manual_mode = false;
            log::debug!("Manual scan mode ended");
        }

        if !self.state.scanning
            && !self.state.manual_mode
            && now.saturating_sub(self.state.last_scan_start_time) >= self.scan_interval
        {
            self.begin_scan(now);
        }

        if self.state.scanning && now >= self.state.scan_end_time {
            self.end_scan();
        }
    }

    /// Open the manual window for `duration` ms and start scanning right away
    /// if idle. An in-progress scan keeps its own end time.
    pub fn start_scan_mode(&mut self, duration: Millis, now: Millis) {
        self.state.manual_mode = true;
        self.state.manual_mode_end_time = now.saturating_add(duration);
        if !self.state.scanning {
            self.begin_scan(now);
        }
    }

    /// Close the manual window early. Scan timing is unaffected.
    pub fn stop_scan_mode(&mut self) {
        if self.state.manual_mode {
            self.state.manual_mode = false;
            log::debug!("Manual scan mode cancelled");
        }
    }

    /// Whether the manual window is open at `now`, including the stretch
    /// between its expiry and the next tick.
    pub fn manual_active_at(&self, now: Millis) -> bool {
        self.state.manual_mode && now <= self.state.manual_mode_end_time
    }

    pub fn phase(&self) -> ScanPhase {
        if self.state.scanning {
            ScanPhase::Scanning
        } else {
            ScanPhase::Idle
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.state.scanning
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    fn begin_scan(&mut self, now: Millis) {
        log::debug!("BLE scan start");
        self.state.scanning = true;
        self.state.last_scan_start_time = now;
        self.state.scan_end_time = now.saturating_add(self.scan_duration);
        if let Err(e) = self.radio.start_scan() {
            log::debug!("Scan start skipped: {}", e);
        }
    }

    fn end_scan(&mut self) {
        log::debug!("BLE scan end");
        self.state.scanning = false;
        if let Err(e) = self.radio.stop_scan() {
            log::debug!("Scan stop skipped: {}", e);
        }
    }
}
