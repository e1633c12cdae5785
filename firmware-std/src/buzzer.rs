//! Detection tone on a passive piezo through the ESP-IDF LEDC driver.
//!
//! Each `()` on the channel is one authorized detection. The channel holds a
//! single pending request, so a burst of detections sounds at most twice.

use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use esp_idf_svc::hal::gpio::OutputPin;
use esp_idf_svc::hal::ledc::config::TimerConfig;
use esp_idf_svc::hal::ledc::{LedcChannel, LedcDriver, LedcTimer, LedcTimerDriver, Resolution};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::EspError;

use keywarden::board;

/// Sound one tone per request until the sending side hangs up.
pub fn tone_thread<T, C>(
    requests: Receiver<()>,
    clock: impl Peripheral<P = T> + 'static,
    channel: impl Peripheral<P = C> + 'static,
    pin: impl Peripheral<P = impl OutputPin> + 'static,
) where
    T: LedcTimer + 'static,
    C: LedcChannel<SpeedMode = T::SpeedMode> + 'static,
{
    if let Err(e) = sound_requests(requests, clock, channel, pin) {
        log::error!("Piezo disabled: {}", e);
    }
}

fn sound_requests<T, C>(
    requests: Receiver<()>,
    clock: impl Peripheral<P = T> + 'static,
    channel: impl Peripheral<P = C> + 'static,
    pin: impl Peripheral<P = impl OutputPin> + 'static,
) -> Result<(), EspError>
where
    T: LedcTimer + 'static,
    C: LedcChannel<SpeedMode = T::SpeedMode> + 'static,
{
    let clock_config = TimerConfig::new()
        .frequency(Hertz(board::BUZZER_FREQ_HZ))
        .resolution(Resolution::Bits8);
    let tone_clock = LedcTimerDriver::new(clock, &clock_config)?;
    let mut tone = LedcDriver::new(channel, &tone_clock, pin)?;

    let loud = tone.get_max_duty() / 2;
    let length = Duration::from_millis(board::BUZZER_BEEP_MS);
    log::info!(
        "Piezo on GPIO{} at {} Hz",
        board::BUZZER_PIN,
        board::BUZZER_FREQ_HZ
    );

    while requests.recv().is_ok() {
        tone.set_duty(loud)?;
        thread::sleep(length);
        tone.set_duty(0)?;
    }
    Ok(())
}
