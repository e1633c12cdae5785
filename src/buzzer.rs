/// Detection tone on a passive piezo, driven by an LEDC low-speed channel.
///
/// `BUZZER_SIGNAL` carries one request per authorized detection. Requests
/// that arrive while a tone is sounding collapse into the next one.
use embassy_time::{Duration, Timer};
use esp_hal::gpio::DriveMode;
use esp_hal::ledc::channel::{self as pwm_channel, ChannelIFace};
use esp_hal::ledc::timer::{self as pwm_timer, config::Duty, TimerIFace};
use esp_hal::ledc::{Ledc, LowSpeed};
use esp_hal::peripherals::LEDC;
use esp_hal::time::Rate;

use crate::board;

#[cfg(feature = "board-m5stickc")]
pub type PiezoPin = esp_hal::peripherals::GPIO2<'static>;
#[cfg(feature = "board-xiao")]
pub type PiezoPin = esp_hal::peripherals::GPIO3<'static>;

/// Half duty: a symmetric square wave, the loudest a passive piezo gets.
const TONE_DUTY_PCT: u8 = 50;

#[embassy_executor::task]
pub async fn tone_task(ledc: LEDC<'static>, pin: PiezoPin) {
    let pwm = Ledc::new(ledc);

    let mut tone_clock = pwm.timer::<LowSpeed>(pwm_timer::Number::Timer0);
    let clock_config = pwm_timer::config::Config {
        duty: Duty::Duty8Bit,
        clock_source: pwm_timer::LSClockSource::APBClk,
        frequency: Rate::from_hz(board::BUZZER_FREQ_HZ),
    };
    if let Err(e) = tone_clock.configure(clock_config) {
        log::error!("Piezo disabled, {} Hz clock rejected: {:?}", board::BUZZER_FREQ_HZ, e);
        return;
    }

    let mut tone = pwm.channel(pwm_channel::Number::Channel0, pin);
    let tone_config = pwm_channel::config::Config {
        timer: &tone_clock,
        duty_pct: 0,
        drive_mode: DriveMode::PushPull,
    };
    if let Err(e) = tone.configure(tone_config) {
        log::error!("Piezo disabled, channel setup failed: {:?}", e);
        return;
    }

    log::info!(
        "Piezo on GPIO{} at {} Hz",
        board::BUZZER_PIN,
        board::BUZZER_FREQ_HZ
    );

    let requests = crate::BUZZER_SIGNAL.receiver();
    let length = Duration::from_millis(board::BUZZER_BEEP_MS);
    loop {
        requests.receive().await;
        if tone.set_duty(TONE_DUTY_PCT).is_err() {
            log::warn!("Piezo tone failed");
            continue;
        }
        Timer::after(length).await;
        let _ = tone.set_duty(0);
    }
}
