//! Joins the configured network, prints the address and resolves a host name as a connectivity check.
use core::fmt::Write as _;

use embassy_executor::Spawner;
use embassy_time::Timer;

use crate::blink::Led;
use crate::board::pins;
use crate::config::Settings;
use crate::usb_serial::Terminal;
use crate::wifi;

/// Resolved once connected.
const TEST_HOST: &str = "google.com";

pub async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    super::startup(spawner, p.USB, p.WATCHDOG, "Pico WiFi Connect").await;

    let settings = match super::mount_sd(pins!(p, sdcard), crate::sdcard::FixedTimeSource::default()) {
        Some(mut store) => super::load_settings(&mut store).await,
        None => Settings::default(),
    };
    let mut out = Terminal;
    let _ = writeln!(out, "Connecting to '{}'...", settings.wifi_ssid);

    let (stack, mut led, address) = match wifi::start_station(spawner, pins!(p, wifi), &settings).await {
        Ok(v) => v,
        Err(e) => super::halt("Connecting", e).await,
    };
    let _ = writeln!(out, "Connected to WiFi");
    let _ = writeln!(out, "IP address: {}", address);
    led.set(true).await;

    match wifi::dns_lookup(stack, TEST_HOST).await {
        Ok(a) => {
            let _ = writeln!(out, "{} is at {}", TEST_HOST, a);
        }
        Err(e) => {
            let _ = writeln!(out, "Resolving {} failed: {}", TEST_HOST, e);
        }
    }

    loop {
        Timer::after_secs(60).await;
    }
}
