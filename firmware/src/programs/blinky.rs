//! The LED on, the LED off, twice a second.
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};

use crate::blink::Led;
use crate::board::pins;
use crate::usb_serial;
use crate::wifi;

const HALF_PERIOD: Duration = Duration::from_millis(500);

pub async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    super::startup(spawner, p.USB, p.WATCHDOG, "Pico Blinky").await;

    let (_net_device, mut led) = match wifi::init_chip(spawner, pins!(p, wifi)).await {
        Ok(v) => v,
        Err(e) => super::halt("Wifi chip", e).await,
    };
    loop {
        led.set(true).await;
        usb_serial::print("LED ON");
        Timer::after(HALF_PERIOD).await;
        led.set(false).await;
        usb_serial::print("LED OFF");
        Timer::after(HALF_PERIOD).await;
    }
}
