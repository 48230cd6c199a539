//! Runs the display test suite once on the OLED on GP0 / GP1.
use core::fmt::Write as _;

use defmt::{error, info};
use embassy_executor::Spawner;
use embassy_time::{Delay, Timer};

use crate::board::{self, pins};
use crate::oled;
use crate::usb_serial::Terminal;

pub async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    super::startup(spawner, p.USB, p.WATCHDOG, "Pico OLED Test").await;

    let i2c = board::oled_i2c(pins!(p, oled));
    let mut display = match oled::init_display(i2c, oled::ADDRESS).await {
        Ok(d) => d,
        Err(e) => super::halt("Display setup", defmt::Debug2Format(&e)).await,
    };
    let mut out = Terminal;
    let _ = writeln!(out, "Starting OLED tests...");

    let mut delay = Delay;
    let passed = oled::run_suite(&mut display, &mut delay, |test, r| match r {
        Ok(()) => {
            info!("{} passed", test.name());
            let _ = writeln!(Terminal, "{}: passed", test.name());
        }
        Err(e) => {
            error!("{} failed: {:?}", test.name(), defmt::Debug2Format(&e));
            let _ = writeln!(Terminal, "{}: failed", test.name());
        }
    })
    .await;
    let _ = writeln!(out, "All tests completed, {}/{} passed", passed, oled::OledTest::ALL.len());

    loop {
        Timer::after_secs(60).await;
    }
}
