//! Prints the buttons and joystick of the Adafruit mini gamepad, blinks the LED on every input.
//!
//! When an OLED answers at 0x3D on the same bus, the last input is shown on it as well.
use core::fmt::Write as _;

use defmt::{info, warn};
use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Delay, Duration, Timer};
use static_cell::StaticCell;

use crate::blink::Led;
use crate::board::{self, pins, I2cBus};
use crate::gamepad::{GamepadTracker, Seesaw, BUTTON_MASK, PRODUCT_ID};
use crate::oled::{self, GamepadScreen};
use crate::usb_serial::Terminal;
use crate::wifi;

const LED_BLINK: Duration = Duration::from_millis(200);
const AFTER_INPUT: Duration = Duration::from_millis(100);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    super::startup(spawner, p.USB, p.WATCHDOG, "Pico Gamepad").await;

    // Only the LED of the wifi chip is used.
    let (_net_device, mut led) = match wifi::init_chip(spawner, pins!(p, wifi)).await {
        Ok(v) => v,
        Err(e) => super::halt("Wifi chip", e).await,
    };

    let bus = {
        static BUS: StaticCell<Mutex<NoopRawMutex, I2cBus>> = StaticCell::new();
        BUS.init(Mutex::new(board::stemma_i2c(pins!(p, stemma))))
    };
    let mut out = Terminal;

    let mut seesaw = Seesaw::new(I2cDevice::new(bus), Delay);
    let setup = async {
        seesaw.software_reset().await?;
        Timer::after_millis(10).await;
        let product = seesaw.product_id().await?;
        if product != PRODUCT_ID {
            warn!("Unexpected seesaw product {}, expected {}", product, PRODUCT_ID);
        }
        seesaw.pin_mode_bulk_input_pullup(BUTTON_MASK).await
    };
    if let Err(e) = setup.await {
        super::halt("Gamepad setup", e).await;
    }
    let _ = writeln!(out, "Gamepad ready, press buttons or move the joystick");

    let mut display = match oled::init_display(I2cDevice::new(bus), oled::GAMEPAD_DISPLAY_ADDRESS).await {
        Ok(d) => Some(d),
        Err(e) => {
            info!("No display: {:?}", defmt::Debug2Format(&e));
            None
        }
    };
    let mut screen = GamepadScreen::default();
    if let Some(d) = display.as_mut() {
        screen.startup();
        if screen.draw(d).is_ok() {
            let _ = d.flush().await;
        }
    }

    let mut tracker = GamepadTracker::new();
    loop {
        let input = match seesaw.sample().await {
            Ok((buttons, x, y)) => tracker.update(buttons, x, y),
            Err(e) => {
                warn!("Reading the gamepad failed: {}", e);
                None
            }
        };
        let Some(input) = input else {
            Timer::after(POLL_INTERVAL).await;
            continue;
        };

        let mut line: heapless::String<96> = heapless::String::new();
        let _ = input.describe(&mut line);
        let _ = writeln!(out, "Input #{}: {}", tracker.count, line);

        if let Some(d) = display.as_mut() {
            let mut short: heapless::String<64> = heapless::String::new();
            if input.describe_short(&mut short).unwrap_or(false) {
                screen.show_input(&short, tracker.count);
                if screen.draw(d).is_ok() {
                    let _ = d.flush().await;
                }
            }
        }

        led.set(true).await;
        Timer::after(LED_BLINK).await;
        led.set(false).await;
        Timer::after(AFTER_INPUT).await;
    }
}
