//! The demo programs, one per binary. Each owns the whole chip, the helpers here do the common bring up.
use defmt::{error, info, warn};
use embassy_executor::Spawner;
use embassy_rp::peripherals::{USB, WATCHDOG};
use embassy_rp::watchdog::Watchdog;
use embassy_rp::Peri;
use embassy_time::{Duration, Timer};
use embedded_sdmmc::TimeSource;
use static_cell::{ConstStaticCell, StaticCell};

use crate::board::{self, SdCard, SdCardPinTransfer};
use crate::config::Settings;
use crate::console::Console;
use crate::files::{EitherStore, FileError, FileStore, RamFileStore};
use crate::reboot::SETTINGS_FILE;
use crate::rp2350_util::panic_info_scratch;
use crate::sdcard::{FixedTimeSource, SdFileStore};
use crate::usb_serial;

pub mod blink_menu;
pub mod blinky;
pub mod gamepad;
pub mod oled_test;
pub mod rtc_manager;
pub mod sd_file_io;
pub mod web_ide;
pub mod wifi_connect;

// These files are used to look up against when a panic happens.
const PANIC_HANDLER_FILE_LIST: &[&str] = &[
    "lib.rs",
    "usb_serial.rs",
    "rp2350_util.rs",
    "board.rs",
    "wifi.rs",
    "server.rs",
    "web.rs",
    "http.rs",
    "command.rs",
    "console.rs",
    "sdcard.rs",
    "files.rs",
    "dhcp.rs",
    "gamepad.rs",
    "oled.rs",
    "manager.rs",
    "menu.rs",
    "mod.rs",
];

// Program metadata for `picotool info`.
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"Pico Demos"),
    embassy_rp::binary_info::rp_program_description!(c"Pico 2 W demo programs"),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

/// Time for the host to open the serial ports before anything interesting is logged.
const STARTUP_DELAY: Duration = Duration::from_millis(1000);

pub type SdStore<T> = SdFileStore<SdCard, T>;
/// Used by the web programs when there is no sd card.
pub type RamStore = RamFileStore<16, 4096>;
pub type WebStore = EitherStore<&'static mut SdStore<FixedTimeSource>, &'static mut RamStore>;

/// Usb logging and terminal up, then report the panic from before the last reset.
pub async fn startup(spawner: Spawner, usb: Peri<'static, USB>, watchdog: Peri<'static, WATCHDOG>, product: &'static str) {
    panic_info_scratch::set_panic_files(PANIC_HANDLER_FILE_LIST);
    usb_serial::setup(spawner, usb, product);
    Timer::after(STARTUP_DELAY).await;

    let mut watchdog = Watchdog::new(watchdog);
    if let Some(panic_info) = panic_info_scratch::take_panic(&mut watchdog) {
        error!("Panicked: {}:{}", panic_info.file(), panic_info.line());
    }
    info!("{} starting", product);
}

/// The console, echoed to the usb terminal. Can only be taken once.
pub fn console() -> &'static mut Console {
    static CONSOLE: ConstStaticCell<Console> = ConstStaticCell::new(Console::new());
    let console = CONSOLE.take();
    console.set_echo(usb_serial::print);
    console
}

/// Report a fatal error on the terminal and the log, then park. The usb ports stay up.
pub async fn halt(what: &str, e: impl defmt::Format) -> ! {
    usb_serial::write(what);
    usb_serial::print(" failed, see the log");
    error!("{} failed: {}", what, e);
    loop {
        Timer::after_secs(60).await;
    }
}

/// Mount the card, None if there is no card or it isn't FAT formatted.
pub fn mount_sd<T: TimeSource>(p: SdCardPinTransfer, time_source: T) -> Option<SdStore<T>> {
    match SdFileStore::mount(board::sd_card(p), time_source) {
        Ok(store) => {
            info!("SD card mounted");
            Some(store)
        }
        Err(e) => {
            warn!("No SD card: {:?}", defmt::Debug2Format(&e));
            None
        }
    }
}

/// The sd card if there is one, otherwise files live in RAM until the next reset.
pub fn web_store(p: SdCardPinTransfer) -> WebStore {
    static SD: StaticCell<SdStore<FixedTimeSource>> = StaticCell::new();
    static RAM: ConstStaticCell<RamStore> = ConstStaticCell::new(RamStore::new());
    match mount_sd(p, FixedTimeSource::default()) {
        Some(sd) => EitherStore::Primary(SD.init(sd)),
        None => {
            warn!("Files are kept in RAM");
            EitherStore::Fallback(RAM.take())
        }
    }
}

/// `settings.txt` on top of the defaults, bad lines are logged and skipped.
pub async fn load_settings<S: FileStore>(store: &mut S) -> Settings {
    let mut buffer = [0u8; 1024];
    match store.read_to_end(SETTINGS_FILE, &mut buffer).await {
        Ok(data) => {
            let Ok(text) = core::str::from_utf8(data) else {
                warn!("{} is not utf-8", SETTINGS_FILE);
                return Settings::default();
            };
            info!("Loading {}", SETTINGS_FILE);
            Settings::parse(text, |line, e| warn!("{}:{}: {}", SETTINGS_FILE, line, e))
        }
        Err(FileError::NotFound) => Settings::default(),
        Err(e) => {
            warn!("Reading {} failed: {}", SETTINGS_FILE, e);
            Settings::default()
        }
    }
}
