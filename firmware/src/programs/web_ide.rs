//! Web IDE on its own hotspot: edit the files on the card from a browser, with the console next to it.
//!
//! Saving `code.py` resets the board two seconds later, at boot its lines are run as console commands.
use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_time::Instant;

use crate::blink::{BlinkRate, Blinker};
use crate::board::pins;
use crate::files::{FileError, FileStore};
use crate::reboot::BOOT_SCRIPT;
use crate::server;
use crate::web::{HomePage, WebApp};
use crate::wifi;

/// Longest boot script that is run.
const SCRIPT_BUFFER: usize = 2048;

/// Run each line of `code.py` through the command interpreter, blank lines and comments are skipped.
pub async fn run_boot_script<S: FileStore>(app: &mut WebApp<'_, S>) {
    let mut buffer = [0u8; SCRIPT_BUFFER];
    let script = match app.store.read_to_end(BOOT_SCRIPT, &mut buffer).await {
        Ok(data) => data,
        Err(FileError::NotFound) => return,
        Err(e) => {
            warn!("Reading {} failed: {}", BOOT_SCRIPT, e);
            return;
        }
    };
    let Ok(script) = core::str::from_utf8(script) else {
        warn!("{} is not utf-8", BOOT_SCRIPT);
        return;
    };
    info!("Running {}", BOOT_SCRIPT);
    for line in script.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        app.run_command(line, Instant::now()).await;
    }
}

pub async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    super::startup(spawner, p.USB, p.WATCHDOG, "Pico Web IDE").await;

    let console = super::console();
    let mut store = super::web_store(pins!(p, sdcard));
    let settings = super::load_settings(&mut store).await;

    let (stack, mut led) = match wifi::start_hotspot(spawner, pins!(p, wifi), &settings).await {
        Ok(v) => v,
        Err(e) => super::halt("Access point", e).await,
    };

    let now = Instant::now();
    let mut app = WebApp::new(HomePage::Editor, console, Blinker::new(BlinkRate::OFF, now), store);
    app.log(now, format_args!("Access point '{}' started", settings.ap_ssid));
    app.log(
        now,
        format_args!("Open http://{}:{}/ in a browser", settings.ap_address, settings.http_port),
    );
    run_boot_script(&mut app).await;

    server::serve(stack, settings.http_port, &mut app, &mut led).await
}
