//! Mounts the sd card, lists a few entries and runs the write / read / append test.
use defmt::{error, info};
use embassy_executor::Spawner;
use embassy_time::Timer;

use crate::board::{self, pins};
use crate::file_io;
use crate::sdcard::FixedTimeSource;

pub async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    super::startup(spawner, p.USB, p.WATCHDOG, "Pico SD File IO").await;

    let console = super::console();
    console.log(board::uptime_ms(), "--- SD Card File I/O Example ---");
    match super::mount_sd(pins!(p, sdcard), FixedTimeSource::default()) {
        Some(mut store) => {
            console.log(board::uptime_ms(), "SD card mounted successfully at /sd");
            if let Err(e) = file_io::list_entries(&mut store, console, board::uptime_ms()).await {
                error!("Listing failed: {}", e);
            }
            match file_io::run_file_io_test(&mut store, console, board::uptime_ms).await {
                Ok(contents) => info!("Test file holds {} bytes", contents.len()),
                Err(e) => console.log_fmt(board::uptime_ms(), format_args!("An error occurred: {e}")),
            }
            // Closes the volume, the card can be pulled after this.
            let _card = store.unmount();
        }
        None => console.log(
            board::uptime_ms(),
            "Failed to mount SD card. Check the wiring and that it is FAT formatted.",
        ),
    }

    loop {
        Timer::after_secs(60).await;
    }
}
