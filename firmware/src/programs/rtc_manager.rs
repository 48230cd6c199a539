//! Interactive clock manager on the usb terminal, with an event log on the sd card of the Adalogger.
//!
//! Alarms and the periodic timer are checked every half second, also while waiting for input and after the menu
//! was left.
use core::fmt::Write as _;

use chrono::NaiveDateTime;
use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use static_cell::StaticCell;

use crate::board::{self, pins};
use crate::config::Settings;
use crate::files::FileStore;
use crate::rtc::manager::{EventKind, RtcManager, LOG_FILE, LOG_HEADER};
use crate::rtc::menu::{Menu, MenuAction, Now};
use crate::rtc::{self, AnyRtc, Rtc};
use crate::sdcard::RtcTimeSource;
use crate::usb_serial::{self, Terminal};

const CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Append an event to the log, writing the header first when the log is new.
async fn log_event<S: FileStore>(store: Option<&mut S>, manager: &RtcManager, rtc_now: NaiveDateTime, kind: EventKind, data: &str) {
    let Some(store) = store else {
        return;
    };
    let mut line: heapless::String<128> = heapless::String::new();
    if manager.csv_line(&mut line, rtc_now, kind, data).is_err() {
        warn!("log line too long for {}", kind);
        return;
    }
    let r = match store.exists(LOG_FILE).await {
        Ok(true) => Ok(()),
        Ok(false) => store.write(LOG_FILE, LOG_HEADER.as_bytes()).await,
        Err(e) => Err(e),
    };
    let r = match r {
        Ok(()) => store.append(LOG_FILE, line.as_bytes()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = r {
        warn!("Logging to {} failed: {}", LOG_FILE, e);
    }
}

/// Read both clocks. When the clock can't be read the time source's estimate is used.
async fn read_now<R: Rtc>(rtc: &mut R, time_source: &RtcTimeSource) -> Now
where
    R::Error: defmt::Format,
{
    let rtc_now = match rtc.datetime().await {
        Ok(dt) => {
            time_source.sync(dt);
            dt
        }
        Err(e) => {
            warn!("Reading the clock failed: {}", e);
            time_source.now()
        }
    };
    Now {
        rtc: rtc_now,
        mono: Instant::now(),
    }
}

pub async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    super::startup(spawner, p.USB, p.WATCHDOG, "Pico RTC Manager").await;

    let time_source: &'static RtcTimeSource = {
        static STATE: StaticCell<RtcTimeSource> = StaticCell::new();
        STATE.init(RtcTimeSource::new(board::uptime_ms))
    };
    let mut sd = super::mount_sd(pins!(p, sdcard), time_source);
    let settings = match sd.as_mut() {
        Some(store) => super::load_settings(store).await,
        None => Settings::default(),
    };

    let i2c = board::stemma_i2c(pins!(p, stemma));
    let mut rtc = match rtc::detect(i2c, settings.rtc_chip).await {
        Ok(r) => r,
        Err(e) => super::halt("Finding the clock", e).await,
    };
    info!("Found {} clock", rtc.chip().name());
    let mut out = Terminal;
    let _ = writeln!(out, "{} clock found", rtc.chip().name());
    if let AnyRtc::Ds3231(d) = &mut rtc {
        if let Ok(t) = d.temperature().await {
            let _ = writeln!(out, "Temperature: {t:.2} C");
        }
    }
    if rtc.lost_power().await.unwrap_or(false) {
        let _ = writeln!(out, "The clock lost power, set the time with option 1");
    }
    if sd.is_none() {
        let _ = writeln!(out, "No SD card, events are not logged");
    }

    let mut manager = RtcManager::new(Instant::now());
    if manager.set_timezone(settings.timezone_hours as i32).is_err() {
        warn!("Timezone {} out of range", settings.timezone_hours);
    }
    let mut menu = Menu::new(manager, sd.is_some());

    let now = read_now(&mut rtc, time_source).await;
    log_event(sd.as_mut(), menu.manager(), now.rtc, EventKind::ProgramStart, "RTC Manager started").await;
    menu.start(now, &mut out);
    menu.prompt(now, &mut out);
    usb_serial::clear_input();

    loop {
        let input = if menu.exited() {
            Timer::after(CHECK_INTERVAL).await;
            None
        } else {
            match select(usb_serial::read_line(), Timer::after(CHECK_INTERVAL)).await {
                Either::First(line) => Some(line),
                Either::Second(()) => None,
            }
        };

        let mut now = read_now(&mut rtc, time_source).await;
        if let Some(line) = &input {
            for action in menu.input(line, now, &mut out) {
                match action {
                    MenuAction::SetRtc(dt) => match rtc.set_datetime(&dt).await {
                        Ok(()) => {
                            time_source.sync(dt);
                            now.rtc = dt;
                        }
                        Err(e) => {
                            warn!("Setting the clock failed: {}", e);
                            let _ = writeln!(out, "Writing to the clock failed");
                        }
                    },
                    MenuAction::LogEvent(kind, data) => {
                        log_event(sd.as_mut(), menu.manager(), now.rtc, kind, &data).await
                    }
                    MenuAction::Exit => info!("Menu closed, alarms are still checked"),
                }
            }
        }

        let triggered = menu.manager_mut().check(now.rtc, now.mono);
        if triggered.any() {
            let _ = menu.manager().write_triggered(&mut out, triggered, now.rtc);
            for kind in triggered.events() {
                log_event(sd.as_mut(), menu.manager(), now.rtc, kind, "").await;
            }
        }
        if (input.is_some() || triggered.any()) && !menu.exited() {
            menu.prompt(now, &mut out);
        }
    }
}
