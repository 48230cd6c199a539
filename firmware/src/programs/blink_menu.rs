//! Control panel for the LED blink rate, on the configured network or its own hotspot.
use embassy_executor::Spawner;
use embassy_time::Instant;

use crate::blink::Blinker;
use crate::board::pins;
use crate::config::WifiMode;
use crate::server;
use crate::web::{HomePage, WebApp};
use crate::wifi;

pub async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    super::startup(spawner, p.USB, p.WATCHDOG, "Pico Blink Menu").await;

    let console = super::console();
    let mut store = super::web_store(pins!(p, sdcard));
    let settings = super::load_settings(&mut store).await;

    let (stack, mut led, address) = match settings.wifi_mode {
        WifiMode::Station => match wifi::start_station(spawner, pins!(p, wifi), &settings).await {
            Ok(v) => v,
            Err(e) => super::halt("Joining the network", e).await,
        },
        WifiMode::AccessPoint => match wifi::start_hotspot(spawner, pins!(p, wifi), &settings).await {
            Ok((stack, led)) => (stack, led, settings.ap_address),
            Err(e) => super::halt("Access point", e).await,
        },
    };

    let now = Instant::now();
    let mut app = WebApp::new(HomePage::Menu, console, Blinker::new(settings.blink_rate, now), store);
    app.log(now, format_args!("Open http://{}:{}/ in a browser", address, settings.http_port));
    app.log(now, format_args!("Blink rate {}", settings.blink_rate.value()));

    server::serve(stack, settings.http_port, &mut app, &mut led).await
}
