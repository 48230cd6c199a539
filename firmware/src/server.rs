//! The polling loop of the web programs: reset deadline, LED, and the http requests.
//!
//! Waiting for a client and reading its request are raced against the next blink or reset deadline, so neither
//! an idle server nor a slow client holds up the LED.
use defmt::{debug, info, warn};
use embassy_futures::select::{select, Either};
use embassy_net::tcp::TcpSocket;
use embassy_net::Stack;
use embassy_time::{Duration, Instant, Timer};
use static_cell::StaticCell;

use crate::blink::Led;
use crate::files::FileStore;
use crate::http::{self, HttpError, Response, Status};
use crate::rp2350_util::reboot::{reboot, RebootSettings};
use crate::web::WebApp;

/// A client that stalls mid-request is dropped after this.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
/// Largest request, the body of a saved file has to fit.
pub const REQUEST_BUFFER: usize = 24 * 1024;
/// Pause after a failed accept before listening again.
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

const SOCKET_BUFFER: usize = 4096;

struct Buffers {
    rx: [u8; SOCKET_BUFFER],
    tx: [u8; SOCKET_BUFFER],
    request: [u8; REQUEST_BUFFER],
}

/// The LED as last written.
struct LedState<'l, L> {
    led: &'l mut L,
    on: bool,
}

/// Reset when due and move the LED along. Returns when this has to run again.
async fn housekeeping<S: FileStore, L: Led>(app: &mut WebApp<'_, S>, led: &mut LedState<'_, L>) -> Option<Instant> {
    let now = Instant::now();
    if app.reboot.is_due(now) {
        info!("Rebooting");
        // Give the log a moment to make it out.
        Timer::after_millis(50).await;
        reboot(RebootSettings::Normal, Duration::from_millis(0));
    }
    if let Some(on) = app.blinker.update(now) {
        if on != led.on {
            led.on = on;
            led.led.set(on).await;
        }
    }
    app.next_deadline()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => Timer::at(d).await,
        None => core::future::pending().await,
    }
}

/// Housekeeping for as long as it is polled.
async fn keep_house<S: FileStore, L: Led>(app: &mut WebApp<'_, S>, led: &mut LedState<'_, L>) -> ! {
    loop {
        let next = housekeeping(app, led).await;
        sleep_until(next).await;
    }
}

/// Serve `app` on `port` forever.
pub async fn serve<S: FileStore, L: Led>(stack: Stack<'static>, port: u16, app: &mut WebApp<'_, S>, led: &mut L) -> ! {
    let buffers = {
        static BUFFERS: StaticCell<Buffers> = StaticCell::new();
        BUFFERS.init_with(|| Buffers {
            rx: [0; SOCKET_BUFFER],
            tx: [0; SOCKET_BUFFER],
            request: [0; REQUEST_BUFFER],
        })
    };
    let mut led = LedState {
        on: app.blinker.led_on(),
        led,
    };
    led.led.set(led.on).await;
    info!("Listening on port {}", port);

    loop {
        let mut socket = TcpSocket::new(stack, &mut buffers.rx, &mut buffers.tx);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        // The socket keeps listening while the deadlines are handled, accept only waits for the handshake.
        let accepted = loop {
            let next = housekeeping(app, &mut led).await;
            match select(socket.accept(port), sleep_until(next)).await {
                Either::First(r) => break r,
                Either::Second(()) => {}
            }
        };
        if let Err(e) = accepted {
            warn!("accept error: {:?}", e);
            Timer::after(ACCEPT_RETRY).await;
            continue;
        }

        let read = match select(
            http::read_request(&mut socket, &mut buffers.request),
            keep_house(app, &mut led),
        )
        .await
        {
            Either::First(r) => r,
            Either::Second(never) => match never {},
        };
        let now = Instant::now();
        match read {
            Ok(request) => {
                debug!("{} {}", request.method, request.path);
                let mut response = Response::new(&mut socket);
                let r = app.handle(&request, now, &mut response).await;
                let r = match r {
                    Ok(()) => response.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = r {
                    warn!("request {} failed: {}", request.path, e);
                }
            }
            Err(HttpError::ConnectionClosed) => {}
            Err(e) => {
                warn!("bad request: {}", e);
                let mut response = Response::new(&mut socket);
                let status = Status::from(e);
                let _ = response.send(status, http::content_type::TEXT, status.reason()).await;
                let _ = response.flush().await;
            }
        }
        socket.close();
        let _ = socket.flush().await;
    }
}
