//! cyw43 bring-up, access point and station modes, the network stack, and the board LED on the wifi chip.
use cyw43::{Control, JoinOptions, PowerManagementMode};
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{Config, IpAddress, IpEndpoint, Ipv4Cidr, Stack, StackResources, StaticConfigV4};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIO0};
use embassy_rp::pio::Pio;
use embassy_time::{Duration, Timer};
use static_cell::StaticCell;

use core::net::Ipv4Addr;

use crate::blink::Led;
use crate::board::{Irqs, WifiPinTransfer};
use crate::config::Settings;
use crate::dhcp::{self, DhcpServer};
use crate::static_files::{StaticFileError, StaticFiles, BUNDLE_ADDRESS, BUNDLE_MAX_SIZE};

/// Attempts to join a network before giving up.
pub const JOIN_RETRIES: usize = 5;
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(2);
/// Addresses handed out by the hotspot.
const DHCP_POOL: usize = 8;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum WifiError {
    #[error("cyw43 firmware missing: {0}")]
    Firmware(#[from] StaticFileError),
    #[error("failed to join network")]
    JoinFailed,
    #[error("no network configured")]
    NotConfigured,
    #[error("dns lookup failed")]
    Dns,
}

type WifiSpi = PioSpi<'static, PIO0, 0, DMA_CH0>;

#[embassy_executor::task]
async fn cyw43_task(runner: cyw43::Runner<'static, Output<'static>, WifiSpi>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

/// The LED of the Pico W is on the wifi chip.
pub struct WifiLed(pub Control<'static>);

impl Led for WifiLed {
    async fn set(&mut self, on: bool) {
        self.0.gpio_set(0, on).await;
    }
}

impl core::ops::Deref for WifiLed {
    type Target = Control<'static>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for WifiLed {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn firmware() -> Result<(&'static [u8], &'static [u8]), StaticFileError> {
    // The bundle region is reserved in memory.x and never written by the firmware.
    let raw = unsafe { crate::rp2350_util::xip::flash_slice(BUNDLE_ADDRESS, BUNDLE_MAX_SIZE) };
    StaticFiles::new(raw).cyw43_firmware()
}

/// Power up the wifi chip and load its firmware. The network device is returned for [`start_stack`].
pub async fn init_chip(spawner: Spawner, p: WifiPinTransfer) -> Result<(cyw43::NetDriver<'static>, WifiLed), WifiError> {
    let (fw, clm) = firmware()?;

    let pwr = Output::new(p.pwr, Level::Low);
    let cs = Output::new(p.cs, Level::High);
    let mut pio = Pio::new(p.pio, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        p.dio,
        p.clk,
        p.dma,
    );

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    unwrap!(spawner.spawn(cyw43_task(runner)));

    control.init(clm).await;
    control.set_power_management(PowerManagementMode::PowerSave).await;
    Ok((net_device, WifiLed(control)))
}

/// Static address for the hotspot, the board is also the gateway.
pub fn ap_config(settings: &Settings) -> Config {
    Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(settings.ap_address, settings.ap_prefix),
        gateway: Some(settings.ap_address),
        dns_servers: Default::default(),
    })
}

/// Create the network stack and spawn its runner.
pub fn start_stack(spawner: Spawner, net_device: cyw43::NetDriver<'static>, config: Config) -> Stack<'static> {
    // Only needs to differ between boards and boots.
    let serial = crate::rp2350_util::chip_info::get_chip_info().map(|c| c.serial_number()).unwrap_or(0);
    let seed = serial ^ embassy_time::Instant::now().as_ticks();
    static RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(net_device, config, RESOURCES.init(StackResources::new()), seed);
    unwrap!(spawner.spawn(net_task(runner)));
    stack
}

/// Start the hotspot, open when no password is set.
pub async fn start_ap(control: &mut Control<'static>, settings: &Settings) {
    if settings.ap_password.is_empty() {
        control.start_ap_open(&settings.ap_ssid, settings.ap_channel).await;
    } else {
        control
            .start_ap_wpa2(&settings.ap_ssid, &settings.ap_password, settings.ap_channel)
            .await;
    }
    info!("Access point '{}' started", settings.ap_ssid.as_str());
}

/// Join the configured network, retrying a few times.
pub async fn join(control: &mut Control<'static>, ssid: &str, password: &str) -> Result<(), WifiError> {
    if ssid.is_empty() {
        return Err(WifiError::NotConfigured);
    }
    for attempt in 1..=JOIN_RETRIES {
        info!("Joining '{}' (attempt {}/{})", ssid, attempt, JOIN_RETRIES);
        let options = if password.is_empty() {
            JoinOptions::new_open()
        } else {
            JoinOptions::new(password.as_bytes())
        };
        match embassy_time::with_timeout(JOIN_TIMEOUT, control.join(ssid, options)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => warn!("join failed: {:?}", defmt::Debug2Format(&e)),
            Err(_) => warn!("join timed out"),
        }
        // Resets the driver state after a failed attempt.
        control.leave().await;
        Timer::after(RETRY_DELAY).await;
    }
    Err(WifiError::JoinFailed)
}

/// Wait for dhcp to hand us an address.
pub async fn wait_for_address(stack: Stack<'static>) -> Ipv4Addr {
    stack.wait_link_up().await;
    stack.wait_config_up().await;
    loop {
        if let Some(config) = stack.config_v4() {
            return config.address.address();
        }
        Timer::after_millis(100).await;
    }
}

pub async fn dns_lookup(stack: Stack<'static>, host: &str) -> Result<Ipv4Addr, WifiError> {
    let addresses = stack
        .dns_query(host, DnsQueryType::A)
        .await
        .map_err(|_| WifiError::Dns)?;
    match addresses.first() {
        Some(IpAddress::Ipv4(a)) => Ok(*a),
        #[allow(unreachable_patterns)]
        _ => Err(WifiError::Dns),
    }
}

/// Answer dhcp requests from hotspot clients.
#[embassy_executor::task]
pub async fn dhcp_task(stack: Stack<'static>, address: Ipv4Addr, prefix_len: u8) -> ! {
    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; 1024];
    let mut tx_buffer = [0u8; 1024];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buffer, &mut tx_meta, &mut tx_buffer);
    unwrap!(socket.bind(dhcp::SERVER_PORT));

    let mut server: DhcpServer<DHCP_POOL> = DhcpServer::new(address.octets(), prefix_len);
    let broadcast = IpEndpoint::new(IpAddress::Ipv4(Ipv4Addr::BROADCAST), dhcp::CLIENT_PORT);
    let mut request = [0u8; 576];
    let mut reply = [0u8; 576];
    loop {
        let Ok((n, _meta)) = socket.recv_from(&mut request).await else {
            continue;
        };
        let now = embassy_time::Instant::now().as_secs();
        match server.handle(&request[..n], now, &mut reply) {
            Ok(Some(len)) => {
                if let Err(e) = socket.send_to(&reply[..len], broadcast).await {
                    warn!("dhcp reply failed: {:?}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("dhcp: {}", e),
        }
    }
}

/// Hotspot with dhcp, as used by the web programs.
pub async fn start_hotspot(spawner: Spawner, p: WifiPinTransfer, settings: &Settings) -> Result<(Stack<'static>, WifiLed), WifiError> {
    let (net_device, mut led) = init_chip(spawner, p).await?;
    let stack = start_stack(spawner, net_device, ap_config(settings));
    start_ap(&mut led, settings).await;
    unwrap!(spawner.spawn(dhcp_task(stack, settings.ap_address, settings.ap_prefix)));
    info!("Hotspot address: {}", defmt::Display2Format(&settings.ap_address));
    Ok((stack, led))
}

/// Join the configured network and wait for an address.
pub async fn start_station(
    spawner: Spawner,
    p: WifiPinTransfer,
    settings: &Settings,
) -> Result<(Stack<'static>, WifiLed, Ipv4Addr), WifiError> {
    let (net_device, mut led) = init_chip(spawner, p).await?;
    let stack = start_stack(spawner, net_device, Config::dhcpv4(Default::default()));
    join(&mut led, &settings.wifi_ssid, &settings.wifi_password).await?;
    let address = wait_for_address(stack).await;
    info!("Connected, address: {}", defmt::Display2Format(&address));
    Ok((stack, led, address))
}
