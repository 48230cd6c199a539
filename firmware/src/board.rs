//! Pico 2 W board wiring: interrupt bindings, the pins each peripheral uses, and bus setup.
use embassy_rp::gpio::{Level, Output};
use embassy_rp::i2c::{self, I2c};
use embassy_rp::peripherals::{
    DMA_CH0, I2C0, PIN_0, PIN_1, PIN_16, PIN_17, PIN_18, PIN_19, PIN_23, PIN_24, PIN_25, PIN_29, PIN_4, PIN_5,
    PIO0, SPI0, USB,
};
use embassy_rp::spi::{self, Spi};
use embassy_rp::{bind_interrupts, Peri};
use embedded_hal_bus::spi::ExclusiveDevice;

bind_interrupts!(pub struct Irqs {
    USBCTRL_IRQ => embassy_rp::usb::InterruptHandler<USB>;
    PIO0_IRQ_0 => embassy_rp::pio::InterruptHandler<PIO0>;
    I2C0_IRQ => i2c::InterruptHandler<I2C0>;
});

/// Milliseconds since boot.
pub fn uptime_ms() -> u64 {
    embassy_time::Instant::now().as_millis()
}

/// The cyw43 on its PIO driven SPI.
pub struct WifiPinTransfer {
    pub pwr: Peri<'static, PIN_23>,
    pub dio: Peri<'static, PIN_24>,
    pub cs: Peri<'static, PIN_25>,
    pub clk: Peri<'static, PIN_29>,
    pub pio: Peri<'static, PIO0>,
    pub dma: Peri<'static, DMA_CH0>,
}

/// STEMMA QT connector, shared by the rtc, the gamepad and its display.
pub struct StemmaPinTransfer {
    pub i2c: Peri<'static, I2C0>,
    pub sda: Peri<'static, PIN_4>,
    pub scl: Peri<'static, PIN_5>,
}

/// The standalone OLED on GP0 and GP1.
pub struct OledPinTransfer {
    pub i2c: Peri<'static, I2C0>,
    pub sda: Peri<'static, PIN_0>,
    pub scl: Peri<'static, PIN_1>,
}

/// PiCowbell Adalogger sd card slot.
pub struct SdCardPinTransfer {
    pub spi: Peri<'static, SPI0>,
    pub clk: Peri<'static, PIN_18>,
    pub mosi: Peri<'static, PIN_19>,
    pub miso: Peri<'static, PIN_16>,
    pub cs: Peri<'static, PIN_17>,
}

macro_rules! pins {
    ($p:ident, wifi) => {
        $crate::board::WifiPinTransfer {
            pwr: $p.PIN_23,
            dio: $p.PIN_24,
            cs: $p.PIN_25,
            clk: $p.PIN_29,
            pio: $p.PIO0,
            dma: $p.DMA_CH0,
        }
    };
    ($p:ident, stemma) => {
        $crate::board::StemmaPinTransfer {
            i2c: $p.I2C0,
            sda: $p.PIN_4,
            scl: $p.PIN_5,
        }
    };
    ($p:ident, oled) => {
        $crate::board::OledPinTransfer {
            i2c: $p.I2C0,
            sda: $p.PIN_0,
            scl: $p.PIN_1,
        }
    };
    ($p:ident, sdcard) => {
        $crate::board::SdCardPinTransfer {
            spi: $p.SPI0,
            clk: $p.PIN_18,
            mosi: $p.PIN_19,
            miso: $p.PIN_16,
            cs: $p.PIN_17,
        }
    };
}
pub(crate) use pins;

pub type I2cBus = I2c<'static, I2C0, i2c::Async>;

fn i2c_config() -> i2c::Config {
    let mut config = i2c::Config::default();
    config.frequency = 100_000;
    config
}

pub fn stemma_i2c(p: StemmaPinTransfer) -> I2cBus {
    I2c::new_async(p.i2c, p.scl, p.sda, Irqs, i2c_config())
}

pub fn oled_i2c(p: OledPinTransfer) -> I2cBus {
    let mut config = i2c_config();
    config.frequency = 400_000;
    I2c::new_async(p.i2c, p.scl, p.sda, Irqs, config)
}

pub type SdSpiDevice = ExclusiveDevice<Spi<'static, SPI0, spi::Blocking>, Output<'static>, embassy_time::Delay>;
pub type SdCard = embedded_sdmmc::SdCard<SdSpiDevice, embassy_time::Delay>;

/// The sd card on SPI0, clocked at 400 kHz which every card accepts during initialisation.
pub fn sd_card(p: SdCardPinTransfer) -> SdCard {
    let mut config = spi::Config::default();
    config.frequency = 400_000;
    let bus = Spi::new_blocking(p.spi, p.clk, p.mosi, p.miso, config);
    let cs = Output::new(p.cs, Level::High);
    let device = ExclusiveDevice::new(bus, cs, embassy_time::Delay);
    embedded_sdmmc::SdCard::new(device, embassy_time::Delay)
}
