//! Composite usb device with two serial ports: defmt frames on the first, a plain text terminal on the second.
//!
//! The terminal carries the console output (the equivalent of `print()`) and line input for the interactive menus.
// The defmt encoder and the producer are globals only touched from within the logger's critical section.
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicBool, Ordering};

use defmt::{error, unwrap};
use embassy_executor::Spawner;
use embassy_futures::join::join;
use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_rp::Peri;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::pipe::Pipe;
use embassy_time::{Duration, Timer};
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver, Sender, State as CdcState};
use embassy_usb::UsbDevice;
use static_cell::StaticCell;

use crate::board::Irqs;
use crate::rp2350_util::chip_info;

pub type UsbDriver = Driver<'static, USB>;

const USB_CDC_MAX_PACKET_SIZE: usize = 64;

// Buffer for defmt frames.
const DEFMT_SERIAL_BUFFER: usize = 4096;
type Queue = heapless::spsc::Queue<u8, DEFMT_SERIAL_BUFFER>;
type Producer = heapless::spsc::Producer<'static, u8, DEFMT_SERIAL_BUFFER>;

static mut ENCODER: defmt::Encoder = defmt::Encoder::new();
static mut PRODUCER: Option<Producer> = None;
static mut CS_RESTORE: critical_section::RestoreState = critical_section::RestoreState::invalid();
static DEFMT_OVERRUN: AtomicBool = AtomicBool::new(false);
static TAKEN: AtomicBool = AtomicBool::new(false);

/// Longest line read from the terminal.
pub const LINE_LENGTH: usize = 80;
pub type Line = heapless::String<LINE_LENGTH>;

static TERMINAL_OUT: Pipe<CriticalSectionRawMutex, 2048> = Pipe::new();
static TERMINAL_LINES: Channel<CriticalSectionRawMutex, Line, 4> = Channel::new();
static TERMINAL_OVERRUN: AtomicBool = AtomicBool::new(false);

/// Print a line on the terminal, dropped when the terminal is backed up.
pub fn print(s: &str) {
    write(s);
    write("\r\n");
}

/// Print without a newline, for prompts.
pub fn write(s: &str) {
    if TERMINAL_OUT.free_capacity() < s.len() {
        TERMINAL_OVERRUN.store(true, Ordering::Relaxed);
        return;
    }
    let _ = TERMINAL_OUT.try_write(s.as_bytes());
}

/// `core::fmt::Write` onto the terminal, newlines become `\r\n`.
pub struct Terminal;

impl core::fmt::Write for Terminal {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut lines = s.split('\n');
        if let Some(first) = lines.next() {
            write(first);
        }
        for l in lines {
            write("\r\n");
            write(l);
        }
        Ok(())
    }
}

/// Wait for the next line typed on the terminal, without the line ending.
pub async fn read_line() -> Line {
    TERMINAL_LINES.receive().await
}

/// Drop lines typed before now.
pub fn clear_input() {
    TERMINAL_LINES.clear();
}

#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

#[embassy_executor::task]
async fn logger_task(mut sender: Sender<'static, UsbDriver>) -> ! {
    let queue: &'static mut Queue = {
        static STATE: StaticCell<Queue> = StaticCell::new();
        STATE.init(Queue::new())
    };
    let (tx, mut rx) = queue.split();
    critical_section::with(|_| unsafe {
        PRODUCER = Some(tx);
    });

    loop {
        if DEFMT_OVERRUN.swap(false, Ordering::Relaxed) {
            error!("overrun");
        }
        if !rx.ready() {
            Timer::after(Duration::from_millis(1)).await;
            continue;
        }
        while rx.ready() {
            let mut buffer = [0u8; USB_CDC_MAX_PACKET_SIZE];
            let len = rx.len().min(sender.max_packet_size() as usize).min(buffer.len());
            for b in buffer[..len].iter_mut() {
                if let Some(v) = rx.dequeue() {
                    *b = v;
                }
            }
            // Nobody listening, frames are dropped.
            if sender.write_packet(&buffer[..len]).await.is_err() {
                break;
            }
        }
    }
}

async fn terminal_output(sender: &mut Sender<'static, UsbDriver>) -> ! {
    let mut buffer = [0u8; USB_CDC_MAX_PACKET_SIZE];
    loop {
        sender.wait_connection().await;
        if TERMINAL_OVERRUN.swap(false, Ordering::Relaxed) {
            let _ = sender.write_packet(b"\r\n[output dropped]\r\n").await;
        }
        let n = TERMINAL_OUT.read(&mut buffer).await;
        let _ = sender.write_packet(&buffer[..n]).await;
    }
}

async fn terminal_input(receiver: &mut Receiver<'static, UsbDriver>) -> ! {
    let mut line = Line::new();
    let mut buffer = [0u8; USB_CDC_MAX_PACKET_SIZE];
    let mut last = 0u8;
    loop {
        receiver.wait_connection().await;
        let Ok(n) = receiver.read_packet(&mut buffer).await else {
            continue;
        };
        for &b in &buffer[..n] {
            let previous = core::mem::replace(&mut last, b);
            match b {
                // Second half of a \r\n.
                b'\n' if previous == b'\r' => {}
                b'\r' | b'\n' => {
                    write("\r\n");
                    if TERMINAL_LINES.try_send(line.clone()).is_err() {
                        error!("terminal line dropped");
                    }
                    line.clear();
                }
                // Backspace and delete.
                0x08 | 0x7F => {
                    if line.pop().is_some() {
                        write("\x08 \x08");
                    }
                }
                0x20..=0x7E => {
                    if line.push(b as char).is_ok() {
                        // Echo, terminals don't do it themselves.
                        let c = [b];
                        write(core::str::from_utf8(&c).unwrap_or(""));
                    }
                }
                _ => {}
            }
        }
    }
}

#[embassy_executor::task]
async fn terminal_task(mut sender: Sender<'static, UsbDriver>, mut receiver: Receiver<'static, UsbDriver>) -> ! {
    join(terminal_output(&mut sender), terminal_input(&mut receiver)).await.0
}

/// Bring up the usb device with the log and terminal ports, and spawn the tasks driving them.
pub fn setup(spawner: Spawner, usb: Peri<'static, USB>, product: &'static str) {
    let driver = Driver::new(usb, Irqs);

    let serial = {
        static STATE: StaticCell<chip_info::SerialAscii> = StaticCell::new();
        STATE.init(chip_info::get_chip_info().map(|c| c.serial_ascii()).unwrap_or_default())
    };

    let config = {
        const RPI_VENDOR_ID: u16 = 0x2e8a;
        const RPI_PRODUCT_ID: u16 = 0x0009;
        let mut config = embassy_usb::Config::new(RPI_VENDOR_ID, RPI_PRODUCT_ID);
        config.manufacturer = Some("Raspberry Pi");
        config.product = Some(product);
        config.serial_number = Some(serial.as_str());
        config.max_power = 250;
        config.max_packet_size_0 = 64;
        config
    };

    let mut builder = {
        static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
        static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
        static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();
        embassy_usb::Builder::new(
            driver,
            config,
            CONFIG_DESCRIPTOR.init([0; 256]),
            BOS_DESCRIPTOR.init([0; 256]),
            &mut [],
            CONTROL_BUF.init([0; 64]),
        )
    };

    let log_port = {
        static STATE: StaticCell<CdcState> = StaticCell::new();
        CdcAcmClass::new(&mut builder, STATE.init(CdcState::new()), USB_CDC_MAX_PACKET_SIZE as u16)
    };
    let terminal_port = {
        static STATE: StaticCell<CdcState> = StaticCell::new();
        CdcAcmClass::new(&mut builder, STATE.init(CdcState::new()), USB_CDC_MAX_PACKET_SIZE as u16)
    };

    unwrap!(spawner.spawn(usb_task(builder.build())));

    let (log_tx, _log_rx) = log_port.split();
    unwrap!(spawner.spawn(logger_task(log_tx)));
    let (term_tx, term_rx) = terminal_port.split();
    unwrap!(spawner.spawn(terminal_task(term_tx, term_rx)));
}

#[defmt::global_logger]
struct Logger;

fn do_write(bytes: &[u8]) {
    // NOTE(unsafe) only called from within the logger's critical section.
    unsafe {
        if let Some(tx) = PRODUCER.as_mut() {
            for b in bytes {
                if tx.enqueue(*b).is_err() {
                    DEFMT_OVERRUN.store(true, Ordering::Relaxed);
                }
            }
        }
    }
}

unsafe impl defmt::Logger for Logger {
    fn acquire() {
        // safety: Must be paired with corresponding call to release(), see below
        let restore = unsafe { critical_section::acquire() };

        // safety: accessing the atomic without CAS is OK because we have acquired a critical section.
        if TAKEN.load(Ordering::Relaxed) {
            panic!("defmt logger taken reentrantly")
        }
        TAKEN.store(true, Ordering::Relaxed);

        // safety: accessing the `static mut` is OK because we have acquired a critical section.
        unsafe {
            CS_RESTORE = restore;
            let encoder: &mut defmt::Encoder = &mut *core::ptr::addr_of_mut!(ENCODER);
            encoder.start_frame(do_write)
        }
    }
    unsafe fn flush() {}
    unsafe fn release() {
        // safety: accessing the `static mut` is OK because we have acquired a critical section.
        unsafe {
            let encoder: &mut defmt::Encoder = &mut *core::ptr::addr_of_mut!(ENCODER);
            encoder.end_frame(do_write);
        }
        TAKEN.store(false, Ordering::Relaxed);

        // safety: Must be paired with corresponding call to acquire(), see above
        unsafe {
            let restore = CS_RESTORE;
            critical_section::release(restore);
        }
    }
    unsafe fn write(bytes: &[u8]) {
        // safety: accessing the `static mut` is OK because we have acquired a critical section.
        unsafe {
            let encoder: &mut defmt::Encoder = &mut *core::ptr::addr_of_mut!(ENCODER);
            encoder.write(bytes, do_write);
        }
    }
}
