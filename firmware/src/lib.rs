#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(not(test), no_main)]

pub mod blink;
pub mod command;
pub mod config;
pub mod console;
pub mod dhcp;
pub mod file_io;
pub mod files;
pub mod gamepad;
pub mod http;
pub mod json;
pub mod oled;
pub mod reboot;
pub mod rtc;
pub mod sdcard;
pub mod static_files;
pub mod web;

#[cfg(target_arch = "arm")]
pub mod board;
#[cfg(target_arch = "arm")]
pub mod programs;
#[cfg(target_arch = "arm")]
pub mod rp2350_util;
#[cfg(target_arch = "arm")]
pub mod server;
#[cfg(target_arch = "arm")]
pub mod usb_serial;
#[cfg(target_arch = "arm")]
pub mod wifi;

// https://github.com/rust-lang/rust/blob/1bd4fdc943513e1004f498bbf289279c9784fc6f/compiler/rustc_data_structures/src/macros.rs#L3
#[macro_export]
macro_rules! static_assert_size {
    ($ty:ty, $size:expr) => {
        const _: [(); $size] = [(); ::core::mem::size_of::<$ty>()];
    };
}
