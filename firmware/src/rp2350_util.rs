//! RP2350 specifics: unique id, flash access through XIP, rebooting and keeping panic locations across a reset.

pub mod chip_info {
    use embassy_rp::rom_data;

    // https://github.com/raspberrypi/pico-sdk/blob/9a4113fbbae65ee82d8cd6537963bc3d3b14bcca/src/rp2_common/pico_unique_id/unique_id.c#L35-L44
    const UNIQUE_ID_BYTES: usize = 8;

    /// Unique id as upper case hex, used as the usb serial number.
    #[derive(Debug, Copy, Clone, Default, Eq, PartialEq, defmt::Format)]
    pub struct SerialAscii([u8; UNIQUE_ID_BYTES * 2]);

    impl SerialAscii {
        pub fn as_str(&self) -> &str {
            // Only created by serial_ascii, always ascii.
            core::str::from_utf8(&self.0).unwrap_or("0000000000000000")
        }
    }

    #[derive(Debug, Copy, Clone, Default, defmt::Format)]
    pub struct ChipInfo {
        /// Value of the CHIP_INFO_PACKAGE_SEL register.
        pub package_sel: u32,
        pub device_id: u32,
        pub wafer_id: u32,
    }

    impl ChipInfo {
        fn unique_id(&self) -> [u8; UNIQUE_ID_BYTES] {
            let mut id = [0u8; UNIQUE_ID_BYTES];
            id[0..4].copy_from_slice(&self.device_id.to_le_bytes());
            id[4..].copy_from_slice(&self.wafer_id.to_le_bytes());
            id
        }

        pub fn serial_number(&self) -> u64 {
            u64::from_le_bytes(self.unique_id())
        }

        pub fn serial_ascii(&self) -> SerialAscii {
            const LOOKUP: &[u8; 16] = b"0123456789ABCDEF";
            let mut res = SerialAscii::default();
            let len = res.0.len();
            for (i, b) in self.unique_id().iter().enumerate() {
                res.0[len - i * 2 - 1] = LOOKUP[(b & 0xF) as usize];
                res.0[len - i * 2 - 2] = LOOKUP[(b >> 4) as usize];
            }
            res
        }
    }

    /// Query the bootrom, datasheet section 5.4.8.17. Returns the error code on failure.
    pub fn get_chip_info() -> Result<ChipInfo, i32> {
        const SYS_INFO_CHIP_INFO: u32 = 0x0001;
        let mut words: [u32; 9] = Default::default();
        let rc = unsafe { rom_data::get_sys_info(words.as_mut_ptr(), words.len(), SYS_INFO_CHIP_INFO) };
        if rc != 4 || (words[0] & SYS_INFO_CHIP_INFO) == 0 {
            return Err(rc);
        }
        // Chip info is always the first entry after the flags.
        Ok(ChipInfo {
            package_sel: words[1],
            device_id: words[2],
            wafer_id: words[3],
        })
    }
}

pub mod xip {
    /// A region of flash as a slice.
    ///
    /// # Safety
    /// `address..address + len` must lie within the flash and nothing may write to it while the slice lives.
    pub unsafe fn flash_slice(address: usize, len: usize) -> &'static [u8] {
        unsafe { core::slice::from_raw_parts(address as *const u8, len) }
    }
}

pub mod reboot {
    use embassy_rp::rom_data;
    use embassy_time::Duration;

    #[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
    pub enum RebootSettings {
        /// Regular boot from flash.
        Normal,
    }

    // Datasheet 5.4.8.24
    const REBOOT_TYPE_NORMAL: u32 = 0x0000;
    const NO_RETURN_ON_SUCCESS: u32 = 0x0100;

    /// Reset the chip after `delay`, does not return.
    pub fn reboot(settings: RebootSettings, delay: Duration) -> ! {
        let flags = match settings {
            RebootSettings::Normal => REBOOT_TYPE_NORMAL,
        } | NO_RETURN_ON_SUCCESS;
        unsafe {
            rom_data::reboot(flags, delay.as_millis() as u32, 0, 0);
        }
        // The rom only returns on failure, fall back to the system reset.
        cortex_m::peripheral::SCB::sys_reset()
    }
}

pub mod panic_info_scratch {
    //! The panic handler stores the location in two watchdog scratch registers and resets, the next boot reports it.
    //!
    //! Only the file index in the list given to [`set_panic_files`] is stored, so unknown files show as `unknown`.
    use core::cell::Cell;
    use core::sync::atomic::{AtomicBool, Ordering};
    use critical_section::Mutex;
    use embassy_rp::watchdog::Watchdog;

    const MAGIC: u32 = 0x5041_4e43;
    const MAGIC_REGISTER: usize = 0;
    const LOCATION_REGISTER: usize = 1;
    const LINE_BITS: u32 = 20;
    const UNKNOWN_FILE: u32 = 0xFFF;

    static FILES: Mutex<Cell<&'static [&'static str]>> = Mutex::new(Cell::new(&[]));
    static PANICKING: AtomicBool = AtomicBool::new(false);

    /// File names to match panic locations against, by suffix.
    pub fn set_panic_files(files: &'static [&'static str]) {
        critical_section::with(|cs| FILES.borrow(cs).set(files));
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
    pub struct PanicInfo {
        file: u32,
        line: u32,
        files: &'static [&'static str],
    }

    impl PanicInfo {
        pub fn file(&self) -> &'static str {
            self.files.get(self.file as usize).copied().unwrap_or("unknown")
        }
        pub fn line(&self) -> u32 {
            self.line
        }
    }

    fn encode(file: &str, line: u32, files: &[&str]) -> u32 {
        let index = files
            .iter()
            .position(|f| file.ends_with(f))
            .map(|i| i as u32)
            .unwrap_or(UNKNOWN_FILE);
        (index << LINE_BITS) | (line & ((1 << LINE_BITS) - 1))
    }

    /// The panic from before the last reset, if there was one. Clears it.
    pub fn take_panic(watchdog: &mut Watchdog) -> Option<PanicInfo> {
        if watchdog.get_scratch(MAGIC_REGISTER) != MAGIC {
            return None;
        }
        let location = watchdog.get_scratch(LOCATION_REGISTER);
        watchdog.set_scratch(MAGIC_REGISTER, 0);
        Some(PanicInfo {
            file: location >> LINE_BITS,
            line: location & ((1 << LINE_BITS) - 1),
            files: critical_section::with(|cs| FILES.borrow(cs).get()),
        })
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        cortex_m::interrupt::disable();
        if !PANICKING.swap(true, Ordering::Relaxed) {
            let files = critical_section::with(|cs| FILES.borrow(cs).get());
            let location = info
                .location()
                .map(|l| encode(l.file(), l.line(), files))
                .unwrap_or(UNKNOWN_FILE << LINE_BITS);
            let watchdog = embassy_rp::pac::WATCHDOG;
            watchdog.scratch(LOCATION_REGISTER).write_value(location);
            watchdog.scratch(MAGIC_REGISTER).write_value(MAGIC);
        }
        super::reboot::reboot(super::reboot::RebootSettings::Normal, embassy_time::Duration::from_millis(0))
    }
}
