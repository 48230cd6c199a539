//! File store on the FAT formatted sd card of the PiCowbell Adalogger.
//!
//! The card sits on SPI0, SCK GP18, MOSI GP19, MISO GP16 and CS GP17. The volume manager is blocking, it's wrapped
//! in the async [`FileStore`] trait anyway since the card transfers are short.
use core::cell::Cell;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use embedded_sdmmc::{
    BlockDevice, Mode, RawDirectory, RawVolume, ShortFileName, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};

use crate::files::{insert_sorted, validate_name, FileError, FileInfo, FileName, FileStore};

pub type SdError<E> = embedded_sdmmc::Error<E>;

fn file_error<E: core::fmt::Debug>(e: SdError<E>) -> FileError {
    match e {
        SdError::NotFound => FileError::NotFound,
        SdError::FileAlreadyExists => FileError::AlreadyExists,
        SdError::NotEnoughSpace | SdError::DiskFull => FileError::NoSpace,
        SdError::FilenameError(_) => FileError::InvalidName,
        _ => FileError::Io,
    }
}

/// The name as stored in the directory, upper case 8.3.
fn fat_name(name: &str) -> Result<FileName, FileError> {
    let mut name = validate_name(name)?;
    name.make_ascii_uppercase();
    Ok(name)
}

/// Directory entry name as shown, lower case.
fn display_name(name: &ShortFileName) -> Option<FileName> {
    let mut s = FileName::new();
    core::fmt::write(&mut s, format_args!("{name}")).ok()?;
    s.make_ascii_lowercase();
    Some(s)
}

/// Files in the root directory of the first volume.
pub struct SdFileStore<D: BlockDevice, T: TimeSource> {
    manager: VolumeManager<D, T>,
    volume: RawVolume,
    root: RawDirectory,
}

impl<D: BlockDevice, T: TimeSource> SdFileStore<D, T>
where
    D::Error: core::fmt::Debug,
{
    /// Open volume 0 and its root directory.
    pub fn mount(device: D, time_source: T) -> Result<Self, SdError<D::Error>> {
        let mut manager = VolumeManager::new(device, time_source);
        let volume = manager.open_raw_volume(VolumeIdx(0))?;
        let root = match manager.open_root_dir(volume) {
            Ok(r) => r,
            Err(e) => {
                let _ = manager.close_volume(volume);
                return Err(e);
            }
        };
        Ok(Self { manager, volume, root })
    }

    /// Close the directory and volume, returns the card.
    pub fn unmount(mut self) -> D {
        let _ = self.manager.close_dir(self.root);
        let _ = self.manager.close_volume(self.volume);
        self.manager.free().0
    }

    /// Open, run `f` on the file and close it again, also when `f` failed.
    fn with_file<R>(
        &mut self,
        name: &str,
        mode: Mode,
        f: impl FnOnce(&mut VolumeManager<D, T>, embedded_sdmmc::RawFile) -> Result<R, SdError<D::Error>>,
    ) -> Result<R, FileError> {
        let name = fat_name(name)?;
        let file = self
            .manager
            .open_file_in_dir(self.root, name.as_str(), mode)
            .map_err(file_error)?;
        let r = f(&mut self.manager, file);
        let closed = self.manager.close_file(file);
        let r = r.map_err(file_error)?;
        closed.map_err(file_error)?;
        Ok(r)
    }
}

impl<D: BlockDevice, T: TimeSource> FileStore for SdFileStore<D, T>
where
    D::Error: core::fmt::Debug,
{
    async fn list<const N: usize>(&mut self, out: &mut heapless::Vec<FileInfo, N>) -> Result<usize, FileError> {
        let mut total = 0;
        self.manager
            .iterate_dir(self.root, |entry| {
                if entry.attributes.is_directory() || entry.attributes.is_volume() {
                    return;
                }
                if let Some(name) = display_name(&entry.name) {
                    total += 1;
                    insert_sorted(
                        out,
                        FileInfo {
                            name,
                            size: entry.size,
                        },
                    );
                }
            })
            .map_err(file_error)?;
        Ok(total)
    }

    async fn size(&mut self, name: &str) -> Result<Option<u32>, FileError> {
        let name = fat_name(name)?;
        match self.manager.find_directory_entry(self.root, name.as_str()) {
            Ok(entry) if entry.attributes.is_directory() => Ok(None),
            Ok(entry) => Ok(Some(entry.size)),
            Err(SdError::NotFound) => Ok(None),
            Err(e) => Err(file_error(e)),
        }
    }

    async fn read(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, FileError> {
        self.with_file(name, Mode::ReadOnly, |m, file| {
            if offset >= m.file_length(file)? {
                return Ok(0);
            }
            m.file_seek_from_start(file, offset)?;
            m.read(file, buf)
        })
    }

    async fn write(&mut self, name: &str, data: &[u8]) -> Result<(), FileError> {
        self.with_file(name, Mode::ReadWriteCreateOrTruncate, |m, file| m.write(file, data))
    }

    async fn append(&mut self, name: &str, data: &[u8]) -> Result<(), FileError> {
        self.with_file(name, Mode::ReadWriteCreateOrAppend, |m, file| m.write(file, data))
    }

    async fn remove(&mut self, name: &str) -> Result<(), FileError> {
        let name = fat_name(name)?;
        self.manager
            .delete_file_in_dir(self.root, name.as_str())
            .map_err(file_error)
    }
}

fn timestamp(dt: &NaiveDateTime) -> Timestamp {
    Timestamp {
        year_since_1970: dt.year().saturating_sub(1970).clamp(0, 255) as u8,
        zero_indexed_month: dt.month0() as u8,
        zero_indexed_day: dt.day0() as u8,
        hours: dt.hour() as u8,
        minutes: dt.minute() as u8,
        seconds: dt.second() as u8,
    }
}

/// Same timestamp for every file, used when there is no rtc.
#[derive(Debug, Copy, Clone)]
pub struct FixedTimeSource(pub NaiveDateTime);

impl Default for FixedTimeSource {
    fn default() -> Self {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
        Self(start.unwrap_or_default())
    }
}

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        timestamp(&self.0)
    }
}

/// Time from the rtc, the rtc is read asynchronously so the time is synced from the outside and then advanced with
/// the uptime.
#[derive(Debug)]
pub struct RtcTimeSource {
    anchor: Cell<Option<(NaiveDateTime, u64)>>,
    uptime_ms: fn() -> u64,
    fallback: FixedTimeSource,
}

impl RtcTimeSource {
    pub fn new(uptime_ms: fn() -> u64) -> Self {
        Self {
            anchor: Cell::new(None),
            uptime_ms,
            fallback: FixedTimeSource::default(),
        }
    }

    /// Record the rtc reading taken now.
    pub fn sync(&self, now: NaiveDateTime) {
        self.anchor.set(Some((now, (self.uptime_ms)())));
    }

    pub fn now(&self) -> NaiveDateTime {
        match self.anchor.get() {
            Some((dt, at)) => {
                let elapsed = (self.uptime_ms)().saturating_sub(at);
                dt + TimeDelta::milliseconds(elapsed as i64)
            }
            None => self.fallback.0,
        }
    }
}

impl TimeSource for RtcTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        timestamp(&self.now())
    }
}

/// The volume manager owns its time source, the program keeps syncing through a shared reference.
impl TimeSource for &RtcTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        timestamp(&self.now())
    }
}
