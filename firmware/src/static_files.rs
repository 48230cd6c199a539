//! Bundle of binary blobs kept in a separate flash region, at the moment only the cyw43 firmware.
//!
//! Layout of the bundle:
//! ```text
//! TableEntry0
//! TableEntry1 ...
//! Terminator   (entry with offset zero)
//! Data0
//! Data1 ...
//! ```
//! Table entries are postcard encoded, offsets are relative to the start of the bundle.
use serde::{Deserialize, Serialize};

/// Wifi chip firmware.
pub const CYW43_FIRMWARE: &str = "43439A0.bin";
/// Country locale matrix for the wifi chip.
pub const CYW43_CLM: &str = "43439A0_clm.bin";

/// Where `pack_assets` output is flashed, `picotool load -o 0x10300000`.
pub const BUNDLE_ADDRESS: usize = 0x1030_0000;
/// Size of the flash region reserved for the bundle in `memory.x`.
pub const BUNDLE_MAX_SIZE: usize = 1024 * 1024;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum StaticFileError {
    #[error("file not in bundle")]
    Missing,
    #[error("bundle buffer too small")]
    BufferFull,
    #[error("serialization failed")]
    Encoding,
}

impl From<postcard::Error> for StaticFileError {
    fn from(e: postcard::Error) -> Self {
        match e {
            postcard::Error::SerializeBufferFull => StaticFileError::BufferFull,
            _ => StaticFileError::Encoding,
        }
    }
}

#[derive(Deserialize, Serialize, Debug)]
struct TableEntry<'a> {
    name: &'a str,
    #[serde(with = "postcard::fixint::le")]
    size: u32,
    /// Zero marks the end of the table.
    #[serde(with = "postcard::fixint::le")]
    offset: u32,
}

#[derive(Copy, Clone)]
pub struct StaticFile<'a> {
    name: &'a str,
    data: &'a [u8],
}

impl<'a> StaticFile<'a> {
    pub fn name(&self) -> &'a str {
        self.name
    }
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl core::fmt::Debug for StaticFile<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StaticFile")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

#[derive(Debug, Copy, Clone)]
pub struct StaticFiles<'a> {
    raw: &'a [u8],
}

impl<'a> StaticFiles<'a> {
    pub fn new(raw: &'a [u8]) -> Self {
        Self { raw }
    }

    /// Iterate over the files, stops at the terminator or at the first broken entry.
    pub fn iter(&self) -> StaticFileIter<'a> {
        StaticFileIter {
            position: 0,
            raw: self.raw,
        }
    }

    pub fn get(&self, name: &str) -> Result<&'a [u8], StaticFileError> {
        self.iter()
            .find(|f| f.name == name)
            .map(|f| f.data)
            .ok_or(StaticFileError::Missing)
    }

    /// The firmware and clm blobs for `cyw43::new` and `Control::init`.
    pub fn cyw43_firmware(&self) -> Result<(&'a [u8], &'a [u8]), StaticFileError> {
        Ok((self.get(CYW43_FIRMWARE)?, self.get(CYW43_CLM)?))
    }
}

pub struct StaticFileIter<'a> {
    position: usize,
    raw: &'a [u8],
}

impl<'a> Iterator for StaticFileIter<'a> {
    type Item = StaticFile<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.raw.get(self.position..)?;
        let (entry, rest) = postcard::take_from_bytes::<TableEntry>(remaining).ok()?;
        if entry.offset == 0 {
            return None;
        }
        self.position += remaining.len() - rest.len();
        let start = entry.offset as usize;
        let data = self.raw.get(start..start.checked_add(entry.size as usize)?)?;
        Some(StaticFile {
            name: entry.name,
            data,
        })
    }
}

/// Build a bundle in `buffer`, returns the used part.
pub fn write_static_files<'a>(buffer: &'a mut [u8], input: &[(&str, &[u8])]) -> Result<&'a [u8], StaticFileError> {
    // The table size depends on the offsets it holds, offsets are fixint so one dry run settles it.
    let table_len = |data_start: usize, buffer: &mut [u8]| -> Result<usize, StaticFileError> {
        let mut position = 0;
        let mut offset = data_start;
        for &(name, data) in input.iter() {
            let entry = TableEntry {
                name,
                size: data.len() as u32,
                offset: offset as u32,
            };
            position += postcard::to_slice(&entry, &mut buffer[position..])?.len();
            offset += data.len();
        }
        let terminator = TableEntry {
            name: "",
            size: 0,
            offset: 0,
        };
        position += postcard::to_slice(&terminator, &mut buffer[position..])?.len();
        Ok(position)
    };

    let data_start = table_len(0, buffer)?;
    table_len(data_start, buffer)?;

    let mut position = data_start;
    for (_, data) in input.iter() {
        let end = position + data.len();
        buffer
            .get_mut(position..end)
            .ok_or(StaticFileError::BufferFull)?
            .copy_from_slice(data);
        position = end;
    }
    Ok(&buffer[..position])
}
