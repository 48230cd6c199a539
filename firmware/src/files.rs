//! File storage used by the editor, the rtc event log and the sd card test.
//!
//! The storage on the device is a FAT formatted sd card, which only supports short 8.3 names, so all names are
//! validated against that here, for every store. Names compare case insensitive and are shown in lower case.
use heapless::{String, Vec};
use serde::Serialize;

/// Longest 8.3 name, `XXXXXXXX.YYY`.
pub const MAX_NAME_LENGTH: usize = 12;

pub type FileName = String<MAX_NAME_LENGTH>;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum FileError {
    #[error("file not found")]
    NotFound,
    #[error("invalid file name (use 8.3 names)")]
    InvalidName,
    #[error("file already exists")]
    AlreadyExists,
    #[error("storage is full")]
    NoSpace,
    #[error("file too large")]
    TooLarge,
    #[error("storage error")]
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: FileName,
    pub size: u32,
}

/// Check that `name` is a valid 8.3 name, returns the lower case version.
pub fn validate_name(name: &str) -> Result<FileName, FileError> {
    let name = name.trim();
    let (base, ext) = match name.split_once('.') {
        Some((b, e)) => (b, Some(e)),
        None => (name, None),
    };
    let allowed = |c: char| c.is_ascii_alphanumeric() || "_-~!#$%&'()@^{}".contains(c);
    if base.is_empty() || base.len() > 8 || !base.chars().all(allowed) {
        return Err(FileError::InvalidName);
    }
    if let Some(ext) = ext {
        if ext.is_empty() || ext.len() > 3 || !ext.chars().all(allowed) {
            return Err(FileError::InvalidName);
        }
    }
    let mut r = FileName::new();
    for c in name.chars() {
        r.push(c.to_ascii_lowercase())
            .map_err(|_| FileError::InvalidName)?;
    }
    Ok(r)
}

/// Add a file to a listing kept sorted by name. Once the listing is full only names sorting before the last
/// one get in, so it always holds the first `N` names.
pub fn insert_sorted<const N: usize>(out: &mut Vec<FileInfo, N>, info: FileInfo) {
    let at = out.partition_point(|f| f.name < info.name);
    if at >= N {
        return;
    }
    if out.is_full() {
        out.pop();
    }
    // Room was made above.
    let _ = out.insert(at, info);
}

/// A flat directory of files.
#[allow(async_fn_in_trait)]
pub trait FileStore {
    /// List the plain files sorted by name, directories are skipped. `out` gets the first `N`, the total number
    /// of files is returned.
    async fn list<const N: usize>(&mut self, out: &mut Vec<FileInfo, N>) -> Result<usize, FileError>;

    /// Size of the file, None if it doesn't exist.
    async fn size(&mut self, name: &str) -> Result<Option<u32>, FileError>;

    /// Read from `offset` into `buf`, returns the number of bytes read, zero at the end.
    async fn read(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, FileError>;

    /// Create or truncate the file and write `data`.
    async fn write(&mut self, name: &str, data: &[u8]) -> Result<(), FileError>;

    /// Append to the file, creating it if necessary.
    async fn append(&mut self, name: &str, data: &[u8]) -> Result<(), FileError>;

    async fn remove(&mut self, name: &str) -> Result<(), FileError>;

    async fn exists(&mut self, name: &str) -> Result<bool, FileError> {
        Ok(self.size(name).await?.is_some())
    }

    /// Move `from` over `to`, replacing it. Stores without a rename copy the data and remove `from` afterwards.
    async fn replace(&mut self, from: &str, to: &str) -> Result<(), FileError> {
        if validate_name(from)? == validate_name(to)? {
            return Ok(());
        }
        let size = self.size(from).await?.ok_or(FileError::NotFound)?;
        self.write(to, &[]).await?;
        let mut buf = [0u8; 256];
        let mut offset = 0;
        while offset < size {
            let n = self.read(from, offset, &mut buf).await?;
            if n == 0 {
                break;
            }
            self.append(to, &buf[..n]).await?;
            offset += n as u32;
        }
        self.remove(from).await
    }

    /// Read the entire file into `buf`.
    async fn read_to_end<'b>(&mut self, name: &str, buf: &'b mut [u8]) -> Result<&'b [u8], FileError> {
        let size = self.size(name).await?.ok_or(FileError::NotFound)? as usize;
        if size > buf.len() {
            return Err(FileError::TooLarge);
        }
        let mut used = 0;
        while used < size {
            let n = self.read(name, used as u32, &mut buf[used..size]).await?;
            if n == 0 {
                break;
            }
            used += n;
        }
        Ok(&buf[..used])
    }
}

#[derive(Debug)]
struct RamFile<const SIZE: usize> {
    name: FileName,
    data: Vec<u8, SIZE>,
}

/// In memory store, used when there is no sd card and in the tests.
#[derive(Debug, Default)]
pub struct RamFileStore<const FILES: usize, const SIZE: usize> {
    files: Vec<RamFile<SIZE>, FILES>,
}

impl<const FILES: usize, const SIZE: usize> RamFileStore<FILES, SIZE> {
    pub const fn new() -> Self {
        Self { files: Vec::new() }
    }

    fn find(&self, name: &str) -> Result<Option<usize>, FileError> {
        let name = validate_name(name)?;
        Ok(self.files.iter().position(|f| f.name == name))
    }

    fn find_or_create(&mut self, name: &str) -> Result<usize, FileError> {
        if let Some(index) = self.find(name)? {
            return Ok(index);
        }
        let name = validate_name(name)?;
        self.files
            .push(RamFile {
                name,
                data: Vec::new(),
            })
            .map_err(|_| FileError::NoSpace)?;
        Ok(self.files.len() - 1)
    }
}

impl<const FILES: usize, const SIZE: usize> FileStore for RamFileStore<FILES, SIZE> {
    async fn list<const N: usize>(&mut self, out: &mut Vec<FileInfo, N>) -> Result<usize, FileError> {
        for f in self.files.iter() {
            insert_sorted(
                out,
                FileInfo {
                    name: f.name.clone(),
                    size: f.data.len() as u32,
                },
            );
        }
        Ok(self.files.len())
    }

    async fn size(&mut self, name: &str) -> Result<Option<u32>, FileError> {
        Ok(self.find(name)?.map(|i| self.files[i].data.len() as u32))
    }

    async fn read(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, FileError> {
        let index = self.find(name)?.ok_or(FileError::NotFound)?;
        let data = &self.files[index].data;
        let start = (offset as usize).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    async fn write(&mut self, name: &str, data: &[u8]) -> Result<(), FileError> {
        if data.len() > SIZE {
            return Err(FileError::TooLarge);
        }
        let index = self.find_or_create(name)?;
        let file = &mut self.files[index].data;
        file.clear();
        file.extend_from_slice(data).map_err(|_| FileError::TooLarge)
    }

    async fn append(&mut self, name: &str, data: &[u8]) -> Result<(), FileError> {
        let index = self.find_or_create(name)?;
        self.files[index]
            .data
            .extend_from_slice(data)
            .map_err(|_| FileError::NoSpace)
    }

    async fn remove(&mut self, name: &str) -> Result<(), FileError> {
        let index = self.find(name)?.ok_or(FileError::NotFound)?;
        self.files.swap_remove(index);
        Ok(())
    }

    async fn replace(&mut self, from: &str, to: &str) -> Result<(), FileError> {
        let source = self.find(from)?.ok_or(FileError::NotFound)?;
        let name = validate_name(to)?;
        if let Some(target) = self.files.iter().position(|f| f.name == name) {
            if target == source {
                return Ok(());
            }
            self.files[target].data = core::mem::take(&mut self.files[source].data);
            self.files.swap_remove(source);
        } else {
            self.files[source].name = name;
        }
        Ok(())
    }
}

impl<S: FileStore> FileStore for &mut S {
    async fn list<const N: usize>(&mut self, out: &mut Vec<FileInfo, N>) -> Result<usize, FileError> {
        (**self).list(out).await
    }
    async fn size(&mut self, name: &str) -> Result<Option<u32>, FileError> {
        (**self).size(name).await
    }
    async fn read(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, FileError> {
        (**self).read(name, offset, buf).await
    }
    async fn write(&mut self, name: &str, data: &[u8]) -> Result<(), FileError> {
        (**self).write(name, data).await
    }
    async fn append(&mut self, name: &str, data: &[u8]) -> Result<(), FileError> {
        (**self).append(name, data).await
    }
    async fn remove(&mut self, name: &str) -> Result<(), FileError> {
        (**self).remove(name).await
    }
    async fn replace(&mut self, from: &str, to: &str) -> Result<(), FileError> {
        (**self).replace(from, to).await
    }
}

/// Use the primary store when available, the fallback otherwise.
pub enum EitherStore<A, B> {
    Primary(A),
    Fallback(B),
}

impl<A: FileStore, B: FileStore> FileStore for EitherStore<A, B> {
    async fn list<const N: usize>(&mut self, out: &mut Vec<FileInfo, N>) -> Result<usize, FileError> {
        match self {
            EitherStore::Primary(s) => s.list(out).await,
            EitherStore::Fallback(s) => s.list(out).await,
        }
    }
    async fn size(&mut self, name: &str) -> Result<Option<u32>, FileError> {
        match self {
            EitherStore::Primary(s) => s.size(name).await,
            EitherStore::Fallback(s) => s.size(name).await,
        }
    }
    async fn read(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, FileError> {
        match self {
            EitherStore::Primary(s) => s.read(name, offset, buf).await,
            EitherStore::Fallback(s) => s.read(name, offset, buf).await,
        }
    }
    async fn write(&mut self, name: &str, data: &[u8]) -> Result<(), FileError> {
        match self {
            EitherStore::Primary(s) => s.write(name, data).await,
            EitherStore::Fallback(s) => s.write(name, data).await,
        }
    }
    async fn append(&mut self, name: &str, data: &[u8]) -> Result<(), FileError> {
        match self {
            EitherStore::Primary(s) => s.append(name, data).await,
            EitherStore::Fallback(s) => s.append(name, data).await,
        }
    }
    async fn remove(&mut self, name: &str) -> Result<(), FileError> {
        match self {
            EitherStore::Primary(s) => s.remove(name).await,
            EitherStore::Fallback(s) => s.remove(name).await,
        }
    }
    async fn replace(&mut self, from: &str, to: &str) -> Result<(), FileError> {
        match self {
            EitherStore::Primary(s) => s.replace(from, to).await,
            EitherStore::Fallback(s) => s.replace(from, to).await,
        }
    }
}
