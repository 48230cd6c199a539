//! Exercise a file store: write, read back, append and read again. Also the short listing done after mounting.
use crate::console::ConsoleLog;
use crate::files::{FileError, FileInfo, FileStore};

/// `test_data.txt` shortened to fit 8.3.
pub const TEST_FILE: &str = "testdata.txt";
/// Entries shown by [`list_entries`].
pub const LISTING_LIMIT: usize = 5;

/// Largest test file contents.
pub const CONTENT_CAPACITY: usize = 512;

pub type Contents = heapless::Vec<u8, CONTENT_CAPACITY>;

fn seconds(now_ms: u64) -> heapless::String<24> {
    let mut s = heapless::String::new();
    let _ = core::fmt::write(&mut s, format_args!("{}.{:03}", now_ms / 1000, now_ms % 1000));
    s
}

/// Log every line of `text` as its own entry.
fn log_lines<const N: usize, const L: usize>(console: &mut ConsoleLog<N, L>, now_ms: u64, text: &[u8]) {
    let text = core::str::from_utf8(text).unwrap_or("<binary data>");
    for line in text.trim().lines() {
        console.log(now_ms, line);
    }
}

async fn read_back<S: FileStore, const N: usize, const L: usize>(
    store: &mut S,
    console: &mut ConsoleLog<N, L>,
    now_ms: u64,
) -> Result<Contents, FileError> {
    let mut buf = [0u8; CONTENT_CAPACITY];
    let data = store.read_to_end(TEST_FILE, &mut buf).await?;
    console.log(now_ms, "Content read from file:");
    log_lines(console, now_ms, data);
    Contents::from_slice(data).map_err(|_| FileError::TooLarge)
}

/// Write, read, append and read the test file. Returns the final contents.
///
/// `now_ms` provides the timestamps written into the file.
pub async fn run_file_io_test<S: FileStore, const N: usize, const L: usize>(
    store: &mut S,
    console: &mut ConsoleLog<N, L>,
    mut now_ms: impl FnMut() -> u64,
) -> Result<Contents, FileError> {
    let t = now_ms();
    console.log_fmt(t, format_args!("--- Creating and writing new data to '{TEST_FILE}' ---"));
    let mut first: heapless::String<160> = heapless::String::new();
    let _ = core::fmt::write(
        &mut first,
        format_args!(
            "Hello from the Pico!\nInitial write timestamp: {}\nThis is the first line of content.\n",
            seconds(t)
        ),
    );
    store.write(TEST_FILE, first.as_bytes()).await?;
    console.log_fmt(t, format_args!("Initial data written successfully to '{TEST_FILE}'."));

    let t = now_ms();
    console.log_fmt(t, format_args!("--- Reading data from '{TEST_FILE}' ---"));
    read_back(store, console, t).await?;

    let t = now_ms();
    console.log_fmt(t, format_args!("--- Appending new data to '{TEST_FILE}' ---"));
    let mut more: heapless::String<160> = heapless::String::new();
    let _ = core::fmt::write(
        &mut more,
        format_args!(
            "Appended at timestamp: {}\nThis line was appended later.\nAnd this is the final line of content.\n",
            seconds(t)
        ),
    );
    store.append(TEST_FILE, more.as_bytes()).await?;
    console.log(t, "New data appended successfully.");

    let t = now_ms();
    console.log_fmt(t, format_args!("--- Reading data after appending from '{TEST_FILE}' ---"));
    let contents = read_back(store, console, t).await?;
    console.log(now_ms(), "--- SD Card File I/O Example Finished ---");
    Ok(contents)
}

/// Log the first few entries of the store, as a quick check that it is readable. Returns the number of files.
pub async fn list_entries<S: FileStore, const N: usize, const L: usize>(
    store: &mut S,
    console: &mut ConsoleLog<N, L>,
    now_ms: u64,
) -> Result<usize, FileError> {
    let mut files: heapless::Vec<FileInfo, LISTING_LIMIT> = heapless::Vec::new();
    let total = store.list(&mut files).await?;
    console.log(now_ms, "Files found on SD card (first 5 entries):");
    if files.is_empty() {
        console.log(now_ms, "  (No files found on SD card)");
    }
    for f in files.iter() {
        console.log_fmt(now_ms, format_args!("- {}", f.name));
    }
    if total > files.len() {
        console.log(now_ms, "  ...");
    }
    Ok(total)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::files::RamFileStore;

    #[test]
    fn test_file_io() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut store: RamFileStore<4, 1024> = RamFileStore::new();
            let mut console: ConsoleLog<64, 80> = ConsoleLog::new();
            let mut t = 1000;
            let contents = run_file_io_test(&mut store, &mut console, || {
                t += 250;
                t
            })
            .await?;
            let text = core::str::from_utf8(&contents)?;
            let lines: Vec<&str> = text.lines().collect();
            assert_eq!(lines.len(), 6);
            assert_eq!(lines[0], "Hello from the Pico!");
            assert_eq!(lines[1], "Initial write timestamp: 1.250");
            assert_eq!(lines[3], "Appended at timestamp: 1.750");
            assert_eq!(lines[5], "And this is the final line of content.");

            let logged: Vec<&str> = console.iter().map(|e| e.message.as_str()).collect();
            assert!(logged.contains(&"Content read from file:\n"));
            assert!(logged.contains(&"This line was appended later.\n"));
            assert_eq!(logged.last(), Some(&"--- SD Card File I/O Example Finished ---\n"));

            // Running again starts over with a fresh file.
            let contents = run_file_io_test(&mut store, &mut console, || 5000).await?;
            assert_eq!(core::str::from_utf8(&contents)?.lines().count(), 6);
            Ok(())
        }())
    }

    #[test]
    fn test_list_entries() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut store: RamFileStore<8, 16> = RamFileStore::new();
            let mut console: ConsoleLog<32, 80> = ConsoleLog::new();
            assert_eq!(list_entries(&mut store, &mut console, 0).await?, 0);
            assert!(console.iter().any(|e| e.message.contains("No files found")));

            for name in ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt", "f.txt"] {
                store.write(name, b"x").await?;
            }
            console.clear();
            assert_eq!(list_entries(&mut store, &mut console, 0).await?, 6);
            // Header, five names and the ellipsis.
            assert_eq!(console.len(), 7);
            Ok(())
        }())
    }
}
