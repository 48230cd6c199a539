//! Pack the cyw43 firmware blobs into the bundle read by the firmware.
//!
//! Usage: `pack_assets [firmware_dir] [output]`, flash the output with `picotool load -o 0x10300000 <output>`.
use pico_demos::static_files::{self, BUNDLE_MAX_SIZE, CYW43_CLM, CYW43_FIRMWARE};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let dir = std::path::PathBuf::from(args.next().unwrap_or_else(|| "../../cyw43-firmware".to_string()));
    let output = args.next().unwrap_or_else(|| "/tmp/static_files.bin".to_string());

    let mut collected = vec![];
    for name in [CYW43_FIRMWARE, CYW43_CLM] {
        let p = dir.join(name);
        if !p.is_file() {
            return Err(format!("{p:?} is not a file").into());
        }
        println!("processing: {p:?}");
        collected.push((name, std::fs::read(&p)?));
    }

    let mut flash = vec![0u8; BUNDLE_MAX_SIZE];
    let input = collected
        .iter()
        .map(|(name, data)| (*name, &data[..]))
        .collect::<Vec<_>>();
    let used = static_files::write_static_files(&mut flash, &input)?;

    std::fs::write(&output, used)?;
    println!("wrote {} bytes to {output}", used.len());
    Ok(())
}
