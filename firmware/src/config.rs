//! Runtime settings, read from `settings.txt` at boot.
//!
//! The file holds `key = value` lines, values may be quoted and `#` starts a comment:
//! ```text
//! wifi_mode = "station"
//! wifi_ssid = "my network"
//! wifi_password = "hunter22"
//! timezone = -5
//! ```
//! Anything not in the file keeps its default, the wifi credentials default to the `WIFI_SSID` and
//! `WIFI_PASSWORD` environment variables at build time.
use crate::blink::BlinkRate;
use crate::rtc::RtcChip;
use core::net::Ipv4Addr;
use heapless::String;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum ConfigError {
    #[error("expected 'key = value'")]
    MissingEquals,
    #[error("unknown key")]
    UnknownKey,
    #[error("invalid value")]
    InvalidValue,
    #[error("value too long")]
    TooLong,
    #[error("value out of range")]
    OutOfRange,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum WifiMode {
    /// Run a hotspot, clients connect to the board.
    AccessPoint,
    /// Join an existing network.
    Station,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub wifi_mode: WifiMode,
    pub ap_ssid: String<32>,
    /// Empty for an open network.
    pub ap_password: String<63>,
    pub ap_channel: u8,
    pub ap_address: Ipv4Addr,
    pub ap_prefix: u8,
    pub wifi_ssid: String<32>,
    pub wifi_password: String<63>,
    pub http_port: u16,
    pub hostname: String<32>,
    /// Offset from UTC in hours.
    pub timezone_hours: i8,
    pub rtc_chip: RtcChip,
    pub blink_rate: BlinkRate,
}

fn from_str<const N: usize>(v: &str) -> String<N> {
    let mut r = String::new();
    let _ = r.push_str(v);
    r
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wifi_mode: WifiMode::AccessPoint,
            ap_ssid: from_str(option_env!("AP_SSID").unwrap_or("PicoTest")),
            ap_password: from_str(option_env!("AP_PASSWORD").unwrap_or("")),
            ap_channel: 5,
            ap_address: Ipv4Addr::new(192, 168, 4, 1),
            ap_prefix: 24,
            wifi_ssid: from_str(option_env!("WIFI_SSID").unwrap_or("")),
            wifi_password: from_str(option_env!("WIFI_PASSWORD").unwrap_or("")),
            http_port: 80,
            hostname: from_str("pico"),
            timezone_hours: 0,
            rtc_chip: RtcChip::Auto,
            blink_rate: BlinkRate::new(50),
        }
    }
}

fn parse_string<const N: usize>(v: &str) -> Result<String<N>, ConfigError> {
    let mut r = String::new();
    r.push_str(v).map_err(|_| ConfigError::TooLong)?;
    Ok(r)
}

fn parse_int<T: core::str::FromStr>(v: &str) -> Result<T, ConfigError> {
    v.parse().map_err(|_| ConfigError::InvalidValue)
}

fn strip_quotes(v: &str) -> &str {
    let v = v.trim();
    if v.len() >= 2 && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\''))) {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

impl Settings {
    /// Parse a settings file on top of the defaults.
    pub fn parse(text: &str, on_error: impl FnMut(usize, ConfigError)) -> Self {
        let mut settings = Self::default();
        settings.apply(text, on_error);
        settings
    }

    /// Apply the lines in `text`, lines with errors are passed to `on_error` with their line number and skipped.
    pub fn apply(&mut self, text: &str, mut on_error: impl FnMut(usize, ConfigError)) {
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                on_error(i + 1, ConfigError::MissingEquals);
                continue;
            };
            // Only strip trailing comments outside of quoted values.
            let value = value.trim();
            let value = if value.starts_with('"') || value.starts_with('\'') {
                value
            } else {
                value.split('#').next().unwrap_or("").trim()
            };
            if let Err(e) = self.set(key.trim(), strip_quotes(value)) {
                on_error(i + 1, e);
            }
        }
    }

    /// Set a single key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "wifi_mode" => {
                self.wifi_mode = match value {
                    "ap" | "hotspot" | "access_point" => WifiMode::AccessPoint,
                    "station" | "sta" | "client" => WifiMode::Station,
                    _ => return Err(ConfigError::InvalidValue),
                }
            }
            "ap_ssid" => {
                if value.is_empty() {
                    return Err(ConfigError::InvalidValue);
                }
                self.ap_ssid = parse_string(value)?
            }
            "ap_password" => {
                // WPA2 needs at least 8 characters.
                if !value.is_empty() && value.len() < 8 {
                    return Err(ConfigError::InvalidValue);
                }
                self.ap_password = parse_string(value)?
            }
            "ap_channel" => {
                let channel: u8 = parse_int(value)?;
                if !(1..=13).contains(&channel) {
                    return Err(ConfigError::OutOfRange);
                }
                self.ap_channel = channel;
            }
            "ap_address" => self.ap_address = value.parse().map_err(|_| ConfigError::InvalidValue)?,
            "ap_prefix" => {
                let prefix: u8 = parse_int(value)?;
                if !(8..=30).contains(&prefix) {
                    return Err(ConfigError::OutOfRange);
                }
                self.ap_prefix = prefix;
            }
            "wifi_ssid" => self.wifi_ssid = parse_string(value)?,
            "wifi_password" => self.wifi_password = parse_string(value)?,
            "http_port" => {
                let port: u16 = parse_int(value)?;
                if port == 0 {
                    return Err(ConfigError::OutOfRange);
                }
                self.http_port = port;
            }
            "hostname" => self.hostname = parse_string(value)?,
            "timezone" => {
                let tz: i8 = parse_int(value.trim_start_matches('+'))?;
                if !(-12..=12).contains(&tz) {
                    return Err(ConfigError::OutOfRange);
                }
                self.timezone_hours = tz;
            }
            "rtc_chip" => self.rtc_chip = RtcChip::from_name(value).ok_or(ConfigError::InvalidValue)?,
            "blink_rate" => self.blink_rate = BlinkRate::new(parse_int(value)?),
            _ => return Err(ConfigError::UnknownKey),
        }
        Ok(())
    }

    /// Whether station mode has something to join.
    pub fn station_configured(&self) -> bool {
        !self.wifi_ssid.is_empty()
    }
}
