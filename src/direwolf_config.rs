//! `direwolf.conf` generation and ALSA capture-device discovery.
//!
//! Used by the `direwolf-config` subcommand to bootstrap a modem configuration the
//! supervisor can launch. Device discovery tries `arecord -l` first and falls back to
//! `/proc/asound/cards`.
use log::{debug, info, warn};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::validation::{base_callsign, validate_callsign, CallsignError};

pub const DEFAULT_BAUD: u32 = 1200;
pub const DEFAULT_AGWPE_PORT: u16 = 8000;
pub const DEFAULT_AUDIO_DEVICE: &str = "plughw:1,0";
/// Written by non-interactive bootstrap; the operator must replace it.
pub const PLACEHOLDER_CALLSIGN: &str = "N0CALL-0";
/// APRS-IS passcode placeholder in the commented IGate section.
const PLACEHOLDER_PASSCODE: &str = "12345";

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("invalid callsign '{callsign}': {reason}")]
    InvalidCallsign {
        callsign: String,
        reason: CallsignError,
    },

    #[error("configuration file already exists: {} (use --overwrite to replace it)", .0.display())]
    AlreadyExists(PathBuf),

    #[error("configuration cancelled")]
    Cancelled,

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A capture device as ALSA numbers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub card: u32,
    pub device: u32,
    pub name: String,
    pub description: String,
}

impl AudioDevice {
    /// Device string for Direwolf's `ADEVICE` line.
    pub fn alsa_device(&self) -> String {
        format!("plughw:{},{}", self.card, self.device)
    }
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Card {}, Device {}: {}", self.card, self.device, self.description)
    }
}

/// Values substituted into the generated file.
#[derive(Debug, Clone)]
pub struct DirewolfOptions {
    pub callsign: String,
    pub audio_device: String,
    pub agwpe_port: u16,
    pub baud: u32,
}

impl DirewolfOptions {
    pub fn new(callsign: impl Into<String>) -> Self {
        Self {
            callsign: callsign.into(),
            audio_device: DEFAULT_AUDIO_DEVICE.to_string(),
            agwpe_port: DEFAULT_AGWPE_PORT,
            baud: DEFAULT_BAUD,
        }
    }
}

/// Render the configuration text. The callsign is validated and uppercased.
pub fn render(options: &DirewolfOptions) -> Result<String, GeneratorError> {
    let callsign = validate_callsign(&options.callsign).map_err(|reason| {
        GeneratorError::InvalidCallsign {
            callsign: options.callsign.clone(),
            reason,
        }
    })?;
    let base = base_callsign(&callsign);
    let mut out = String::with_capacity(2048);
    out.push_str("#\n");
    out.push_str("# Direwolf configuration for the ax25bbs packet chat server\n");
    out.push_str("# Generated by `ax25bbs direwolf-config`\n");
    out.push_str("#\n");
    out.push_str("# Direwolf User Guide: https://github.com/wb2osz/direwolf/blob/master/doc/User-Guide.pdf\n");
    out.push_str("#\n\n");
    out.push_str("# Station callsign (with SSID)\n");
    out.push_str(&format!("MYCALL {}\n\n", callsign));
    out.push_str("# 1200 baud AFSK is the usual VHF packet mode\n");
    out.push_str(&format!("MODEM {}\n\n", options.baud));
    out.push_str("# Sound card used for receive and transmit\n");
    out.push_str(&format!("ADEVICE {}\n\n", options.audio_device));
    out.push_str("# Push-to-talk. Enable the line matching your interface:\n");
    out.push_str("# PTT GPIO 17\n");
    out.push_str("# PTT RTS /dev/ttyUSB0\n");
    out.push_str("# PTT DTR /dev/ttyUSB0\n");
    out.push_str("# PTT CM108\n\n");
    out.push_str("# AGWPE TCP port the BBS connects to\n");
    out.push_str(&format!("AGWPORT {}\n\n", options.agwpe_port));
    out.push_str("# Received-packet log directory\n");
    out.push_str("# LOGDIR /var/log/direwolf\n\n");
    out.push_str("# Digipeater\n");
    out.push_str("# DIGIPEAT 0 0 ^WIDE[3-7]-[1-7]$|^TEST$ ^WIDE[12]-[12]$ TRACE\n\n");
    out.push_str("# Position beacon\n");
    out.push_str("# PBEACON delay=1 every=30 overlay=S symbol=\"digi\" lat=42.6 long=-71.3 \\\n");
    out.push_str("#   power=50 height=20 gain=4 comment=\"Packet chat BBS\"\n\n");
    out.push_str("# APRS-IS IGate (set your own passcode)\n");
    out.push_str("# IGSERVER noam.aprs2.net\n");
    out.push_str(&format!("# IGLOGIN {} {}\n\n", base, PLACEHOLDER_PASSCODE));
    out.push_str("# Attempt single-bit error correction\n");
    out.push_str("FIX_BITS 1\n");
    Ok(out)
}

fn parse_arecord_line(line: &str) -> Option<AudioDevice> {
    // card 1: Device [USB Audio Device], device 0: USB Audio [USB Audio]
    let start = line.find("card ")?;
    let rest = line[start + 5..].trim_start();
    let (card, rest) = rest.split_once(':')?;
    let card: u32 = card.trim().parse().ok()?;
    let (card_name, rest) = rest.split_once(',')?;
    let card_name = card_name.trim();
    let rest = rest.trim_start().strip_prefix("device")?;
    let (device, rest) = rest.split_once(':')?;
    let device: u32 = device.trim().parse().ok()?;
    let open = rest.find('[')?;
    let close = open + rest[open..].find(']')?;
    let desc = rest[open + 1..close].trim();
    if card_name.is_empty() || rest[..open].trim().is_empty() {
        return None;
    }
    Some(AudioDevice {
        card,
        device,
        name: card_name.to_string(),
        description: format!("{} - {}", card_name, desc),
    })
}

/// Parse `arecord -l` output.
pub fn parse_arecord(output: &str) -> Vec<AudioDevice> {
    output.lines().filter_map(parse_arecord_line).collect()
}

fn parse_proc_line(line: &str) -> Option<AudioDevice> {
    // " 1 [Device         ]: USB-Audio - USB Audio Device"
    let line = line.trim_start();
    let digits = line.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 {
        return None;
    }
    let card: u32 = line[..digits].parse().ok()?;
    let rest = line[digits..].trim_start().strip_prefix('[')?;
    let (name, rest) = rest.split_once(']')?;
    let desc = rest.trim_start().strip_prefix(':')?.trim();
    if desc.is_empty() {
        return None;
    }
    Some(AudioDevice {
        card,
        device: 0,
        name: name.trim().to_string(),
        description: desc.to_string(),
    })
}

/// Parse `/proc/asound/cards`. Every card is assumed to capture on device 0.
pub fn parse_proc_asound(content: &str) -> Vec<AudioDevice> {
    content.lines().filter_map(parse_proc_line).collect()
}

/// Find capture devices on this host. Never fails; an empty list means "use the default".
pub fn detect_audio_devices() -> Vec<AudioDevice> {
    match Command::new("arecord").arg("-l").output() {
        Ok(out) if out.status.success() => {
            let devices = parse_arecord(&String::from_utf8_lossy(&out.stdout));
            debug!("arecord reported {} capture device(s)", devices.len());
            if !devices.is_empty() {
                return devices;
            }
        }
        Ok(out) => debug!("arecord -l exited with {}", out.status),
        Err(e) => debug!("arecord unavailable: {}", e),
    }

    match std::fs::read_to_string("/proc/asound/cards") {
        Ok(content) => {
            let devices = parse_proc_asound(&content);
            debug!("/proc/asound/cards lists {} card(s)", devices.len());
            devices
        }
        Err(e) => {
            debug!("cannot read /proc/asound/cards: {}", e);
            Vec::new()
        }
    }
}

/// Render and write the file, creating parent directories.
pub fn write_config(
    path: &Path,
    options: &DirewolfOptions,
    overwrite: bool,
) -> Result<PathBuf, GeneratorError> {
    if path.exists() && !overwrite {
        return Err(GeneratorError::AlreadyExists(path.to_path_buf()));
    }
    let content = render(options)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content).map_err(|source| GeneratorError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Direwolf configuration written to {}", path.display());
    Ok(path.to_path_buf())
}

/// Write a default configuration if `path` does not exist yet.
///
/// Uses the first detected capture device. Returns `true` when a file was created.
pub fn ensure_config(path: &Path, callsign: &str) -> Result<bool, GeneratorError> {
    if path.exists() {
        debug!("{} already exists", path.display());
        return Ok(false);
    }
    let mut options = DirewolfOptions::new(callsign);
    if let Some(device) = detect_audio_devices().first() {
        options.audio_device = device.alsa_device();
    }
    write_config(path, &options, false)?;
    if callsign.eq_ignore_ascii_case(PLACEHOLDER_CALLSIGN) {
        warn!(
            "Created {} with placeholder callsign {}; edit MYCALL before going on air",
            path.display(),
            PLACEHOLDER_CALLSIGN
        );
    }
    Ok(true)
}

/// Ask for a callsign on the terminal until a valid one is entered.
pub fn prompt_callsign<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    default: Option<&str>,
) -> Result<String, GeneratorError> {
    loop {
        match default {
            Some(d) => write!(output, "Enter your amateur radio callsign [{}]: ", d)?,
            None => write!(output, "Enter your amateur radio callsign: ")?,
        }
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(GeneratorError::Cancelled);
        }
        let entered = match (line.trim(), default) {
            ("", Some(d)) => d.to_string(),
            ("", None) => {
                writeln!(output, "A callsign is required")?;
                continue;
            }
            (text, _) => text.to_string(),
        };
        match validate_callsign(&entered) {
            Ok(call) => return Ok(call),
            Err(e) => {
                writeln!(output, "'{}' is not a valid callsign: {}", entered, e)?;
                writeln!(output, "Examples: W1ABC, W2ASM-10, K6TU-5")?;
            }
        }
    }
}

/// List detected devices and let the operator pick one or type an ALSA string.
pub fn prompt_device<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    devices: &[AudioDevice],
) -> Result<String, GeneratorError> {
    if devices.is_empty() {
        writeln!(
            output,
            "No capture devices detected, using {}",
            DEFAULT_AUDIO_DEVICE
        )?;
        return Ok(DEFAULT_AUDIO_DEVICE.to_string());
    }
    writeln!(output, "Detected audio devices:")?;
    for (i, device) in devices.iter().enumerate() {
        writeln!(output, "  {}. {}", i + 1, device)?;
    }
    let custom = devices.len() + 1;
    writeln!(output, "  {}. Enter custom device", custom)?;
    loop {
        write!(output, "Select audio device [1-{}]: ", custom)?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(GeneratorError::Cancelled);
        }
        let choice: usize = match line.trim().parse() {
            Ok(n) => n,
            Err(_) => {
                writeln!(output, "Invalid selection '{}'", line.trim())?;
                continue;
            }
        };
        if choice == custom {
            write!(output, "ALSA device (e.g. plughw:1,0): ")?;
            output.flush()?;
            let mut dev = String::new();
            if input.read_line(&mut dev)? == 0 {
                return Err(GeneratorError::Cancelled);
            }
            if dev.trim().is_empty() {
                writeln!(output, "Device string cannot be empty")?;
                continue;
            }
            return Ok(dev.trim().to_string());
        }
        if (1..custom).contains(&choice) {
            return Ok(devices[choice - 1].alsa_device());
        }
        writeln!(output, "Selection must be between 1 and {}", custom)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ARECORD: &str = "**** List of CAPTURE Hardware Devices ****\n\
card 0: PCH [HDA Intel PCH], device 0: ALC3246 Analog [ALC3246 Analog]\n\
  Subdevices: 1/1\n\
card 1: Device [USB Audio Device], device 0: USB Audio [USB Audio]\n\
  Subdevices: 1/1\n";

    const PROC_CARDS: &str = " 0 [PCH            ]: HDA-Intel - HDA Intel PCH\n\
                      HDA Intel PCH at 0xf7f10000 irq 32\n\
 1 [Device         ]: USB-Audio - USB Audio Device\n\
                      C-Media Electronics Inc. USB Audio Device at usb-0000:00:14.0-1\n";

    #[test]
    fn parses_arecord_listing() {
        let devices = parse_arecord(ARECORD);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].card, 1);
        assert_eq!(devices[1].device, 0);
        assert_eq!(devices[1].name, "Device [USB Audio Device]");
        assert_eq!(devices[1].description, "Device [USB Audio Device] - USB Audio");
        assert_eq!(devices[1].alsa_device(), "plughw:1,0");
    }

    #[test]
    fn parses_proc_asound_cards() {
        let devices = parse_proc_asound(PROC_CARDS);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "PCH");
        assert_eq!(devices[1].description, "USB-Audio - USB Audio Device");
        assert_eq!(devices[1].to_string(), "Card 1, Device 0: USB-Audio - USB Audio Device");
    }

    #[test]
    fn render_fills_template() {
        let mut opts = DirewolfOptions::new("w2asm-10");
        opts.agwpe_port = 8010;
        let text = render(&opts).unwrap();
        assert!(text.contains("MYCALL W2ASM-10\n"));
        assert!(text.contains("MODEM 1200\n"));
        assert!(text.contains("ADEVICE plughw:1,0\n"));
        assert!(text.contains("AGWPORT 8010\n"));
        assert!(text.contains("# IGLOGIN W2ASM 12345\n"));
        assert!(text.contains("FIX_BITS 1\n"));
    }

    #[test]
    fn render_rejects_bad_callsign() {
        let err = render(&DirewolfOptions::new("HELLO")).unwrap_err();
        assert!(matches!(err, GeneratorError::InvalidCallsign { .. }));
    }

    #[test]
    fn write_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/direwolf.conf");
        let opts = DirewolfOptions::new("K6TU-5");
        write_config(&path, &opts, false).unwrap();
        assert!(path.exists());
        assert!(matches!(
            write_config(&path, &opts, false),
            Err(GeneratorError::AlreadyExists(_))
        ));
        write_config(&path, &opts, true).unwrap();
    }

    #[test]
    fn ensure_config_only_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("direwolf.conf");
        assert!(ensure_config(&path, PLACEHOLDER_CALLSIGN).unwrap());
        assert!(!ensure_config(&path, PLACEHOLDER_CALLSIGN).unwrap());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("MYCALL N0CALL-0"));
    }

    #[test]
    fn prompt_callsign_retries_until_valid() {
        let mut input = Cursor::new("\nnope\nk6tu-5\n");
        let mut output = Vec::new();
        let call = prompt_callsign(&mut input, &mut output, None).unwrap();
        assert_eq!(call, "K6TU-5");
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("A callsign is required"));
        assert!(shown.contains("'nope' is not a valid callsign"));
    }

    #[test]
    fn prompt_callsign_uses_default_and_detects_eof() {
        let mut output = Vec::new();
        let call = prompt_callsign(&mut Cursor::new("\n"), &mut output, Some("W1ABC")).unwrap();
        assert_eq!(call, "W1ABC");
        assert!(matches!(
            prompt_callsign(&mut Cursor::new(""), &mut output, None),
            Err(GeneratorError::Cancelled)
        ));
    }

    #[test]
    fn prompt_device_accepts_selection_or_custom() {
        let devices = parse_arecord(ARECORD);
        let mut output = Vec::new();
        let picked = prompt_device(&mut Cursor::new("x\n9\n2\n"), &mut output, &devices).unwrap();
        assert_eq!(picked, "plughw:1,0");
        let custom = prompt_device(&mut Cursor::new("3\nhw:2,0\n"), &mut output, &devices).unwrap();
        assert_eq!(custom, "hw:2,0");
    }
}
