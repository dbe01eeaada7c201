//! scanlink - Talk to SANE network scanners
//!
//! Lists the devices a `saned` daemon exports, prints their options and
//! runs a scan, writing the result as a PNM file.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use scanlink_core::{
    ClientConfig, Connection, DeviceOption, Image, OpenedDevice, Pixel, PixelFormat, ValueType,
};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// List, configure and scan from SANE network scanners
#[derive(Parser, Debug)]
#[command(name = "scanlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    server: ServerArgs,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Daemon address as host or host:port
    #[arg(short, long, env = "SCANLINK_ADDRESS", default_value = "localhost")]
    address: String,

    /// User name sent on Initialize and used for authorization
    #[arg(short, long, env = "SCANLINK_USER")]
    user: Option<String>,

    /// Password for protected devices
    #[arg(long, env = "SCANLINK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Seconds to wait for the daemon before giving up (0 = forever)
    #[arg(long, default_value = "10")]
    timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the devices exported by the daemon
    Devices,

    /// Print the options of a device
    Options {
        /// Device name, as printed by `devices`
        device: String,

        /// Include inactive options
        #[arg(long)]
        all: bool,
    },

    /// Scan one image into a PNM file
    Scan {
        /// Device name, as printed by `devices`
        device: String,

        /// Output file (.pbm, .pgm or .ppm depending on the image)
        #[arg(short, long)]
        output: PathBuf,

        /// Option assignment applied before scanning, `name=value` or
        /// `name=auto` (repeatable)
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        settings: Vec<Setting>,

        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
    },
}

/// A parsed `--set` argument
#[derive(Debug, Clone, PartialEq)]
struct Setting {
    name: String,
    value: SettingValue,
}

#[derive(Debug, Clone, PartialEq)]
enum SettingValue {
    Automatic,
    Text(String),
}

impl std::str::FromStr for Setting {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("missing option name in '{}'", s));
        }
        let value = if value.trim().eq_ignore_ascii_case("auto") {
            SettingValue::Automatic
        } else {
            SettingValue::Text(value.to_string())
        };
        Ok(Self {
            name: name.to_string(),
            value,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let config = client_config(&cli.server)?;
    let conn = Connection::connect(&config)
        .with_context(|| format!("Failed to connect to {}", config.address()))?;
    info!("Connected, protocol {}", conn.version());

    match &cli.command {
        Command::Devices => list_devices(&conn),
        Command::Options { device, all } => {
            let device = open(&conn, device)?;
            print_options(&device, *all)
        }
        Command::Scan {
            device,
            output,
            settings,
            force,
        } => {
            let device = open(&conn, device)?;
            apply_settings(&device, settings)?;
            scan_to_file(&device, output, *force)
        }
    }
}

/// Builds the client configuration from the command line
fn client_config(args: &ServerArgs) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_address(&args.address)
        .with_context(|| format!("Invalid daemon address: {}", args.address))?;
    if let Some(ref user) = args.user {
        config = config.username(user.as_str());
    }
    if let Some(ref password) = args.password {
        config = config.password(password.as_str());
    }
    let timeout = (args.timeout > 0).then(|| Duration::from_secs(args.timeout));
    Ok(config.connect_timeout(timeout))
}

fn open(conn: &Connection, name: &str) -> Result<OpenedDevice> {
    conn.open_device(name)
        .with_context(|| format!("Failed to open device: {}", name))
}

fn list_devices(conn: &Connection) -> Result<()> {
    let devices = conn.devices().context("Failed to list devices")?;
    if devices.is_empty() {
        warn!("The daemon exports no devices");
        return Ok(());
    }
    for device in devices {
        println!(
            "{}\t{} {} ({})",
            device.name(),
            device.vendor(),
            device.model(),
            device.kind()
        );
    }
    Ok(())
}

fn print_options(device: &OpenedDevice, all: bool) -> Result<()> {
    let options = device
        .options()
        .with_context(|| format!("Failed to load options of {}", device.name()))?;

    for option in options.iter().filter(|o| all || o.is_active()) {
        println!("{}", describe_option(option));
    }
    Ok(())
}

/// One line per option: name, current value, unit and constraint
fn describe_option(option: &DeviceOption) -> String {
    let descriptor = option.descriptor();
    if descriptor.value_type == ValueType::Group {
        return format!("\n{}:", descriptor.title);
    }

    let mut line = format!("  --{}", descriptor.name);
    if descriptor.value_type != ValueType::Button && descriptor.is_active() {
        match option.get() {
            Ok(value) => line.push_str(&format!(" = {}{}", value, descriptor.unit.suffix())),
            Err(e) => {
                debug!("Could not read {}: {}", descriptor.name, e);
                line.push_str(" = ?");
            }
        }
    }

    let allowed = descriptor.constraint.describe(descriptor.value_type);
    if !allowed.is_empty() {
        line.push_str(&format!(" [{}]", allowed));
    }
    if descriptor.is_automatic() {
        line.push_str(" [auto]");
    }
    if !descriptor.is_active() {
        line.push_str(" (inactive)");
    } else if !descriptor.is_settable() {
        line.push_str(" (read-only)");
    }
    line
}

fn apply_settings(device: &OpenedDevice, settings: &[Setting]) -> Result<()> {
    for setting in settings {
        let option = device
            .option(&setting.name)
            .with_context(|| format!("Failed to load options of {}", device.name()))?;
        let Some(option) = option else {
            bail!("Device {} has no option '{}'", device.name(), setting.name);
        };

        let applied = match &setting.value {
            SettingValue::Automatic => option.set_automatic(),
            SettingValue::Text(text) => option.set_str(text),
        }
        .with_context(|| format!("Failed to set {}", setting.name))?;
        info!("{} = {}", setting.name, applied);
    }
    Ok(())
}

fn scan_to_file(device: &OpenedDevice, output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output.display()
        );
    }

    let image = device
        .scan()
        .with_context(|| format!("Scan on {} failed", device.name()))?;
    info!(
        "Scanned {}x{} at depth {}",
        image.width(),
        image.height(),
        image.depth()
    );

    write_pnm_file(output, &image)?;
    println!("Wrote {}", output.display());
    Ok(())
}

/// Write an image to disk as PBM, PGM or PPM
fn write_pnm_file(path: &Path, image: &Image) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_pnm(&mut out, image)
        .and_then(|()| out.flush())
        .with_context(|| format!("Failed to write file: {}", path.display()))?;
    Ok(())
}

/// Encodes an image as binary PNM.
///
/// Lineart maps directly onto P4 (1 is black in both). 16-bit samples are
/// written big endian as PNM requires.
fn write_pnm<W: Write>(out: &mut W, image: &Image) -> std::io::Result<()> {
    let (width, height) = (image.width(), image.height());
    match image.format() {
        PixelFormat::Indexed1 => {
            write!(out, "P4\n{} {}\n", width, height)?;
            let row_bytes = width.div_ceil(8);
            for row in image.data().chunks(image.stride()).take(height) {
                out.write_all(&row[..row_bytes])?;
            }
        }
        PixelFormat::Indexed8 | PixelFormat::Rgb24 => {
            let (magic, channels) = match image.format() {
                PixelFormat::Rgb24 => ("P6", 3),
                _ => ("P5", 1),
            };
            write!(out, "{}\n{} {}\n255\n", magic, width, height)?;
            for row in image.data().chunks(image.stride()).take(height) {
                out.write_all(&row[..width * channels])?;
            }
        }
        PixelFormat::Gray16 | PixelFormat::Rgb48 => {
            let magic = if image.is_color() { "P6" } else { "P5" };
            write!(out, "{}\n{} {}\n65535\n", magic, width, height)?;
            for y in 0..height {
                for x in 0..width {
                    match image.pixel(x, y) {
                        Some(Pixel::Gray16(v)) => out.write_all(&v.to_be_bytes())?,
                        Some(Pixel::Rgb16(rgb)) => {
                            for v in rgb {
                                out.write_all(&v.to_be_bytes())?;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(())
}
