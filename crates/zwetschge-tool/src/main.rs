//! Zwetschge command line tool
//!
//! Builds flashable Zwetschge images from JSON device descriptions, decodes
//! existing images back into descriptions, and runs the consistency
//! validator.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use zwetschge_core::{validate, DeviceData, RegisterAction, Severity};
use zwetschge_format::{read, wire, write, Image, WriteOptions};

#[derive(Parser, Debug)]
#[command(name = "zwetschge")]
#[command(about = "Create and inspect Zwetschge flash images")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an image from a JSON device description
    Pack {
        /// Path to the device description
        #[arg(short, long)]
        device: PathBuf,

        /// Calibration blob to embed
        #[arg(short, long)]
        calibration: Option<PathBuf>,

        /// Module serial, exactly 19 ASCII characters
        #[arg(short, long)]
        serial: Option<String>,

        /// Module suffix text
        #[arg(long)]
        suffix: Option<String>,

        /// Omit the 0x2000-byte reserved region (for tools that flash
        /// starting at offset 0x2000)
        #[arg(long)]
        without_reserved: bool,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Decode an image into a JSON device description
    Unpack {
        /// The image to decode
        image: PathBuf,

        /// Output path for the device description
        #[arg(short, long)]
        output: PathBuf,

        /// Also store the embedded calibration blob here
        #[arg(short, long)]
        calibration: Option<PathBuf>,
    },
    /// Print a summary of an image
    Info {
        /// The image to inspect
        image: PathBuf,
    },
    /// Run the consistency validator on a device description
    Validate {
        /// Path to the device description
        #[arg(short, long)]
        device: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Pack {
            device,
            calibration,
            serial,
            suffix,
            without_reserved,
            output,
        } => pack(&device, calibration.as_deref(), serial, suffix, without_reserved, &output),
        Command::Unpack {
            image,
            output,
            calibration,
        } => unpack(&image, &output, calibration.as_deref()),
        Command::Info { image } => show_info(&image),
        Command::Validate { device } => run_validate(&device),
    }
}

fn load_device(path: &Path) -> Result<DeviceData> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading device description {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing device description {}", path.display()))
}

/// Log all findings; returns the number of error-severity ones
fn report_findings(device: &DeviceData) -> usize {
    let findings = validate(device);
    let mut errors = 0;
    for finding in &findings {
        match finding.severity {
            Severity::Warning => warn!("{finding}"),
            Severity::Error => {
                error!("{finding}");
                errors += 1;
            }
        }
    }
    errors
}

fn pack(
    device_path: &Path,
    calibration_path: Option<&Path>,
    serial: Option<String>,
    suffix: Option<String>,
    without_reserved: bool,
    output: &Path,
) -> Result<()> {
    let device = load_device(device_path)?;

    let errors = report_findings(&device);
    if errors > 0 {
        bail!("device description has {errors} validation error(s), not packing");
    }

    let calibration = match calibration_path {
        Some(path) => Some(
            fs::read(path).with_context(|| format!("reading calibration {}", path.display()))?,
        ),
        None => None,
    };

    let opts = WriteOptions {
        module_serial: serial,
        module_suffix: suffix,
        include_reserved: !without_reserved,
    };
    let image = write(&device, calibration.as_deref(), &opts)?;
    fs::write(output, &image).with_context(|| format!("writing {}", output.display()))?;
    info!(
        bytes = image.len(),
        use_cases = device.use_cases.len(),
        "wrote {}",
        output.display()
    );
    Ok(())
}

fn unpack(image_path: &Path, output: &Path, calibration_path: Option<&Path>) -> Result<()> {
    let bytes =
        fs::read(image_path).with_context(|| format!("reading {}", image_path.display()))?;
    let image = read(&bytes)?;

    let json = serde_json::to_string_pretty(&image.device)?;
    fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;
    info!(
        use_cases = image.device.use_cases.len(),
        "wrote device description to {}",
        output.display()
    );

    if let Some(path) = calibration_path {
        match &image.calibration {
            Some(blob) => {
                fs::write(path, blob)
                    .with_context(|| format!("writing calibration {}", path.display()))?;
                info!(bytes = blob.len(), "wrote calibration to {}", path.display());
            }
            None => warn!("image carries no calibration data, nothing to store"),
        }
    }
    Ok(())
}

fn show_info(image_path: &Path) -> Result<()> {
    let bytes =
        fs::read(image_path).with_context(|| format!("reading {}", image_path.display()))?;
    let image = read(&bytes)?;

    print_toc_summary(&bytes)?;
    print_device_summary(&image);
    Ok(())
}

/// Dump the table of contents pointers as they appear in the file.
///
/// `read` has already verified the checksums, so the fixed-offset decode
/// here cannot run out of bytes.
fn print_toc_summary(bytes: &[u8]) -> Result<()> {
    let toc_pos = if bytes.starts_with(wire::TOC_MAGIC) {
        0
    } else {
        wire::FLASH_OFFSET
    };
    let toc = &bytes[toc_pos..toc_pos + wire::TOC_SIZE];
    let mut cur = wire::Cursor::new(&toc[wire::TOC_OFFSET_VERSION..], "table of contents");

    let version = cur.u24_le()?;
    let (suffix_ptr, suffix_len) = cur.ptr_size()?;
    cur.take(4 + 16 + 4)?;
    let (torm_ptr, torm_len) = cur.ptr_size()?;
    let (cal_ptr, cal_len) = cur.ptr_size()?;
    let cal_crc = cur.u32_le()?;
    cur.u8()?;
    let (touc_ptr, touc_len) = cur.ptr_size()?;

    println!("container version:  {version:#x}");
    println!("register maps:      {torm_ptr:#08x} ({torm_len} bytes)");
    println!("use case table:     {touc_ptr:#08x} ({touc_len} bytes)");
    if cal_len > 0 {
        println!("calibration:        {cal_ptr:#08x} ({cal_len} bytes, crc {cal_crc:#010x})");
    } else {
        println!("calibration:        (none)");
    }
    if suffix_len > 0 {
        println!("module suffix:      {suffix_ptr:#08x} ({suffix_len} bytes)");
    } else {
        println!("module suffix:      (none)");
    }
    Ok(())
}

fn print_device_summary(image: &Image) {
    let device = &image.device;
    println!("product issuer:     {:?}", device.product_issuer);
    println!("product code:       {}", device.product_code);
    println!("system frequency:   {} Hz", device.system_frequency);
    match &image.module_serial {
        Some(serial) => println!("module serial:      {serial:?}"),
        None => println!("module serial:      (none)"),
    }
    if let Some(suffix) = &image.module_suffix {
        println!("module suffix:      {}", String::from_utf8_lossy(suffix));
    }

    let torm = device.register_maps.in_disk_order();
    let names = ["init", "fwPage1", "fwPage2", "fwStart", "start", "stop"];
    let lengths: Vec<String> = names
        .iter()
        .zip(torm)
        .map(|(name, map)| format!("{name}={}", map.len()))
        .collect();
    println!("register maps:      {}", lengths.join(", "));

    println!("use cases ({}):", device.use_cases.len());
    for uc in &device.use_cases {
        let action = match &uc.register_action {
            RegisterAction::TimedList(list) => format!("timed list ({} entries)", list.len()),
            RegisterAction::SequentialBlock(block) => format!(
                "sequential block ({} values at imager {:#06x})",
                block.values.len(),
                block.imager_address
            ),
        };
        println!(
            "  \"{}\" {} {}x{}, fps {} [{}..{}], {} raw frames, {}",
            uc.name,
            uc.guid,
            uc.image_size.0,
            uc.image_size.1,
            uc.start_fps,
            uc.fps_limits.0,
            uc.fps_limits.1,
            uc.raw_frame_count(),
            action,
        );
        if !uc.reserved_block.is_empty() {
            println!("    reserved block: {}", hex::encode(&uc.reserved_block));
        }
    }
}

fn run_validate(device_path: &Path) -> Result<()> {
    let device = load_device(device_path)?;
    let findings = validate(&device);
    if findings.is_empty() {
        println!("no findings");
        return Ok(());
    }
    for finding in &findings {
        println!("{finding}");
    }
    let errors = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .count();
    if errors > 0 {
        bail!("{errors} error-severity finding(s)");
    }
    Ok(())
}
