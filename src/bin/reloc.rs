//! `reloc` — batch camera relocalisation over a directory of frames (§6).
//!
//! ```text
//! reloc --forest <path> --frames <dir> [--config <toml>] [--out <poses.csv>]
//! ```
//! Exit codes: `0` success, `2` usage/construction error, `3` relocalisation
//! failure on at least one frame.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use log::{error, info};
use thiserror::Error;

use scoreforest_reloc::config::RelocaliserConfig;
use scoreforest_reloc::errors::{ForestLoadError, RelocFail, ShapeMismatch};
use scoreforest_reloc::frame_io::{list_frame_files, read_frame};
use scoreforest_reloc::pose::Pose;
use scoreforest_reloc::relocaliser::Relocaliser;

#[derive(Parser)]
#[command(name = "reloc", version, about = "SCoRe-Forest camera relocaliser")]
struct Cli {
    /// Path to the frozen forest file (§6 binary format).
    #[arg(long)]
    forest: PathBuf,

    /// Directory of per-frame input files (see `frame_io`).
    #[arg(long)]
    frames: PathBuf,

    /// Optional TOML configuration overriding §6 defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output CSV path.
    #[arg(long, default_value = "poses.csv")]
    out: PathBuf,
}

/// CLI-level errors, covering everything the library errors don't (bad
/// config files, an unwritable output path) alongside the library's own.
#[derive(Debug, Error)]
enum CliError {
    #[error("could not read config file: {0}")]
    ConfigIo(#[from] std::io::Error),
    #[error("invalid config TOML: {0}")]
    ConfigFormat(#[from] toml::de::Error),
    #[error("could not open output CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Forest(#[from] ForestLoadError),
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(any_failed) => std::process::exit(if any_failed { 3 } else { 0 }),
        Err(err) => {
            eprintln!("reloc: {err}");
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> Result<bool, CliError> {
    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            RelocaliserConfig::from_toml_str(&text)?
        }
        None => RelocaliserConfig::default(),
    };

    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .init();

    let reloc = Relocaliser::load(&cli.forest, config)?;

    let frame_paths = list_frame_files(&cli.frames)?;
    info!("found {} frames under {}", frame_paths.len(), cli.frames.display());

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(&cli.out)?;
    let cancel = AtomicBool::new(false);
    let mut any_failed = false;

    for path in frame_paths {
        let frame_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match process_frame(&reloc, &path, &cancel) {
            Ok(pose) => {
                info!("frame {frame_id}: OK");
                write_row(&mut writer, &frame_id, Some(pose))?;
            }
            Err(reason) => {
                error!("frame {frame_id}: {reason}");
                any_failed = true;
                write_row(&mut writer, &frame_id, None)?;
            }
        }
    }

    writer.flush().map_err(|e| CliError::ConfigIo(e))?;
    Ok(any_failed)
}

enum FrameError {
    Read(std::io::Error),
    Shape(ShapeMismatch),
    Reloc(RelocFail),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Read(e) => write!(f, "failed to read frame ({e})"),
            FrameError::Shape(e) => write!(f, "{e}"),
            FrameError::Reloc(e) => write!(f, "{e}"),
        }
    }
}

fn process_frame(reloc: &Relocaliser, path: &std::path::Path, cancel: &AtomicBool) -> Result<Pose, FrameError> {
    let file = std::fs::File::open(path).map_err(FrameError::Read)?;
    let (keypoints, descriptors) = read_frame(file).map_err(FrameError::Read)?;
    let predictions = reloc.predict(&keypoints, &descriptors).map_err(FrameError::Shape)?;
    reloc
        .relocalise(&keypoints, &predictions, cancel)
        .map_err(FrameError::Reloc)
}

/// Writes one fixed-width row per §6's output format: `frame_id, status,
/// r00..r22, tx, ty, tz` on every line, OK or FAIL, so that a batch mixing
/// both never trips `csv`'s default `flexible(false)` field-count check.
fn write_row(
    writer: &mut csv::Writer<std::fs::File>,
    frame_id: &str,
    pose: Option<Pose>,
) -> Result<(), CliError> {
    let mut record = vec![frame_id.to_string()];
    match pose {
        Some(p) => {
            record.push("OK".to_string());
            let r = p.rotation.matrix();
            for row in 0..3 {
                for col in 0..3 {
                    record.push(format!("{}", r[(row, col)]));
                }
            }
            record.push(format!("{}", p.translation.x));
            record.push(format!("{}", p.translation.y));
            record.push(format!("{}", p.translation.z));
        }
        None => {
            record.push("FAIL".to_string());
            record.extend(std::iter::repeat("0".to_string()).take(12));
        }
    }
    writer.write_record(&record)?;
    Ok(())
}
