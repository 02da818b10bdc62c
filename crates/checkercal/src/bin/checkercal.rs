//! `checkercal` command-line tool.

use checkercal::config::CalibrationConfig;
use checkercal::pipeline::{self, RunError};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "checkercal")]
#[command(about = "Calibrate a camera from checkerboard photographs and undistort them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the board, calibrate and write undistorted images.
    Calibrate(CalibrateArgs),

    /// Write a default JSON config.
    InitConfig {
        /// Destination file.
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// Image files or directories of images.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Inner corners per board row.
    #[arg(long, required_unless_present = "config")]
    columns: Option<u32>,

    /// Inner corners per board column.
    #[arg(long, required_unless_present = "config")]
    rows: Option<u32>,

    /// Side length of one board square.
    #[arg(long)]
    square_size: Option<f64>,

    /// Undistortion free scaling in [0, 1]: 0 crops to valid pixels, 1 keeps all pixels.
    #[arg(long)]
    alpha: Option<f64>,

    /// JSON config; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the JSON run report here.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Directory for overlays and undistorted images (default: next to each input).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Do not save `<stem>_pattern.<ext>` overlays.
    #[arg(long)]
    no_overlays: bool,

    /// Do not save `<stem>_undistort.<ext>` images.
    #[arg(long)]
    no_undistort: bool,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors.
    #[arg(short, long)]
    quiet: bool,

    /// Log through `tracing` with JSON events.
    #[cfg(feature = "tracing")]
    #[arg(long)]
    json_log: bool,
}

impl CalibrateArgs {
    fn build_config(&self) -> Result<CalibrationConfig, RunError> {
        let mut config = match &self.config {
            Some(path) => CalibrationConfig::load_json(path)?,
            None => CalibrationConfig::default(),
        };
        if let Some(columns) = self.columns {
            config.columns = columns;
        }
        if let Some(rows) = self.rows {
            config.rows = rows;
        }
        if let Some(square_size) = self.square_size {
            config.square_size = square_size;
        }
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = Some(dir.clone());
        }
        if self.no_overlays {
            config.write_overlays = false;
        }
        if self.no_undistort {
            config.write_undistorted = false;
        }
        Ok(config)
    }
}

fn init_logging(args: &CalibrateArgs) {
    #[cfg(feature = "tracing")]
    if args.json_log {
        let _ = tracing_log::LogTracer::init();
        checkercal::core::init_tracing(true);
        return;
    }
    let _ = checkercal::core::init_with_verbosity(args.verbose, args.quiet);
}

fn run_calibrate(args: &CalibrateArgs) -> Result<(), RunError> {
    init_logging(args);
    let config = args.build_config()?;
    config.validate()?;
    let paths = pipeline::collect_image_paths(&args.images)?;
    let run = pipeline::run(&paths, &config)?;

    let camera = &run.report.camera;
    println!(
        "pattern found on {} of {} images",
        run.report.patterns_found,
        run.report.images.len()
    );
    println!("rms: {:.4} px", camera.rms);
    println!("camera matrix:");
    for row in camera.camera_matrix {
        println!("  [{:12.4} {:12.4} {:12.4}]", row[0], row[1], row[2]);
    }
    println!(
        "distortion (k1, k2, p1, p2, k3): {:?}",
        camera.distortion_coefficients
    );
    if run.model.confidence().is_low() {
        println!("confidence: low");
    }

    if let Some(path) = &args.report {
        run.report.write_json(path)?;
        println!("wrote report to {}", path.display());
    }
    Ok(())
}

fn run_init_config(path: &Path) -> Result<(), RunError> {
    CalibrationConfig::default().write_json(path)?;
    println!("wrote default config to {}", path.display());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Calibrate(args) => run_calibrate(&args),
        Commands::InitConfig { path } => run_init_config(&path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
