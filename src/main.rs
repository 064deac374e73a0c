use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, warn};

use self::cancel::CancelToken;
use self::download::HttpFetch;
use self::error::Error;
use self::pipeline::{RunConfig, RunSummary};
use self::progress::Reporter;
use self::raster::{validate_resolution, ClassFilter, Engine, RasterOptions};
use self::tile_index::{DEFAULT_INDEX, DEFAULT_URL_FIELD};

mod error;
mod util;

mod binning;
mod boundary;
mod cancel;
mod download;
mod pdal;
mod pipeline;
mod progress;
mod raster;
mod tile_index;
mod triangulation;

#[cfg(test)]
mod testutil;

pub const NODATA: f64 = -9999.0;

/// Long flags the original tool spelled with a single dash.
const SINGLE_DASH_FLAGS: [&str; 5] = ["input", "output", "verbose", "to_dtm", "rasterize"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassArg {
    All,
    Code(u8),
}

fn class_parser(s: &str) -> Result<ClassArg, String> {
    if s.eq_ignore_ascii_case("all") {
        return Ok(ClassArg::All);
    }

    s.parse::<u8>()
        .map(ClassArg::Code)
        .map_err(|e| format!("'{s}' is neither a classification code nor ALL: {e}"))
}

fn resolution_parser(s: &str) -> Result<f64, String> {
    let res: f64 = s.parse().map_err(|e| format!("'{s}': {e}"))?;
    validate_resolution(res)?;
    Ok(res)
}

fn class_filter(args: &[ClassArg]) -> ClassFilter {
    if args.contains(&ClassArg::All) {
        return ClassFilter::All;
    }

    ClassFilter::codes(args.iter().filter_map(|arg| match arg {
        ClassArg::Code(code) => Some(*code),
        ClassArg::All => None,
    }))
}

#[derive(Parser)]
#[command(
    version,
    about = "Downloads IGN LiDAR HD tiles covering a boundary and optionally rasterizes them",
    long_about = None
)]
struct Cli {
    /// Path to the boundary vector file (shapefile, GeoJSON, ...).
    #[arg(long)]
    input: PathBuf,

    /// Path to the output folder.
    #[arg(long)]
    output: PathBuf,

    /// Verbose mode (1 for yes, 0 for no).
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    verbose: u8,

    /// Rasterize to DSM and DTM (1 for yes, 0 for no).
    #[arg(long = "to_dtm", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    to_dtm: u8,

    /// Rasterize to DSM only (1 for yes, 0 for no).
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    rasterize: u8,

    /// Lidar classes to include. Use "ALL" for all classes.
    #[arg(long, num_args = 1.., value_parser = class_parser, default_values = ["2", "3", "4", "5"])]
    classes: Vec<ClassArg>,

    /// Resolution of the rasters in CRS units.
    #[arg(long, default_value_t = 0.5, value_parser = resolution_parser)]
    res: f64,

    /// Tile index with one footprint per downloadable tile.
    #[arg(long, env = "LIDARHD_INDEX", default_value = DEFAULT_INDEX)]
    index: PathBuf,

    /// Tile index attribute holding the download URL.
    #[arg(long, default_value = DEFAULT_URL_FIELD)]
    url_field: String,

    /// Rasterization backend.
    #[arg(long, value_enum, default_value_t = Engine::Native)]
    engine: Engine,

    /// PDAL executable, for `--engine pdal`.
    #[arg(long, env = "PDAL_BIN", default_value = "pdal")]
    pdal: PathBuf,

    /// Total HTTP timeout per tile, in seconds.
    #[arg(long, default_value_t = 600)]
    timeout: u64,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let raster = (self.rasterize == 1 || self.to_dtm == 1).then(|| RasterOptions {
            classes: class_filter(&self.classes),
            resolution: self.res,
            with_dtm: self.to_dtm == 1,
            engine: self.engine,
            pdal: self.pdal.clone(),
            srs_wkt: None,
        });

        RunConfig {
            input: self.input.clone(),
            output: self.output.clone(),
            index: self.index.clone(),
            url_field: self.url_field.clone(),
            raster,
        }
    }
}

/// Rewrites `-input x` and `-to_dtm=1` style flags to their double-dash
/// form. Everything else is passed through untouched.
fn normalize_args<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            let Some(s) = arg.to_str() else {
                return arg;
            };
            let Some(flag) = s.strip_prefix('-') else {
                return arg;
            };
            if flag.starts_with('-') {
                return arg;
            }

            let name = flag.split('=').next().unwrap_or_default();
            if SINGLE_DASH_FLAGS.contains(&name) {
                OsString::from(format!("-{s}"))
            } else {
                arg
            }
        })
        .collect()
}

fn print_summary(summary: &RunSummary, rasterizing: bool) {
    println!(
        "{} tile(s) matched: {} downloaded ({} bytes), {} already present, {} failed",
        summary.matched,
        summary.downloaded,
        summary.bytes,
        summary.present,
        summary.download_failed
    );
    if rasterizing {
        println!(
            "{} file(s) rasterized, {} failed",
            summary.rasterized, summary.raster_failed
        );
    }
    if summary.cancelled {
        println!("Run interrupted before completion");
    }
}

/// 0 for `--help` and `--version`, 1 for any usage error.
fn usage_exit_status(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

fn try_main(cli: &Cli, cancel: &CancelToken) -> Result<RunSummary, Error> {
    let config = cli.run_config();
    let fetch = HttpFetch::new(Duration::from_secs(cli.timeout))?;
    let reporter = Reporter::new(cli.verbose == 1);

    let summary = pipeline::run(&config, &fetch, reporter, cancel)?;
    print_summary(&summary, config.raster.is_some());

    Ok(summary)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_exit_status(&e));
        }
    };

    let level = match cli.verbose {
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Warn,
    };
    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .init();

    let cancel = CancelToken::new();
    if let Err(e) = cancel.install_ctrlc_handler() {
        warn!("Ctrl-C handler unavailable: {e}");
    }

    match try_main(&cli, &cancel) {
        Ok(summary) => summary.exit_code(),
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
