//! Boundary → tile index → downloads → optional rasters.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info, warn};

use crate::boundary::{Boundary, Extent};
use crate::cancel::CancelToken;
use crate::download::{Downloader, Fetch};
use crate::error::Result;
use crate::progress::Reporter;
use crate::raster::{RasterOptions, Rasterizer, GROUND};
use crate::tile_index::TileIndex;

/// Exit status after Ctrl-C, as a shell would report it.
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub index: PathBuf,
    pub url_field: String,
    /// `None` skips the raster stage.
    pub raster: Option<RasterOptions>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub matched: usize,
    pub downloaded: usize,
    pub present: usize,
    pub download_failed: usize,
    pub bytes: u64,
    pub rasterized: usize,
    pub raster_failed: usize,
    pub cancelled: bool,
}

impl RunSummary {
    /// Every attempted item of a stage failed.
    pub fn is_total_failure(&self) -> bool {
        let downloads_failed = self.download_failed > 0 && self.downloaded + self.present == 0;
        let rasters_failed = self.raster_failed > 0 && self.rasterized == 0;
        downloads_failed || rasters_failed
    }

    /// 0 on completion, even with some failed items; 1 when a whole
    /// stage failed; 130 when cancelled.
    pub fn exit_status(&self) -> u8 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if self.is_total_failure() {
            1
        } else {
            0
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

pub fn run<F: Fetch>(
    config: &RunConfig,
    fetch: &F,
    reporter: Reporter,
    cancel: &CancelToken,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    let boundary = Boundary::from_path(&config.input)?;
    let extent = boundary.extent();
    reporter.detail(&format!(
        "Boundary extent: [{}, {}] - [{}, {}]",
        extent.min_x, extent.min_y, extent.max_x, extent.max_y
    ));

    let index = TileIndex::open(&config.index, &config.url_field)?;
    let tiles = index.matching(&boundary)?;
    summary.matched = tiles.len();
    info!("{} tile(s) intersect {}", tiles.len(), config.input.display());
    for tile in &tiles {
        let e = Extent::of(&tile.footprint);
        reporter.detail(&format!(
            "{}: [{}, {}] - [{}, {}]",
            tile.filename, e.min_x, e.min_y, e.max_x, e.max_y
        ));
    }

    fs::create_dir_all(&config.output)?;

    info!("Downloading LidarHD data...");
    let report = Downloader::new(fetch, reporter).download_all(&tiles, &config.output, cancel);
    summary.downloaded = report.downloaded();
    summary.present = report.present();
    summary.download_failed = report.failed();
    summary.bytes = report.bytes();
    summary.cancelled = report.cancelled;

    let mut failed = Vec::new();
    for (filename, error) in report.failures() {
        warn!("{error}");
        failed.push(filename);
    }
    if !failed.is_empty() {
        warn!(
            "{} tile(s) not downloaded, run again to retry: {}",
            failed.len(),
            failed.join(", ")
        );
    }

    if summary.cancelled {
        return Ok(summary);
    }

    let Some(options) = &config.raster else {
        return Ok(summary);
    };

    let mut options = options.clone();
    if options.srs_wkt.is_none() {
        options.srs_wkt = index.spatial_ref()?.map(|srs| srs.to_wkt()).transpose()?;
    }
    if options.with_dtm && !options.classes.retains(GROUND) {
        warn!("Class filter excludes ground (2), terrain models will fail");
    }

    let files = report.available();
    let rasterizer = Rasterizer::new(options, reporter);
    let pb = reporter.items_bar(files.len(), "Rasterizing");

    info!("Rasterizing {} file(s)...", files.len());
    for file in files {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        match rasterizer.rasterize(file, &config.output) {
            Ok(_) => summary.rasterized += 1,
            Err(err) => {
                error!("{err}");
                summary.raster_failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(summary)
}
