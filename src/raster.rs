//! Point cloud to elevation rasters.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use gdal::raster::Buffer;
use gdal::DriverManager;
use las::Reader;
use log::warn;

use crate::binning::SurfaceBins;
use crate::error::{Error, Result};
use crate::pdal::Pipeline;
use crate::progress::Reporter;
use crate::triangulation::{terrain_model, GroundPoint};
use crate::util::Grid;
use crate::NODATA;

/// ASPRS classification code for ground returns.
pub const GROUND: u8 = 2;

/// Extensions stripped from a tile name to build raster names, longest
/// first.
const POINT_CLOUD_EXTENSIONS: [&str; 3] = [".copc.laz", ".laz", ".las"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassFilter {
    All,
    Codes(BTreeSet<u8>),
}

impl ClassFilter {
    pub fn codes(codes: impl IntoIterator<Item = u8>) -> Self {
        ClassFilter::Codes(codes.into_iter().collect())
    }

    pub fn retains(&self, code: u8) -> bool {
        match self {
            ClassFilter::All => true,
            ClassFilter::Codes(codes) => codes.contains(&code),
        }
    }
}

#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// In-process: max binning for the DSM, Delaunay interpolation for the DTM.
    Native,
    /// External `pdal pipeline` run.
    Pdal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    /// Highest return surface.
    Dsm,
    /// Ground returns only.
    Dtm,
}

impl Product {
    fn suffix(self) -> &'static str {
        match self {
            Product::Dsm => "DSM",
            Product::Dtm => "DTM",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RasterOptions {
    pub classes: ClassFilter,
    pub resolution: f64,
    pub with_dtm: bool,
    pub engine: Engine,
    pub pdal: PathBuf,
    /// CRS written to the rasters (native engine only; PDAL takes it from
    /// the point cloud).
    pub srs_wkt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterOutputs {
    pub dsm: PathBuf,
    pub dtm: Option<PathBuf>,
}

impl RasterOutputs {
    pub fn for_input(input: &Path, output_dir: &Path, with_dtm: bool) -> Self {
        Self {
            dsm: output_path(input, output_dir, Product::Dsm),
            dtm: with_dtm.then(|| output_path(input, output_dir, Product::Dtm)),
        }
    }
}

/// `<output_dir>/<stem>_DSM.tif` for `<stem>.copc.laz`.
pub fn output_path(input: &Path, output_dir: &Path, product: Product) -> PathBuf {
    let name = file_name(input);
    let stem = POINT_CLOUD_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(&name);

    output_dir.join(format!("{stem}_{}.tif", product.suffix()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn validate_resolution(res: f64) -> std::result::Result<(), String> {
    if res.is_finite() && res > 0.0 {
        Ok(())
    } else {
        Err(format!("resolution must be a positive number, got {res}"))
    }
}

pub struct Rasterizer {
    options: RasterOptions,
    reporter: Reporter,
}

impl Rasterizer {
    pub fn new(options: RasterOptions, reporter: Reporter) -> Self {
        Self { options, reporter }
    }

    /// Writes the DSM, and the DTM when requested, of `input` into
    /// `output_dir`. Every failure is a `Processing` error naming the file.
    pub fn rasterize(&self, input: &Path, output_dir: &Path) -> Result<RasterOutputs> {
        let filename = file_name(input);
        validate_resolution(self.options.resolution)
            .map_err(|reason| Error::processing(&filename, reason))?;

        let outputs = RasterOutputs::for_input(input, output_dir, self.options.with_dtm);
        self.reporter.detail(&format!("Rasterizing {filename}"));

        let result = match self.options.engine {
            Engine::Native => self.rasterize_native(input, &outputs),
            Engine::Pdal => self.rasterize_pdal(input, &outputs),
        };

        match result {
            Ok(()) => Ok(outputs),
            Err(err @ Error::Processing { .. }) => Err(err),
            Err(err) => Err(Error::processing(&filename, err)),
        }
    }

    fn rasterize_native(&self, input: &Path, outputs: &RasterOutputs) -> Result<()> {
        let filename = file_name(input);
        let mut reader = Reader::from_path(input)?;
        let grid = Grid::new(&reader.header().bounds(), self.options.resolution)
            .map_err(|reason| Error::processing(&filename, reason))?;

        let mut surface = SurfaceBins::new(grid);
        let mut ground: Vec<GroundPoint> = Vec::new();
        let mut kept = 0usize;

        for point in reader.points() {
            let point = point?;
            let class = u8::from(point.classification);
            if !self.options.classes.retains(class) {
                continue;
            }

            kept += 1;
            surface.insert(point.x, point.y, point.z);
            if self.options.with_dtm && class == GROUND {
                ground.push(GroundPoint::new(point.x, point.y, point.z));
            }
        }

        if kept == 0 {
            return Err(Error::processing(
                &filename,
                "no point left after the classification filter",
            ));
        }
        if surface.outside() > 0 {
            warn!(
                "{} point(s) outside the header bounds of {} were ignored",
                surface.outside(),
                input.display()
            );
        }

        self.reporter
            .detail(&format!("Writing {}...", outputs.dsm.display()));
        self.write_geotiff(&outputs.dsm, &grid, surface.into_data())?;

        if let Some(dtm) = &outputs.dtm {
            self.reporter.detail(&format!(
                "Interpolating {} ground point(s) for {filename}...",
                ground.len()
            ));
            let data = terrain_model(ground, &grid)?;
            self.reporter.detail(&format!("Writing {}...", dtm.display()));
            self.write_geotiff(dtm, &grid, data)?;
        }

        Ok(())
    }

    fn rasterize_pdal(&self, input: &Path, outputs: &RasterOutputs) -> Result<()> {
        let mut products = vec![(Product::Dsm, &outputs.dsm)];
        if let Some(dtm) = &outputs.dtm {
            products.push((Product::Dtm, dtm));
        }

        for (product, output) in products {
            Pipeline::new(
                input,
                output,
                &self.options.classes,
                product,
                self.options.resolution,
            )
            .run(&self.options.pdal)?;
        }

        Ok(())
    }

    fn write_geotiff(&self, path: &Path, grid: &Grid, data: Vec<f64>) -> Result<()> {
        let (width, height) = (grid.width, grid.height);
        let mut ds = DriverManager::get_driver_by_name("GTiff")?
            .create_with_band_type::<f64, _>(path, width, height, 1)?;

        ds.set_geo_transform(&grid.geo_transform())?;
        if let Some(wkt) = &self.options.srs_wkt {
            ds.set_projection(wkt)?;
        }

        let mut rb = ds.rasterband(1)?;
        rb.set_no_data_value(Some(NODATA))?;
        rb.write(
            (0, 0),
            (width, height),
            &mut Buffer::new((width, height), data),
        )?;

        Ok(())
    }
}
