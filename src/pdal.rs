//! Rasterization through an external PDAL executable.

use std::io::Write;
use std::path::Path;
use std::process::Command;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::raster::{ClassFilter, Product, GROUND};
use crate::NODATA;

#[derive(Debug, Serialize)]
pub struct Pipeline {
    pipeline: Vec<Stage>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum Stage {
    #[serde(rename = "readers.las")]
    ReadLas { filename: String },

    #[serde(rename = "filters.range")]
    Range { limits: String },

    #[serde(rename = "writers.gdal")]
    WriteGdal {
        filename: String,
        gdaldriver: &'static str,
        output_type: &'static str,
        resolution: f64,
        data_type: &'static str,
        nodata: f64,
    },
}

impl Pipeline {
    /// One PDAL pipeline per product: read, keep the requested classes,
    /// then grid. The terrain model additionally keeps ground returns only.
    pub fn new(input: &Path, output: &Path, classes: &ClassFilter, product: Product, res: f64) -> Self {
        let mut pipeline = vec![Stage::ReadLas {
            filename: input.to_string_lossy().into_owned(),
        }];

        if let ClassFilter::Codes(codes) = classes {
            pipeline.push(Stage::Range {
                limits: range_limits(codes.iter().copied()),
            });
        }

        let output_type = match product {
            Product::Dsm => "max",
            Product::Dtm => {
                pipeline.push(Stage::Range {
                    limits: range_limits([GROUND]),
                });
                "idw"
            }
        };

        pipeline.push(Stage::WriteGdal {
            filename: output.to_string_lossy().into_owned(),
            gdaldriver: "GTiff",
            output_type,
            resolution: res,
            data_type: "float32",
            nodata: NODATA,
        });

        Self { pipeline }
    }

    /// Writes the pipeline to a temporary JSON file and runs
    /// `<pdal> pipeline <file>`.
    pub fn run(&self, pdal: &Path) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("pdal-pipeline-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.flush()?;

        let output = Command::new(pdal)
            .arg("pipeline")
            .arg(file.path())
            .output()
            .map_err(|e| Error::Spawn {
                program: pdal.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::Pdal {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// `Classification[2:2],Classification[3:3]`: PDAL ORs ranges on the
/// same dimension.
fn range_limits(codes: impl IntoIterator<Item = u8>) -> String {
    codes
        .into_iter()
        .map(|c| format!("Classification[{c}:{c}]"))
        .collect::<Vec<_>>()
        .join(",")
}
