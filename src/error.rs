use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Boundary or tile index could not be read. Fatal.
    #[error("Cannot read {}: {reason}", path.display())]
    FileFormat { path: PathBuf, reason: String },

    /// A single tile could not be downloaded.
    #[error("Download of {filename} failed: {reason}")]
    Network { filename: String, reason: String },

    /// A single point cloud could not be rasterized.
    #[error("Rasterizing {filename} failed: {reason}")]
    Processing { filename: String, reason: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Interrupted by user")]
    Cancelled,

    #[error("{count} ground point(s), at least 3 are needed for a terrain model")]
    TooFewGroundPoints { count: usize },

    #[error("ground points are collinear, cannot build a terrain model")]
    CollinearGround,

    #[error("could not run {}: {reason}", program.display())]
    Spawn { program: PathBuf, reason: String },

    #[error("PDAL exited with {status}: {stderr}")]
    Pdal { status: String, stderr: String },

    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Las Error: {0}")]
    LasError(#[from] las::Error),

    #[error("GDAL Error: {0}")]
    GDALError(#[from] gdal::errors::GdalError),

    #[error("Triangulation Insertion Error: {0}")]
    InsertionError(#[from] spade::InsertionError),

    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn file_format(path: &Path, reason: impl ToString) -> Self {
        Error::FileFormat {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Wraps a lower level failure as the download error of `filename`.
    pub fn network(filename: &str, err: impl ToString) -> Self {
        Error::Network {
            filename: filename.to_string(),
            reason: err.to_string(),
        }
    }

    /// Wraps a lower level failure as the rasterization error of `filename`.
    pub fn processing(filename: &str, err: impl ToString) -> Self {
        Error::Processing {
            filename: filename.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
