//! Local tile index: one footprint polygon per downloadable tile.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use gdal::spatial_ref::SpatialRef;
use gdal::vector::{Geometry, Layer, LayerAccess};
use gdal::Dataset;
use log::warn;

use crate::boundary::{Boundary, Extent};
use crate::error::{Error, Result};

/// Index shipped with the IGN LiDAR HD release.
pub const DEFAULT_INDEX: &str = "./data/TA_diff_pkk_lidarhd_classe.shp";

/// Column of the IGN index holding the download URL.
pub const DEFAULT_URL_FIELD: &str = "url_telech";

#[derive(Debug, Clone)]
pub struct TileRecord {
    pub filename: String,
    pub url: String,
    pub footprint: Geometry,
}

pub struct TileIndex {
    path: PathBuf,
    dataset: Dataset,
    url_field: usize,
}

impl TileIndex {
    pub fn open(path: &Path, url_field: &str) -> Result<Self> {
        let dataset = Dataset::open(path).map_err(|e| Error::file_format(path, e))?;
        if dataset.layer_count() == 0 {
            return Err(Error::file_format(path, "no layer in dataset"));
        }

        let url_field = {
            let layer = dataset.layer(0).map_err(|e| Error::file_format(path, e))?;
            let index = layer.defn().fields().position(|f| f.name() == url_field);
            index.ok_or_else(|| {
                Error::file_format(path, format!("no '{url_field}' attribute in tile index"))
            })?
        };

        Ok(Self {
            path: path.to_path_buf(),
            dataset,
            url_field,
        })
    }

    pub fn spatial_ref(&self) -> Result<Option<SpatialRef>> {
        Ok(self.layer()?.spatial_ref())
    }

    /// Tiles whose footprint intersects `boundary`, in index order and
    /// without duplicate URLs.
    pub fn matching(&self, boundary: &Boundary) -> Result<Vec<TileRecord>> {
        let mut layer = self.layer()?;

        let area = match (layer.spatial_ref(), boundary.spatial_ref()) {
            (Some(index_srs), Some(_)) => boundary.geometry_in(&index_srs)?,
            (Some(_), None) => {
                warn!("Boundary has no CRS, assuming it matches the tile index");
                boundary.geometry().clone()
            }
            _ => boundary.geometry().clone(),
        };

        let extent = Extent::of(&area);
        layer.set_spatial_filter_rect(extent.min_x, extent.min_y, extent.max_x, extent.max_y);
        layer.reset_feature_reading();

        let mut seen = HashSet::new();
        let mut tiles = Vec::new();
        for feature in layer.features() {
            let Some(footprint) = feature.geometry() else {
                continue;
            };
            if !footprint.intersects(&area) {
                continue;
            }

            let Some(url) = feature.field_as_string(self.url_field)? else {
                warn!("Tile without a download URL in {}", self.path.display());
                continue;
            };
            let Some(filename) = filename_from_url(&url) else {
                warn!("Cannot derive a file name from '{url}', skipping");
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }

            tiles.push(TileRecord {
                filename,
                url,
                footprint: footprint.clone(),
            });
        }

        layer.clear_spatial_filter();
        Ok(tiles)
    }

    fn layer(&self) -> Result<Layer<'_>> {
        self.dataset
            .layer(0)
            .map_err(|e| Error::file_format(&self.path, e))
    }
}

/// Last path segment of `url`, without query string or fragment.
pub fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let name = path.trim_end_matches('/').rsplit('/').next()?.trim();

    match name {
        "" | "." | ".." => None,
        _ if name.contains(':') || name.contains('\\') => None,
        _ => Some(name.to_string()),
    }
}
