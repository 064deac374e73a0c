//! Area of interest loaded from a vector file.

use std::path::Path;

use gdal::spatial_ref::SpatialRef;
use gdal::vector::{Geometry, LayerAccess};
use gdal::Dataset;

use crate::error::{Error, Result};

/// Axis-aligned envelope of a geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn of(geometry: &Geometry) -> Self {
        let env = geometry.envelope();
        Self {
            min_x: env.MinX,
            min_y: env.MinY,
            max_x: env.MaxX,
            max_y: env.MaxY,
        }
    }
}

#[derive(Debug)]
pub struct Boundary {
    geometry: Geometry,
    srs: Option<SpatialRef>,
}

impl Boundary {
    pub fn new(mut geometry: Geometry, srs: Option<SpatialRef>) -> Self {
        if let Some(srs) = &srs {
            geometry.set_spatial_ref(srs.clone());
        }
        Self { geometry, srs }
    }

    /// Reads the first layer of `path` and unions every feature geometry
    /// into one area.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ds = Dataset::open(path).map_err(|e| Error::file_format(path, e))?;
        if ds.layer_count() == 0 {
            return Err(Error::file_format(path, "no layer in dataset"));
        }

        let mut layer = ds.layer(0).map_err(|e| Error::file_format(path, e))?;
        let srs = layer.spatial_ref();

        let mut merged: Option<Geometry> = None;
        for feature in layer.features() {
            let Some(geometry) = feature.geometry() else {
                continue;
            };
            if geometry.is_empty() {
                continue;
            }

            merged = Some(match merged {
                None => geometry.clone(),
                Some(acc) => acc
                    .union(geometry)
                    .ok_or_else(|| Error::file_format(path, "could not merge boundary features"))?,
            });
        }

        let geometry =
            merged.ok_or_else(|| Error::file_format(path, "no feature with a geometry"))?;

        Ok(Self::new(geometry, srs))
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn spatial_ref(&self) -> Option<&SpatialRef> {
        self.srs.as_ref()
    }

    pub fn extent(&self) -> Extent {
        Extent::of(&self.geometry)
    }

    /// The boundary geometry expressed in `target`. Returned as is when
    /// both CRSs are the same or the boundary has none.
    pub fn geometry_in(&self, target: &SpatialRef) -> Result<Geometry> {
        match &self.srs {
            Some(srs) if srs != target => Ok(self.geometry.transform_to(target)?),
            _ => Ok(self.geometry.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{feature_collection, square, write_file};

    #[test]
    fn features_are_merged_into_one_extent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "aoi.geojson",
            &feature_collection(
                2154,
                &[(square(0.0, 0.0, 10.0), None), (square(20.0, 5.0, 10.0), None)],
            ),
        );

        let boundary = Boundary::from_path(&path).unwrap();
        let extent = boundary.extent();

        assert_eq!(extent.min_x, 0.0);
        assert_eq!(extent.min_y, 0.0);
        assert_eq!(extent.max_x, 30.0);
        assert_eq!(extent.max_y, 15.0);
        assert!(boundary.spatial_ref().is_some());
    }

    #[test]
    fn empty_collection_is_a_file_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "empty.geojson", &feature_collection(2154, &[]));

        let err = Boundary::from_path(&path).unwrap_err();
        assert!(matches!(err, Error::FileFormat { .. }), "{err}");
    }

    #[test]
    fn missing_file_is_a_file_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.shp");

        let err = Boundary::from_path(&path).unwrap_err();
        assert!(matches!(err, Error::FileFormat { .. }));
        assert!(err.to_string().contains("nope.shp"));
    }

    #[test]
    fn same_crs_geometry_is_untouched() {
        let srs = SpatialRef::from_epsg(2154).unwrap();
        let geometry = Geometry::from_wkt("POLYGON ((0 0,10 0,10 10,0 10,0 0))").unwrap();
        let boundary = Boundary::new(geometry, Some(srs.clone()));

        let same = boundary.geometry_in(&srs).unwrap();
        assert_eq!(Extent::of(&same), boundary.extent());
    }
}
