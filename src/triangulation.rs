use spade::{DelaunayTriangulation, FloatTriangulation, HasPosition, Point2, Triangulation};

use crate::error::{Error, Result};
use crate::util::Grid;
use crate::NODATA;

#[derive(Debug, Copy, Clone)]
pub struct GroundPoint {
    position: Point2<f64>,
    z: f64,
}

impl GroundPoint {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Point2::new(x, y),
            z,
        }
    }
}

impl HasPosition for GroundPoint {
    type Scalar = f64;

    fn position(&self) -> Point2<Self::Scalar> {
        self.position
    }
}

/// Interpolates ground returns over `grid`: the digital terrain model.
/// Cells outside the convex hull of the points get `NODATA`.
pub fn terrain_model(points: Vec<GroundPoint>, grid: &Grid) -> Result<Vec<f64>> {
    if points.len() < 3 {
        return Err(Error::TooFewGroundPoints {
            count: points.len(),
        });
    }

    let t = DelaunayTriangulation::<GroundPoint>::bulk_load(points)?;
    if t.num_inner_faces() == 0 {
        return Err(Error::CollinearGround);
    }

    let interp = t.barycentric();
    let mut ret: Vec<f64> = Vec::with_capacity(grid.len());
    for row in 0..grid.height {
        for col in 0..grid.width {
            let (x, y) = grid.cell_center(col, row);

            let z = interp
                .interpolate(|v| v.data().z, Point2::new(x, y))
                .unwrap_or(NODATA);
            ret.push(z);
        }
    }

    Ok(ret)
}
