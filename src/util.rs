use las::Bounds;

/// Largest grid allocated for one raster (2 GiB of f64 cells).
pub const MAX_CELLS: usize = 1 << 28;

/// North-up raster grid laid over the XY bounds of a point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub res: f64,
    pub width: usize,
    pub height: usize,
}

impl Grid {
    /// Fails when the grid at `res` would exceed `MAX_CELLS`.
    pub fn new(bounds: &Bounds, res: f64) -> Result<Self, String> {
        let (width, height) = get_raster_size(bounds, res)
            .ok_or_else(|| format!("resolution {res} gives a grid too large to index"))?;
        match width.checked_mul(height) {
            Some(cells) if cells <= MAX_CELLS => {}
            _ => {
                return Err(format!(
                    "resolution {res} gives a {width}x{height} grid, over the {MAX_CELLS} cell limit"
                ))
            }
        }

        Ok(Self {
            min_x: bounds.min.x,
            min_y: bounds.min.y,
            max_x: bounds.max.x,
            max_y: bounds.max.y,
            res,
            width,
            height,
        })
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    /// Row-major cell index of `(x, y)`, row 0 being the northern edge.
    /// Points on the max edges fall in the last column/row.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<usize> {
        if x < self.min_x || x > self.max_x || y < self.min_y || y > self.max_y {
            return None;
        }

        let col = (((x - self.min_x) / self.res).floor() as usize).min(self.width - 1);
        let row = (((self.max_y - y) / self.res).floor() as usize).min(self.height - 1);

        Some(row * self.width + col)
    }

    pub fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.min_x + self.res * (col as f64 + 0.5),
            self.max_y - self.res * (row as f64 + 0.5),
        )
    }

    pub fn geo_transform(&self) -> [f64; 6] {
        [self.min_x, self.res, 0.0, self.max_y, 0.0, -self.res]
    }
}

/// (width, height), or `None` when a side does not fit in a `usize`.
pub fn get_raster_size(bounds: &Bounds, res: f64) -> Option<(usize, usize)> {
    let side = |span: f64| {
        let n = (span / res).ceil();
        (n.is_finite() && n < usize::MAX as f64).then(|| (n as usize).max(1))
    };

    Some((side(bounds.max.x - bounds.min.x)?, side(bounds.max.y - bounds.min.y)?))
}
