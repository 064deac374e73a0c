use crate::util::Grid;
use crate::NODATA;

/// Highest Z per cell: the digital surface model.
pub struct SurfaceBins {
    grid: Grid,
    data: Vec<f64>,
    outside: usize,
}

impl SurfaceBins {
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            data: vec![NODATA; grid.len()],
            outside: 0,
        }
    }

    pub fn insert(&mut self, x: f64, y: f64, z: f64) {
        match self.grid.cell_of(x, y) {
            Some(i) => {
                let cell = &mut self.data[i];
                if *cell == NODATA || z > *cell {
                    *cell = z;
                }
            }
            // Header bounds that don't cover every point.
            None => self.outside += 1,
        }
    }

    /// Points that fell outside the grid.
    pub fn outside(&self) -> usize {
        self.outside
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }
}
