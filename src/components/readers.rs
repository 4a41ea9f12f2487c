use crate::{
    components::{BandReader, DataType, PixelBounds, RasterData},
    errors::{RasterOpsError, Result},
};

/// [BandReader] over samples held in memory.
#[derive(Debug, Clone)]
pub struct MemoryBandReader {
    data: RasterData,
    /// (width, height)
    shape: (usize, usize),
}

impl MemoryBandReader {
    pub fn new(data: RasterData, shape: (usize, usize)) -> Result<Self> {
        if data.len() != shape.0 * shape.1 {
            return Err(RasterOpsError::RasterSizeMismatch {
                band: String::from("<memory>"),
                expected: shape,
                actual: (data.stride(), data.len() / data.stride().max(1)),
            });
        }
        Ok(Self { data, shape })
    }

    /// Band of `shape` with every sample computed by `f(x, y)`.
    pub fn from_fn(
        data_type: DataType,
        shape: (usize, usize),
        f: impl Fn(usize, usize) -> f64,
    ) -> Self {
        let mut data = RasterData::zeros(data_type, shape);
        for y in 0..shape.1 {
            for x in 0..shape.0 {
                data.set_f64(y * shape.0 + x, f(x, y));
            }
        }
        Self { data, shape }
    }
}

impl BandReader for MemoryBandReader {
    fn read_into(&self, bounds: &PixelBounds, data: &mut RasterData) -> Result<()> {
        if !PixelBounds::full(self.shape).contains_bounds(bounds) {
            return Err(RasterOpsError::OutOfBounds {
                x: bounds.x() + bounds.width(),
                y: bounds.y() + bounds.height(),
                bounds: PixelBounds::full(self.shape),
            });
        }
        for (row_idx, y) in bounds.rows().enumerate() {
            for (col_idx, x) in bounds.cols().enumerate() {
                let value = self.data.get_f64(y * self.shape.0 + x);
                data.set_f64(row_idx * bounds.width() + col_idx, value);
            }
        }
        Ok(())
    }
}
