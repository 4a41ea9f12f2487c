use std::{fmt::Debug, sync::Arc};

use crate::{
    components::{
        data::{DataType, RasterData, Sample},
        PixelBounds,
    },
    errors::{RasterOpsError, Result},
};

/// Samples of one band over one [PixelBounds].
///
/// Pixels are addressed with absolute scene coordinates.
/// A tile is writable only while it is owned by the computation producing it;
/// cached tiles are handed out as `Arc<Tile>`.
#[derive(Clone, PartialEq)]
pub struct Tile {
    band: Arc<str>,
    bounds: PixelBounds,
    data: RasterData,
}

impl Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("band", &self.band)
            .field("bounds", &self.bounds)
            .field("data_type", &self.data.data_type())
            .finish()
    }
}

impl Tile {
    /// Zero filled tile.
    pub fn new(band: impl Into<Arc<str>>, data_type: DataType, bounds: PixelBounds) -> Self {
        Self {
            band: band.into(),
            bounds,
            data: RasterData::zeros(data_type, bounds.shape()),
        }
    }

    pub fn from_data(
        band: impl Into<Arc<str>>,
        bounds: PixelBounds,
        data: RasterData,
    ) -> Result<Self> {
        let band = band.into();
        if data.len() != bounds.size() || (!data.is_empty() && data.stride() != bounds.width()) {
            return Err(RasterOpsError::RasterSizeMismatch {
                band: band.to_string(),
                expected: bounds.shape(),
                actual: (data.stride(), data.len() / data.stride().max(1)),
            });
        }
        Ok(Self { band, bounds, data })
    }

    pub fn band_name(&self) -> &str {
        &self.band
    }

    pub fn bounds(&self) -> &PixelBounds {
        &self.bounds
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn data(&self) -> &RasterData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut RasterData {
        &mut self.data
    }

    pub fn into_data(self) -> RasterData {
        self.data
    }

    /// Samples per row of the backing buffer.
    pub fn stride(&self) -> usize {
        self.bounds.width()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.size_in_bytes()
    }

    fn offset(&self, x: usize, y: usize) -> Result<usize> {
        self.bounds
            .offset_of(x, y)
            .ok_or(RasterOpsError::OutOfBounds {
                x,
                y,
                bounds: self.bounds,
            })
    }

    pub fn get(&self, x: usize, y: usize) -> Result<f64> {
        Ok(self.data.get_f64(self.offset(x, y)?))
    }

    pub fn set(&mut self, x: usize, y: usize, value: f64) -> Result<()> {
        let offset = self.offset(x, y)?;
        self.data.set_f64(offset, value);
        Ok(())
    }

    pub fn get_sample<T: Sample>(&self, x: usize, y: usize) -> Result<T> {
        let offset = self.offset(x, y)?;
        Ok(self.data.as_slice::<T>()?[offset])
    }

    pub fn set_sample<T: Sample>(&mut self, x: usize, y: usize, value: T) -> Result<()> {
        let offset = self.offset(x, y)?;
        self.data.as_mut_slice::<T>()?[offset] = value;
        Ok(())
    }

    /// Flat row-major samples, see [Tile::stride].
    pub fn raw<T: Sample>(&self) -> Result<&[T]> {
        self.data.as_slice()
    }

    pub fn raw_mut<T: Sample>(&mut self) -> Result<&mut [T]> {
        self.data.as_mut_slice()
    }

    /// Bulk copy of all samples of `other`, which must cover the same bounds.
    pub fn copy_from(&mut self, other: &Tile) -> Result<()> {
        if self.bounds != other.bounds {
            return Err(RasterOpsError::RasterSizeMismatch {
                band: self.band.to_string(),
                expected: self.bounds.shape(),
                actual: other.bounds.shape(),
            });
        }
        self.data.copy_from(&other.data)
    }
}
