use geo::{AffineTransform, Coord};

/// Maps pixel coordinates to geographic coordinates with an affine transform
/// `(a, b, xoff, d, e, yoff)` as found in GDAL style geo transforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoding {
    pixel_to_geo: AffineTransform,
    geo_to_pixel: Option<AffineTransform>,
}

impl From<AffineTransform> for GeoCoding {
    fn from(pixel_to_geo: AffineTransform) -> Self {
        Self {
            pixel_to_geo,
            geo_to_pixel: pixel_to_geo.inverse(),
        }
    }
}

impl GeoCoding {
    pub fn new(a: f64, b: f64, xoff: f64, d: f64, e: f64, yoff: f64) -> Self {
        Self::from(AffineTransform::new(a, b, xoff, d, e, yoff))
    }

    /// From the six coefficients of a GDAL geo transform.
    pub fn from_gdal(transform: [f64; 6]) -> Self {
        Self::new(
            transform[1],
            transform[2],
            transform[0],
            transform[4],
            transform[5],
            transform[3],
        )
    }

    pub fn transform(&self) -> &AffineTransform {
        &self.pixel_to_geo
    }

    pub fn can_get_pixel_pos(&self) -> bool {
        self.geo_to_pixel.is_some()
    }

    /// Geographic position of the centre of pixel (x, y).
    pub fn geo_pos(&self, x: usize, y: usize) -> Coord<f64> {
        self.pixel_to_geo.apply(Coord {
            x: x as f64 + 0.5,
            y: y as f64 + 0.5,
        })
    }

    /// Geographic position of a fractional pixel position.
    pub fn geo_pos_of(&self, pixel_pos: Coord<f64>) -> Coord<f64> {
        self.pixel_to_geo.apply(pixel_pos)
    }

    /// Fractional pixel position of `geo_pos`, if the transform is invertible.
    pub fn pixel_pos(&self, geo_pos: Coord<f64>) -> Option<Coord<f64>> {
        self.geo_to_pixel.map(|transform| transform.apply(geo_pos))
    }
}
