use geo::{Coord, Rect};
use shrinkwraprs::Shrinkwrap;
use std::{fmt::Debug, ops::Range};

use crate::{errors::Result, intersection::Intersection};

/// Pixel rectangle of a raster.
///
/// Defined by:
///     - `offset`: Coords of the top left pixel,
///         with origin at the top left pixel of the raster.
///     - `shape`: (W, H) a.k.a. column row.
///
/// In the underlying impl `offset` is given by `.min`,
/// and the exclusive bottom right corner by `.max`.
#[derive(Shrinkwrap, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelBounds(Rect<usize>);

impl Debug for PixelBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PixelBounds[x={}, y={}, w={}, h={}]",
            self.x(),
            self.y(),
            self.width(),
            self.height()
        )
    }
}

impl From<Rect<usize>> for PixelBounds {
    fn from(value: Rect<usize>) -> Self {
        Self(value)
    }
}

impl Intersection for PixelBounds {
    type Output = PixelBounds;
    fn intersection(&self, rhs: &Self) -> Result<Self::Output> {
        Ok(PixelBounds(self.0.intersection(&rhs.0)?))
    }
}

impl PixelBounds {
    pub fn new(offset: (usize, usize), shape: (usize, usize)) -> Self {
        let offset = Coord::from(offset);
        let max = offset + Coord::from(shape);
        Self(Rect::new(offset, max))
    }

    /// Bounds covering a whole raster of `shape`.
    pub fn full(shape: (usize, usize)) -> Self {
        Self::new((0, 0), shape)
    }

    pub fn x(&self) -> usize {
        self.0.min().x
    }

    pub fn y(&self) -> usize {
        self.0.min().y
    }

    pub fn width(&self) -> usize {
        self.0.width()
    }

    pub fn height(&self) -> usize {
        self.0.height()
    }

    /// (width, height)
    pub fn shape(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    /// Pixel area.
    pub fn size(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn cols(&self) -> Range<usize> {
        self.x()..self.0.max().x
    }

    pub fn rows(&self) -> Range<usize> {
        self.y()..self.0.max().y
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        self.cols().contains(&x) && self.rows().contains(&y)
    }

    pub fn contains_bounds(&self, other: &PixelBounds) -> bool {
        other.x() >= self.x()
            && other.y() >= self.y()
            && other.0.max().x <= self.0.max().x
            && other.0.max().y <= self.0.max().y
    }

    /// Flat row-major index of absolute pixel (x, y) relative to these bounds.
    pub fn offset_of(&self, x: usize, y: usize) -> Option<usize> {
        self.contains(x, y)
            .then(|| (y - self.y()) * self.width() + (x - self.x()))
    }

    /// Splits into a regular grid of tiles of at most `tile_shape`, row by row.
    /// Tiles at the right and bottom edges are clipped.
    pub fn grid(&self, tile_shape: (usize, usize)) -> Vec<PixelBounds> {
        let (tile_width, tile_height) = (tile_shape.0.max(1), tile_shape.1.max(1));
        self.rows()
            .step_by(tile_height)
            .flat_map(|y| {
                self.cols().step_by(tile_width).map(move |x| {
                    let width = tile_width.min(self.0.max().x - x);
                    let height = tile_height.min(self.0.max().y - y);
                    PixelBounds::new((x, y), (width, height))
                })
            })
            .collect()
    }
}
