mod concentration;
mod context;
mod ndvi;
mod params;
mod pixel;

pub use concentration::IopConcentrationOp;
pub use context::{
    CancellationToken, ExecutionContext, LogProgressMonitor, NullProgressMonitor, ProgressCounter,
    ProgressMonitor, ProgressTask,
};
pub use ndvi::NdviOp;
pub use params::{Interval, ParameterSchema, ParameterSpec, ParameterType, ParameterValue, Parameters};
pub use pixel::PixelOperator;

use std::{fmt::Debug, sync::Arc};

use crate::{
    components::{Band, PixelBounds, Product, Tile},
    errors::{RasterOpsError, Result},
    scheduler::TileScheduler,
};

/// Computes every target tile of a rectangle in one call.
pub trait TileStackOperator: Send + Sync {
    /// Short name the operator is known by.
    fn alias(&self) -> &str;

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::default()
    }

    /// Checks the source bands and builds the target product.
    /// Called once with already resolved `parameters`, never reads pixels.
    fn initialize(&mut self, source: &Product, parameters: &Parameters) -> Result<Initialization>;

    /// Bands of the source product read by [TileStackOperator::compute_tile_stack].
    fn source_bands(&self) -> Vec<String>;

    /// Fills all `targets`, which cover `bounds`.
    fn compute_tile_stack(
        &self,
        targets: &mut TargetTiles,
        bounds: &PixelBounds,
        sources: &SourceTiles,
        ctx: &ExecutionContext,
    ) -> Result<()>;
}

/// When a [PendingMetadata] entry is written to the target product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataTrigger {
    /// As soon as the operator is attached to a scheduler.
    Attached,
    /// After the first target tile was computed successfully.
    FirstTileComputed,
}

/// Metadata attributes to add to the target product once `trigger` happens.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMetadata {
    pub trigger: MetadataTrigger,
    pub attributes: Vec<(String, String)>,
}

impl PendingMetadata {
    pub fn new(trigger: MetadataTrigger) -> Self {
        Self {
            trigger,
            attributes: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub(crate) fn apply(&self, product: &Product) {
        product.update_metadata(|metadata| {
            self.attributes
                .iter()
                .for_each(|(key, value)| metadata.insert(key.as_str(), value.as_str()))
        })
    }
}

/// Result of operator initialization.
#[derive(Debug)]
pub struct Initialization {
    pub target: Product,
    pub pending: Vec<PendingMetadata>,
}

impl Initialization {
    pub fn new(target: Product) -> Self {
        Self {
            target,
            pending: Vec::new(),
        }
    }

    pub fn with_pending(mut self, pending: PendingMetadata) -> Self {
        self.pending.push(pending);
        self
    }
}

/// The two computation styles an operator can be written in.
pub enum Operator {
    Pixel(Box<dyn PixelOperator>),
    TileStack(Box<dyn TileStackOperator>),
}

impl Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Pixel(op) => write!(f, "Operator::Pixel({})", op.alias()),
            Operator::TileStack(op) => write!(f, "Operator::TileStack({})", op.alias()),
        }
    }
}

impl Operator {
    pub fn pixel(operator: impl PixelOperator + 'static) -> Self {
        Operator::Pixel(Box::new(operator))
    }

    pub fn tile_stack(operator: impl TileStackOperator + 'static) -> Self {
        Operator::TileStack(Box::new(operator))
    }

    pub fn alias(&self) -> &str {
        match self {
            Operator::Pixel(op) => op.alias(),
            Operator::TileStack(op) => op.alias(),
        }
    }

    pub fn parameter_schema(&self) -> ParameterSchema {
        match self {
            Operator::Pixel(op) => op.parameter_schema(),
            Operator::TileStack(op) => op.parameter_schema(),
        }
    }

    /// Resolves `parameters` against the schema, then initializes.
    pub fn initialize(&mut self, source: &Product, parameters: &Parameters) -> Result<Initialization> {
        let parameters = self.parameter_schema().resolve(parameters)?;
        match self {
            Operator::Pixel(op) => op.initialize(source, &parameters),
            Operator::TileStack(op) => op.initialize(source, &parameters),
        }
    }

    /// Source bands the computation depends on, validity expression references included.
    pub fn source_bands(&self) -> Vec<String> {
        match self {
            Operator::Pixel(op) => pixel::source_bands(op.as_ref()),
            Operator::TileStack(op) => op.source_bands(),
        }
    }

    pub(crate) fn compute(
        &self,
        targets: &mut TargetTiles,
        bounds: &PixelBounds,
        sources: &SourceTiles,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        match self {
            Operator::Pixel(op) => pixel::compute_tiles(op.as_ref(), targets, bounds, sources, ctx),
            Operator::TileStack(op) => op.compute_tile_stack(targets, bounds, sources, ctx),
        }
    }
}

/// Checks that `source` has every band in `names`.
pub fn require_bands<'a>(
    source: &Product,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<Arc<Band>>> {
    names
        .into_iter()
        .map(|name| source.band(name).map_err(|_| source.invalid_source(name)))
        .collect()
}

/// Source tile access handed to a computing operator.
///
/// Tiles are requested through the scheduler, so they are cached
/// and shared with every other consumer.
pub struct SourceTiles<'a> {
    scheduler: &'a TileScheduler,
    product: &'a Arc<Product>,
    ctx: ExecutionContext,
}

impl<'a> SourceTiles<'a> {
    pub(crate) fn new(
        scheduler: &'a TileScheduler,
        product: &'a Arc<Product>,
        ctx: &ExecutionContext,
    ) -> Self {
        Self {
            scheduler,
            product,
            ctx: ctx.for_sources(),
        }
    }

    pub fn product(&self) -> &Product {
        self.product
    }

    pub fn tile(&self, band: &str, bounds: &PixelBounds) -> Result<Arc<Tile>> {
        self.scheduler
            .tile(self.product, band, bounds, &self.ctx)
            .map_err(|err| match err {
                RasterOpsError::UnknownBand { .. } => self.product.invalid_source(band),
                err => err,
            })
    }
}

/// Writable tiles of all target bands over one rectangle.
#[derive(Debug)]
pub struct TargetTiles {
    bands: Vec<Arc<Band>>,
    tiles: Vec<Tile>,
}

impl TargetTiles {
    pub(crate) fn new(bands: Vec<Arc<Band>>, bounds: &PixelBounds) -> Self {
        let tiles = bands
            .iter()
            .map(|band| Tile::new(band.shared_name(), band.data_type(), *bounds))
            .collect();
        Self { bands, tiles }
    }

    fn position(&self, band: &str) -> Result<usize> {
        self.bands
            .iter()
            .position(|candidate| candidate.name() == band)
            .ok_or_else(|| RasterOpsError::computation(band, "not a target band of this operator"))
    }

    pub fn band_names(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().map(|band| band.name())
    }

    pub fn band(&self, name: &str) -> Result<&Band> {
        Ok(&self.bands[self.position(name)?])
    }

    pub fn get(&self, band: &str) -> Result<&Tile> {
        Ok(&self.tiles[self.position(band)?])
    }

    pub fn get_mut(&mut self, band: &str) -> Result<&mut Tile> {
        let idx = self.position(band)?;
        Ok(&mut self.tiles[idx])
    }

    /// Two distinct target tiles, writable at the same time.
    pub fn pair_mut(&mut self, first: &str, second: &str) -> Result<(&mut Tile, &mut Tile)> {
        let (first_idx, second_idx) = (self.position(first)?, self.position(second)?);
        if first_idx == second_idx {
            return Err(RasterOpsError::computation(first, "requested twice"));
        }
        let split = first_idx.max(second_idx);
        let (head, tail) = self.tiles.split_at_mut(split);
        if first_idx < second_idx {
            Ok((&mut head[first_idx], &mut tail[0]))
        } else {
            Ok((&mut tail[0], &mut head[second_idx]))
        }
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&Band, &mut Tile)> {
        self.bands
            .iter()
            .map(|band| band.as_ref())
            .zip(self.tiles.iter_mut())
    }

    pub(crate) fn into_tiles(self) -> Vec<Tile> {
        self.tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::DataType;

    fn targets() -> TargetTiles {
        let bands = ["a", "b", "c"]
            .into_iter()
            .map(|name| Arc::new(Band::operator_target(name, DataType::Float32, (2, 2))))
            .collect();
        TargetTiles::new(bands, &PixelBounds::full((2, 2)))
    }

    #[test]
    fn pair_mut_in_both_orders() {
        let mut targets = targets();
        let (c, a) = targets.pair_mut("c", "a").unwrap();
        c.set(0, 0, 3.).unwrap();
        a.set(0, 0, 1.).unwrap();
        assert_eq!(targets.get("a").unwrap().get(0, 0).unwrap(), 1.);
        assert_eq!(targets.get("c").unwrap().get(0, 0).unwrap(), 3.);
        assert!(targets.pair_mut("b", "b").is_err());
        assert!(targets.pair_mut("b", "x").is_err());
    }

    #[test]
    fn missing_source_band_is_reported_by_name() {
        let product = Product::new("src", "T", (2, 2));
        product
            .add_band(Band::operator_target("radiance_6", DataType::Float32, (2, 2)))
            .unwrap();
        let err = require_bands(&product, ["radiance_6", "radiance_10"]).unwrap_err();
        assert!(matches!(err, RasterOpsError::InvalidSource { band, .. } if band == "radiance_10"));
    }

    #[test]
    fn pending_metadata_is_applied() {
        let product = Product::new("p", "T", (1, 1));
        PendingMetadata::new(MetadataTrigger::Attached)
            .with("operator", "NdviSample")
            .apply(&product);
        assert_eq!(product.metadata().get("operator"), Some("NdviSample"));
    }
}
