use crate::{
    components::{Band, DataType, FlagCoding, Mask, PixelBounds, Product},
    errors::Result,
    operators::{
        require_bands, ExecutionContext, Initialization, MetadataTrigger, Parameters,
        PendingMetadata, SourceTiles, TargetTiles, TileStackOperator,
    },
};

pub const NDVI_PRODUCT_TYPE: &str = "MER_NDVI2P";
pub const NDVI_BAND_NAME: &str = "ndvi";
pub const NDVI_FLAGS_BAND_NAME: &str = "ndvi_flags";
pub const NDVI_ARITHMETIC_FLAG_NAME: &str = "NDVI_ARITHMETIC";
pub const NDVI_LOW_FLAG_NAME: &str = "NDVI_NEGATIVE";
pub const NDVI_HIGH_FLAG_NAME: &str = "NDVI_SATURATION";
pub const NDVI_ARITHMETIC_FLAG_VALUE: i32 = 1;
pub const NDVI_LOW_FLAG_VALUE: i32 = 1 << 1;
pub const NDVI_HIGH_FLAG_VALUE: i32 = 1 << 2;
pub const LOWER_INPUT_BAND_NAME: &str = "radiance_6";
pub const UPPER_INPUT_BAND_NAME: &str = "radiance_10";

/// Normalized difference vegetation index of MERIS level 1 radiances,
/// `(upper - lower) / (upper + lower)`, with quality flags.
///
/// Flag bands of the source (e.g. `l1_flags`) are copied to the target.
#[derive(Debug, Default)]
pub struct NdviOp {
    flag_bands: Vec<String>,
}

impl NdviOp {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag_coding() -> FlagCoding {
        let mut coding = FlagCoding::new(NDVI_FLAGS_BAND_NAME).with_description("NDVI Flag Coding");
        coding.add_flag(
            NDVI_ARITHMETIC_FLAG_NAME,
            NDVI_ARITHMETIC_FLAG_VALUE as u64,
            "NDVI value calculation failed due to an arithmetic exception",
        );
        coding.add_flag(
            NDVI_LOW_FLAG_NAME,
            NDVI_LOW_FLAG_VALUE as u64,
            "NDVI value is too low",
        );
        coding.add_flag(
            NDVI_HIGH_FLAG_NAME,
            NDVI_HIGH_FLAG_VALUE as u64,
            "NDVI value is too high",
        );
        coding
    }

    fn flag_mask(flag: &str, description: &str, color: [u8; 3]) -> Mask {
        Mask::new(
            flag,
            description,
            format!("{NDVI_FLAGS_BAND_NAME}.{flag}"),
            color,
            0.7,
        )
    }
}

/// NDVI and flags of one pixel. A non finite ratio is replaced by 0.
pub fn ndvi(lower: f32, upper: f32) -> (f32, i32) {
    let mut value = (upper - lower) / (upper + lower);
    let mut flags = 0;
    if !value.is_finite() {
        flags |= NDVI_ARITHMETIC_FLAG_VALUE;
        value = 0.;
    }
    if value < 0. {
        flags |= NDVI_LOW_FLAG_VALUE;
    }
    if value > 1. {
        flags |= NDVI_HIGH_FLAG_VALUE;
    }
    (value, flags)
}

impl TileStackOperator for NdviOp {
    fn alias(&self) -> &str {
        "NdviSample"
    }

    fn initialize(&mut self, source: &Product, _parameters: &Parameters) -> Result<Initialization> {
        require_bands(source, [LOWER_INPUT_BAND_NAME, UPPER_INPUT_BAND_NAME])?;
        let shape = source.shape();
        let target = Product::new("ndvi", NDVI_PRODUCT_TYPE, shape);
        target.add_band(Band::operator_target(NDVI_BAND_NAME, DataType::Float32, shape))?;
        target.copy_geocoding_from(source);
        self.flag_bands = target.copy_flag_bands_from(source)?;

        target.add_flag_coding(Self::flag_coding());
        target.add_band(
            Band::operator_target(NDVI_FLAGS_BAND_NAME, DataType::Int32, shape)
                .with_description("NDVI specific flags")
                .with_flag_coding(NDVI_FLAGS_BAND_NAME),
        )?;

        target.copy_masks_from(source);
        target.add_mask(Self::flag_mask(
            NDVI_ARITHMETIC_FLAG_NAME,
            "An arithmetic exception occured.",
            [255, 0, 0],
        ));
        target.add_mask(Self::flag_mask(
            NDVI_LOW_FLAG_NAME,
            "NDVI value is too low.",
            [255, 0, 0],
        ));
        target.add_mask(Self::flag_mask(
            NDVI_HIGH_FLAG_NAME,
            "NDVI value is too high.",
            [178, 0, 0],
        ));

        let lineage = PendingMetadata::new(MetadataTrigger::Attached)
            .with("Processing_Graph.operator", self.alias())
            .with("Processing_Graph.source", source.name());
        let state = PendingMetadata::new(MetadataTrigger::FirstTileComputed)
            .with("Processing_Graph.state", "computing");
        Ok(Initialization::new(target)
            .with_pending(lineage)
            .with_pending(state))
    }

    fn source_bands(&self) -> Vec<String> {
        [LOWER_INPUT_BAND_NAME, UPPER_INPUT_BAND_NAME]
            .into_iter()
            .map(String::from)
            .chain(self.flag_bands.iter().cloned())
            .collect()
    }

    fn compute_tile_stack(
        &self,
        targets: &mut TargetTiles,
        bounds: &PixelBounds,
        sources: &SourceTiles,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let task = ctx.task("Computing NDVI", bounds.height() + 1);

        for band in &self.flag_bands {
            let source = sources.tile(band, bounds)?;
            targets.get_mut(band)?.copy_from(&source)?;
        }
        task.worked(1);

        let lower = sources.tile(LOWER_INPUT_BAND_NAME, bounds)?;
        let upper = sources.tile(UPPER_INPUT_BAND_NAME, bounds)?;
        let (ndvi_tile, flags_tile) = targets.pair_mut(NDVI_BAND_NAME, NDVI_FLAGS_BAND_NAME)?;

        for y in bounds.rows() {
            for x in bounds.cols() {
                let (value, flags) = ndvi(lower.get(x, y)? as f32, upper.get(x, y)? as f32);
                ndvi_tile.set_sample(x, y, value)?;
                flags_tile.set_sample(x, y, flags)?;
            }
            ctx.check_cancelled()?;
            task.worked(1);
        }
        Ok(())
    }
}
