use crate::{
    components::{Band, DataType, Expression, FlagCoding, Mask, Product},
    errors::Result,
    operators::{
        require_bands, Initialization, MetadataTrigger, ParameterSchema, ParameterSpec,
        ParameterType, Parameters, PendingMetadata, PixelOperator,
    },
};

const SOURCES: [&str; 4] = ["iop_bpart", "iop_bwit", "iop_apig", "oos_rtosa"];
const TARGETS: [&str; 3] = ["conc_tsm", "conc_chl", "conc_flags"];
const RTOSA_OOS_FLAG: u8 = 1;

/// Total suspended matter and chlorophyll concentrations derived from
/// inherent optical properties, flagging out of scope top of atmosphere reflectances.
#[derive(Debug)]
pub struct IopConcentrationOp {
    tsm_fak_bpart: f64,
    tsm_fak_bwit: f64,
    chl_exp: f64,
    chl_fak: f64,
    threshold_rtosa_oos: f64,
    valid_pixel_expression: Option<Expression>,
}

impl Default for IopConcentrationOp {
    fn default() -> Self {
        Self {
            tsm_fak_bpart: 1.72,
            tsm_fak_bwit: 6.2,
            chl_exp: 1.04,
            chl_fak: 21.0,
            threshold_rtosa_oos: 0.05,
            valid_pixel_expression: None,
        }
    }
}

impl IopConcentrationOp {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PixelOperator for IopConcentrationOp {
    fn alias(&self) -> &str {
        "IopConcentration"
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![
            ParameterSpec::new("TSMfakBpart", ParameterType::Float)
                .with_default(1.72)
                .with_description("TSM factor, bpart"),
            ParameterSpec::new("TSMfakBwit", ParameterType::Float)
                .with_default(6.2)
                .with_description("TSM factor, bwit"),
            ParameterSpec::new("CHLexp", ParameterType::Float)
                .with_default(1.04)
                .with_description("Chlorophyll exponent"),
            ParameterSpec::new("CHLfak", ParameterType::Float)
                .with_default(21.0)
                .with_description("Chlorophyll factor"),
            ParameterSpec::new("thresholdRtosaOOS", ParameterType::Float)
                .with_default(0.05)
                .with_interval("[0, 1]")
                .with_description("Threshold for out of scope of nn training dataset flag for gas corrected TOSA reflectances"),
            ParameterSpec::new("validPixelExpression", ParameterType::Text)
                .with_default("")
                .with_description("Defines the pixels which are valid for processing"),
        ])
    }

    fn initialize(&mut self, source: &Product, parameters: &Parameters) -> Result<Initialization> {
        require_bands(source, SOURCES)?;
        self.tsm_fak_bpart = parameters.f64("TSMfakBpart")?;
        self.tsm_fak_bwit = parameters.f64("TSMfakBwit")?;
        self.chl_exp = parameters.f64("CHLexp")?;
        self.chl_fak = parameters.f64("CHLfak")?;
        self.threshold_rtosa_oos = parameters.f64("thresholdRtosaOOS")?;
        self.valid_pixel_expression = match parameters.text("validPixelExpression")?.trim() {
            "" => None,
            expression => {
                let expression: Expression = expression.parse()?;
                expression.compile(source)?;
                Some(expression)
            }
        };

        let shape = source.shape();
        let target = Product::new(
            format!("{}_conc", source.name()),
            "IOP_CONCENTRATION",
            shape,
        );
        target.copy_geocoding_from(source);
        target.add_band(
            Band::operator_target("conc_tsm", DataType::Float32, shape)
                .with_unit("g m^-3")
                .with_description("Total suspended matter dry weight concentration")
                .with_no_data(f64::NAN),
        )?;
        target.add_band(
            Band::operator_target("conc_chl", DataType::Float32, shape)
                .with_unit("mg m^-3")
                .with_description("Chlorophyll concentration")
                .with_no_data(f64::NAN),
        )?;

        let mut coding = FlagCoding::new("conc_flags");
        coding.add_flag(
            "Rtosa_OOS",
            RTOSA_OOS_FLAG as u64,
            "The input spectrum to atmospheric correction neural net was unknown",
        );
        target.add_flag_coding(coding);
        target.add_band(
            Band::operator_target("conc_flags", DataType::UInt8, shape)
                .with_flag_coding("conc_flags"),
        )?;
        target.add_mask(Mask::new(
            "Rtosa_OOS",
            "Input spectrum out of training range",
            "conc_flags.Rtosa_OOS",
            [255, 200, 0],
            0.5,
        ));

        let lineage = PendingMetadata::new(MetadataTrigger::Attached)
            .with("Processing_Graph.operator", self.alias())
            .with("Processing_Graph.source", source.name());
        Ok(Initialization::new(target).with_pending(lineage))
    }

    fn source_samples(&self) -> &[&str] {
        &SOURCES
    }

    fn target_samples(&self) -> &[&str] {
        &TARGETS
    }

    fn valid_pixel_expression(&self) -> Option<&Expression> {
        self.valid_pixel_expression.as_ref()
    }

    fn compute_pixel(&self, _x: usize, _y: usize, sources: &[f64], targets: &mut [f64]) {
        let [bpart, bwit, apig, oos_rtosa] = [sources[0], sources[1], sources[2], sources[3]];
        targets[0] = bpart * self.tsm_fak_bpart + bwit * self.tsm_fak_bwit;
        targets[1] = apig.powf(self.chl_exp) * self.chl_fak;
        targets[2] = if oos_rtosa > self.threshold_rtosa_oos {
            RTOSA_OOS_FLAG as f64
        } else {
            0.
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        components::MemoryBandReader,
        errors::RasterOpsError,
        operators::{ExecutionContext, Operator},
        scheduler::TileScheduler,
    };
    use rstest::{fixture, rstest};
    use std::sync::Arc;

    #[fixture]
    fn iop() -> Arc<Product> {
        let product = Product::new("C2RCC", "C2RCC_MERIS", (2, 2));
        let bands: [(&str, [f64; 4]); 5] = [
            ("iop_bpart", [1., 2., 0., 0.5]),
            ("iop_bwit", [0., 1., 1., 0.5]),
            ("iop_apig", [1., 0., 2., 0.5]),
            ("oos_rtosa", [0., 0.01, 0.2, 0.06]),
            ("water", [1., 1., 0., 1.]),
        ];
        for (name, values) in bands {
            let reader = MemoryBandReader::from_fn(DataType::Float32, (2, 2), |x, y| values[y * 2 + x]);
            product
                .add_band(Band::from_reader(name, DataType::Float32, (2, 2), Arc::new(reader)))
                .unwrap();
        }
        Arc::new(product)
    }

    #[rstest]
    fn concentrations_with_defaults(iop: Arc<Product>) {
        let scheduler = TileScheduler::default();
        let target = scheduler
            .attach(Operator::pixel(IopConcentrationOp::new()), iop, &Parameters::new())
            .unwrap();
        let ctx = ExecutionContext::default();
        let tiles = scheduler
            .tiles(&target, &["conc_tsm", "conc_chl", "conc_flags"], &target.bounds(), &ctx)
            .unwrap();
        let tsm = tiles[0].raw::<f32>().unwrap();
        assert!((tsm[1] - (2. * 1.72 + 6.2) as f32).abs() < 1e-5);
        assert!((tsm[2] - 6.2).abs() < 1e-5);
        let chl = tiles[1].raw::<f32>().unwrap();
        assert!((chl[0] - 21.).abs() < 1e-5);
        assert!((chl[2] - (2f64.powf(1.04) * 21.) as f32).abs() < 1e-4);
        assert_eq!(tiles[2].raw::<u8>().unwrap(), &[0, 0, 1, 1]);
        assert_eq!(scheduler.stats().computations, 1 + 4);
    }

    #[rstest]
    fn threshold_and_validity_parameters(iop: Arc<Product>) {
        let scheduler = TileScheduler::default();
        let parameters = Parameters::new()
            .with("thresholdRtosaOOS", 0.1)
            .with("validPixelExpression", "water > 0");
        let target = scheduler
            .attach(Operator::pixel(IopConcentrationOp::new()), iop, &parameters)
            .unwrap();
        let ctx = ExecutionContext::default();
        let flags = scheduler
            .tile(&target, "conc_flags", &target.bounds(), &ctx)
            .unwrap();
        assert_eq!(flags.raw::<u8>().unwrap(), &[0, 0, 0, 0]);
        let tsm = scheduler
            .tile(&target, "conc_tsm", &target.bounds(), &ctx)
            .unwrap();
        assert!(tsm.raw::<f32>().unwrap()[2].is_nan());
        assert!(!tsm.raw::<f32>().unwrap()[3].is_nan());
    }

    #[rstest]
    #[case(Parameters::new().with("thresholdRtosaOOS", 1.5))]
    #[case(Parameters::new().with("CHLexp", "steep"))]
    fn invalid_parameters(iop: Arc<Product>, #[case] parameters: Parameters) {
        let scheduler = TileScheduler::default();
        let result = scheduler.attach(Operator::pixel(IopConcentrationOp::new()), iop, &parameters);
        assert!(matches!(result, Err(RasterOpsError::ParameterValidation { .. })));
    }

    #[rstest]
    fn validity_expression_must_reference_known_bands(iop: Arc<Product>) {
        let scheduler = TileScheduler::default();
        let parameters = Parameters::new().with("validPixelExpression", "!l2_flags.CLOUD");
        let result = scheduler.attach(Operator::pixel(IopConcentrationOp::new()), iop, &parameters);
        assert!(matches!(result, Err(RasterOpsError::InvalidSource { .. })));
    }
}
