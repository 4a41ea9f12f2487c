use itertools::Itertools;

use crate::{
    components::{Expression, PixelBounds, Product},
    errors::Result,
    operators::{
        ExecutionContext, Initialization, ParameterSchema, Parameters, SourceTiles, TargetTiles,
    },
};

/// Operator computing each target sample from the source samples at the same pixel.
pub trait PixelOperator: Send + Sync {
    fn alias(&self) -> &str;

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::default()
    }

    fn initialize(&mut self, source: &Product, parameters: &Parameters) -> Result<Initialization>;

    /// Source bands, in the order passed to [PixelOperator::compute_pixel].
    fn source_samples(&self) -> &[&str];

    /// Target bands, in the order filled by [PixelOperator::compute_pixel].
    fn target_samples(&self) -> &[&str];

    /// Pixels failing this expression are set to the target no-data value, or 0.
    fn valid_pixel_expression(&self) -> Option<&Expression> {
        None
    }

    fn compute_pixel(&self, x: usize, y: usize, sources: &[f64], targets: &mut [f64]);
}

pub(crate) fn source_bands(operator: &dyn PixelOperator) -> Vec<String> {
    let validity = operator
        .valid_pixel_expression()
        .map(|expression| expression.references())
        .unwrap_or_default();
    operator
        .source_samples()
        .iter()
        .copied()
        .chain(validity)
        .unique()
        .map(String::from)
        .collect()
}

pub(crate) fn compute_tiles(
    operator: &dyn PixelOperator,
    targets: &mut TargetTiles,
    bounds: &PixelBounds,
    sources: &SourceTiles,
    ctx: &ExecutionContext,
) -> Result<()> {
    let source_tiles = operator
        .source_samples()
        .iter()
        .map(|band| sources.tile(band, bounds))
        .collect::<Result<Vec<_>>>()?;
    let validity = match operator.valid_pixel_expression() {
        Some(expression) => {
            let compiled = expression.compile(sources.product())?;
            let tiles = compiled
                .bands()
                .iter()
                .map(|band| sources.tile(band, bounds))
                .collect::<Result<Vec<_>>>()?;
            Some((compiled, tiles))
        }
        None => None,
    };
    let target_names = operator.target_samples();
    let no_data = target_names
        .iter()
        .map(|name| Ok(targets.band(name)?.no_data().unwrap_or(0.)))
        .collect::<Result<Vec<f64>>>()?;

    let mut source_values = vec![0.; source_tiles.len()];
    let mut target_values = vec![0.; target_names.len()];
    let mut validity_values = vec![0.; validity.as_ref().map_or(0, |(_, tiles)| tiles.len())];

    let task = ctx.task(operator.alias(), bounds.height());
    for y in bounds.rows() {
        ctx.check_cancelled()?;
        for x in bounds.cols() {
            let valid = match &validity {
                Some((expression, tiles)) => {
                    for (value, tile) in validity_values.iter_mut().zip(tiles) {
                        *value = tile.get(x, y)?;
                    }
                    expression.eval_bool(&validity_values)
                }
                None => true,
            };
            if valid {
                for (value, tile) in source_values.iter_mut().zip(&source_tiles) {
                    *value = tile.get(x, y)?;
                }
                operator.compute_pixel(x, y, &source_values, &mut target_values);
            } else {
                target_values.copy_from_slice(&no_data);
            }
            for (name, value) in target_names.iter().zip(&target_values) {
                targets.get_mut(name)?.set(x, y, *value)?;
            }
        }
        task.worked(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        components::{Band, DataType, MemoryBandReader},
        errors::RasterOpsError,
        operators::{require_bands, CancellationToken, Operator, ProgressCounter},
        scheduler::TileScheduler,
    };
    use std::sync::Arc;

    /// Doubles `a` where `mask` is set.
    #[derive(Default)]
    struct Doubler {
        valid: Option<Expression>,
    }

    impl PixelOperator for Doubler {
        fn alias(&self) -> &str {
            "Doubler"
        }

        fn initialize(&mut self, source: &Product, _parameters: &Parameters) -> Result<Initialization> {
            require_bands(source, ["a"])?;
            let target = Product::new("doubled", "TEST", source.shape());
            target.add_band(
                Band::operator_target("twice", DataType::Float32, source.shape()).with_no_data(-1.),
            )?;
            Ok(Initialization::new(target))
        }

        fn source_samples(&self) -> &[&str] {
            &["a"]
        }

        fn target_samples(&self) -> &[&str] {
            &["twice"]
        }

        fn valid_pixel_expression(&self) -> Option<&Expression> {
            self.valid.as_ref()
        }

        fn compute_pixel(&self, _x: usize, _y: usize, sources: &[f64], targets: &mut [f64]) {
            targets[0] = 2. * sources[0];
        }
    }

    fn source() -> Arc<Product> {
        let product = Product::new("source", "TEST", (3, 2));
        let a = MemoryBandReader::from_fn(DataType::UInt8, (3, 2), |x, _| x as f64);
        let mask = MemoryBandReader::from_fn(DataType::UInt8, (3, 2), |x, _| (x % 2) as f64);
        product
            .add_band(Band::from_reader("a", DataType::UInt8, (3, 2), Arc::new(a)))
            .unwrap();
        product
            .add_band(Band::from_reader("mask", DataType::UInt8, (3, 2), Arc::new(mask)))
            .unwrap();
        Arc::new(product)
    }

    #[test]
    fn invalid_pixels_receive_no_data() {
        let scheduler = TileScheduler::default();
        let doubler = Doubler {
            valid: Some("mask == 1".parse().unwrap()),
        };
        let target = scheduler
            .attach(Operator::pixel(doubler), source(), &Parameters::new())
            .unwrap();
        let tile = scheduler
            .tile(&target, "twice", &target.bounds(), &ExecutionContext::default())
            .unwrap();
        assert_eq!(tile.raw::<f32>().unwrap(), &[-1., 2., -1., -1., 2., -1.]);
    }

    #[test]
    fn validity_references_are_dependencies() {
        let operator = Operator::pixel(Doubler {
            valid: Some("mask && a > 0".parse().unwrap()),
        });
        assert_eq!(operator.source_bands(), vec!["a", "mask"]);
    }

    #[test]
    fn progress_is_reported_per_row() {
        let scheduler = TileScheduler::default();
        let target = scheduler
            .attach(Operator::pixel(Doubler::default()), source(), &Parameters::new())
            .unwrap();
        let counter = Arc::new(ProgressCounter::default());
        let ctx = ExecutionContext::new(CancellationToken::new(), counter.clone());
        scheduler.tile(&target, "twice", &target.bounds(), &ctx).unwrap();
        assert_eq!(counter.total_units(), 2);
        assert_eq!(counter.worked_units(), 2);
        assert_eq!(counter.tasks_finished(), 1);
    }

    #[test]
    fn cancelled_before_first_row() {
        let scheduler = TileScheduler::default();
        let target = scheduler
            .attach(Operator::pixel(Doubler::default()), source(), &Parameters::new())
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = scheduler.tile(&target, "twice", &target.bounds(), &ExecutionContext::with_token(token));
        assert!(matches!(result, Err(RasterOpsError::Cancelled)));
    }
}
