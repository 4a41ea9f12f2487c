//! Pluggable raster operators with lazy, tile based evaluation.
//!
//! Products are opened through reader plug-ins picked from a
//! [registry::DescriptorRegistry], transformed by [operators::Operator]s and
//! computed tile by tile through a [scheduler::TileScheduler], which caches
//! what it computed and never computes the same tile twice at once.

mod buffer;
pub mod components;
mod errors;
mod indexes;
mod intersection;
pub mod operators;
pub mod registry;
pub mod scheduler;

pub use components::{Band, DataType, PixelBounds, Product, Tile};
pub use errors::{RasterOpsError, Result};
pub use indexes::Indexes;
pub use operators::{ExecutionContext, Operator, Parameters};
pub use registry::{Descriptor, DescriptorRegistry, Qualification};
pub use scheduler::{SchedulerConfig, TileScheduler};

#[cfg(test)]
mod tests {
    use super::*;
    use components::MemoryBandReader;
    use operators::{CancellationToken, NdviOp, ProgressCounter};
    use registry::{FilePatternReaderPlugIn, ReaderPlugIn};
    use std::{path::Path, sync::Arc};

    fn radiances(path: &Path) -> Result<Product> {
        let product = Product::new(
            path.file_stem().unwrap().to_string_lossy(),
            "MER_RR__1P",
            (6, 4),
        );
        for (name, scale) in [("radiance_6", 1.), ("radiance_10", 3.)] {
            let reader = MemoryBandReader::from_fn(DataType::Float32, (6, 4), move |x, y| {
                scale * (1 + x + y) as f64
            });
            product.add_band(Band::from_reader(name, DataType::Float32, (6, 4), Arc::new(reader)))?;
        }
        Ok(product)
    }

    #[test_log::test]
    fn open_transform_and_compute() {
        let readers: DescriptorRegistry<dyn ReaderPlugIn> = DescriptorRegistry::new();
        readers.register(Arc::new(
            FilePatternReaderPlugIn::new("ENVISAT", ["n1"], Arc::new(radiances)).with_prefix("mer_"),
        ));
        let source = Arc::new(readers.open(Path::new("/data/MER_RR_scene.N1")).unwrap());

        let scheduler = TileScheduler::new(SchedulerConfig {
            cache_capacity_bytes: Some(1 << 20),
        });
        let target = scheduler
            .attach(Operator::tile_stack(NdviOp::default()), source, &Parameters::new())
            .unwrap();
        let progress = Arc::new(ProgressCounter::default());
        let ctx = ExecutionContext::new(CancellationToken::new(), progress.clone());
        let tiles = scheduler
            .compute_product(&target, Indexes::from([0usize]), (3, 2), &ctx)
            .unwrap();
        assert_eq!(tiles.len(), 4);
        for tile in tiles.iter() {
            for value in tile.raw::<f32>().unwrap() {
                assert!((value - 0.5).abs() < 1e-6);
            }
        }
        assert_eq!(progress.fraction(), 1.);
    }
}
