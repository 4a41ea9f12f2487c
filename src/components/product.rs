use log::{debug, info, warn};
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use crate::{
    components::{
        band::{Band, BandSource},
        flags::{FlagCoding, Mask},
        metadata::Metadata,
        transforms::GeoCoding,
        PixelBounds,
    },
    errors::{RasterOpsError, Result},
    Indexes,
};

static NEXT_PRODUCT_ID: AtomicU64 = AtomicU64::new(1);

/// Process unique identity of a [Product], part of every tile key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductId(u64);

/// Named raster dataset owning its bands and auxiliary metadata.
///
/// Band, flag coding and mask collections may be extended after creation,
/// so they are guarded for concurrent readers.
pub struct Product {
    id: ProductId,
    name: String,
    product_type: String,
    /// Scene (width, height)
    shape: (usize, usize),
    bands: RwLock<Vec<Arc<Band>>>,
    flag_codings: RwLock<Vec<FlagCoding>>,
    masks: RwLock<Vec<Mask>>,
    geocoding: RwLock<Option<GeoCoding>>,
    metadata: RwLock<Metadata>,
    disposed: AtomicBool,
}

impl Debug for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let f = &mut f.debug_struct("Product");
        f.field("name", &self.name)
            .field("type", &self.product_type)
            .field("shape", &self.shape)
            .field("bands", &self.band_names())
            .finish()
    }
}

impl Product {
    pub fn new(
        name: impl Into<String>,
        product_type: impl Into<String>,
        shape: (usize, usize),
    ) -> Self {
        let product = Self {
            id: ProductId(NEXT_PRODUCT_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            product_type: product_type.into(),
            shape,
            bands: RwLock::default(),
            flag_codings: RwLock::default(),
            masks: RwLock::default(),
            geocoding: RwLock::default(),
            metadata: RwLock::default(),
            disposed: AtomicBool::new(false),
        };
        info!("new {product:?}");
        product
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    /// Scene (width, height).
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn bounds(&self) -> PixelBounds {
        PixelBounds::full(self.shape)
    }

    pub(crate) fn invalid_source(&self, band: &str) -> RasterOpsError {
        RasterOpsError::InvalidSource {
            product: self.name.clone(),
            band: band.to_string(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            Err(RasterOpsError::Disposed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Adds `band`, whose shape must equal the scene shape
    /// or divide it by an integer sub-sampling ratio.
    /// Operator computed bands are computed pixel aligned with their
    /// source and must cover the whole scene.
    pub fn add_band(&self, band: Band) -> Result<Arc<Band>> {
        self.ensure_alive()?;
        let (width, height) = band.shape();
        let (scene_width, scene_height) = self.shape;
        let subsampled = width > 0
            && height > 0
            && scene_width % width == 0
            && scene_height % height == 0
            && scene_width / width == scene_height / height;
        let operator_aligned =
            !matches!(band.source(), BandSource::Operator) || band.shape() == self.shape;
        if !subsampled || !operator_aligned {
            return Err(RasterOpsError::RasterSizeMismatch {
                band: band.name().to_string(),
                expected: self.shape,
                actual: band.shape(),
            });
        }
        let mut bands = self.bands.write().unwrap_or_else(PoisonError::into_inner);
        if bands.iter().any(|existing| existing.name() == band.name()) {
            return Err(RasterOpsError::DuplicateBand {
                product: self.name.clone(),
                band: band.name().to_string(),
            });
        }
        debug!("adding band '{}' to '{}'", band.name(), self.name);
        let band = Arc::new(band);
        bands.push(Arc::clone(&band));
        Ok(band)
    }

    pub fn band(&self, name: &str) -> Result<Arc<Band>> {
        self.bands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|band| band.name() == name)
            .cloned()
            .ok_or_else(|| RasterOpsError::UnknownBand {
                product: self.name.clone(),
                band: name.to_string(),
            })
    }

    pub fn contains_band(&self, name: &str) -> bool {
        self.band(name).is_ok()
    }

    /// Bands in insertion order.
    pub fn bands(&self) -> Vec<Arc<Band>> {
        self.bands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|band| band.name().to_string())
            .collect()
    }

    pub fn num_bands(&self) -> usize {
        self.bands.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Bands carrying a flag coding.
    pub fn flag_bands(&self) -> Vec<Arc<Band>> {
        self.bands()
            .into_iter()
            .filter(|band| band.is_flag_band())
            .collect()
    }

    pub fn select_bands(&self, indexes: Indexes) -> Vec<Arc<Band>> {
        indexes.select_from(self.bands())
    }

    pub fn add_flag_coding(&self, flag_coding: FlagCoding) {
        let mut codings = self
            .flag_codings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        codings.retain(|coding| coding.name != flag_coding.name);
        codings.push(flag_coding);
    }

    pub fn flag_coding(&self, name: &str) -> Option<FlagCoding> {
        self.flag_codings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|coding| coding.name == name)
            .cloned()
    }

    pub fn flag_codings(&self) -> Vec<FlagCoding> {
        self.flag_codings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_mask(&self, mask: Mask) {
        let mut masks = self.masks.write().unwrap_or_else(PoisonError::into_inner);
        masks.retain(|existing| existing.name != mask.name);
        masks.push(mask);
    }

    pub fn mask(&self, name: &str) -> Option<Mask> {
        self.masks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|mask| mask.name == name)
            .cloned()
    }

    pub fn masks(&self) -> Vec<Mask> {
        self.masks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_geocoding(&self, geocoding: Option<GeoCoding>) {
        *self.geocoding.write().unwrap_or_else(PoisonError::into_inner) = geocoding;
    }

    pub fn geocoding(&self) -> Option<GeoCoding> {
        *self.geocoding.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_metadata(&self, update: impl FnOnce(&mut Metadata)) {
        update(&mut self.metadata.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Sum of the pixel counts of all bands.
    pub fn total_pixels(&self) -> usize {
        self.bands().iter().map(|band| band.num_pixels()).sum()
    }

    /// Bytes needed to hold every band in memory.
    pub fn raw_storage_size(&self) -> usize {
        self.bands().iter().map(|band| band.raw_storage_size()).sum()
    }

    pub fn copy_geocoding_from(&self, source: &Product) {
        self.set_geocoding(source.geocoding())
    }

    pub fn copy_flag_codings_from(&self, source: &Product) {
        source
            .flag_codings()
            .into_iter()
            .for_each(|coding| self.add_flag_coding(coding))
    }

    pub fn copy_masks_from(&self, source: &Product) {
        source.masks().into_iter().for_each(|mask| self.add_mask(mask))
    }

    /// Adds every scene sized flag band of `source` as an operator computed
    /// band of `self`, together with the flag codings. Sub-sampled flag bands
    /// are skipped. Returns the names of the copied bands.
    pub fn copy_flag_bands_from(&self, source: &Product) -> Result<Vec<String>> {
        self.copy_flag_codings_from(source);
        source
            .flag_bands()
            .iter()
            .filter(|band| {
                let aligned = band.shape() == self.shape;
                if !aligned {
                    warn!(
                        "not copying flag band '{}' of '{}': {:?} does not match scene {:?}",
                        band.name(),
                        source.name(),
                        band.shape(),
                        self.shape
                    );
                }
                aligned
            })
            .map(|band| {
                self.add_band(band.as_operator_target())
                    .map(|band| band.name().to_string())
            })
            .collect()
    }

    /// Releases the readers of all bands. The product is unusable afterwards.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let bands = std::mem::take(&mut *self.bands.write().unwrap_or_else(PoisonError::into_inner));
        for band in bands.iter() {
            if let BandSource::Reader(reader) = band.source() {
                reader.close();
            }
        }
        info!("disposed product '{}' ({} bands)", self.name, bands.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BandReader, DataType, RasterData};
    use rstest::{fixture, rstest};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct ClosingReader(AtomicUsize);

    impl BandReader for ClosingReader {
        fn read_into(&self, _bounds: &PixelBounds, _data: &mut RasterData) -> Result<()> {
            Ok(())
        }

        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[fixture]
    fn product() -> Product {
        let product = Product::new("MER_RR", "MER_RR__1P", (4, 4));
        product
            .add_band(Band::operator_target("radiance_6", DataType::Float32, (4, 4)))
            .unwrap();
        let mut coding = FlagCoding::new("l1_flags");
        coding.add_flag("INVALID", 1, "");
        product.add_flag_coding(coding);
        product
            .add_band(
                Band::operator_target("l1_flags", DataType::UInt8, (4, 4))
                    .with_flag_coding("l1_flags"),
            )
            .unwrap();
        product
    }

    #[rstest]
    #[case((4, 4), true)]
    #[case((2, 2), true)]
    #[case((2, 4), false)]
    #[case((3, 3), false)]
    #[case((8, 8), false)]
    fn band_shape_must_match_scene(
        product: Product,
        #[case] shape: (usize, usize),
        #[case] accepted: bool,
    ) {
        let reader = Arc::new(ClosingReader::default());
        let result = product.add_band(Band::from_reader("b", DataType::UInt8, shape, reader));
        assert_eq!(result.is_ok(), accepted);
    }

    #[rstest]
    fn operator_bands_cover_the_scene(product: Product) {
        let result = product.add_band(Band::operator_target("half", DataType::UInt8, (2, 2)));
        assert!(matches!(
            result,
            Err(RasterOpsError::RasterSizeMismatch { actual: (2, 2), .. })
        ));
        assert!(product
            .add_band(Band::operator_target("full", DataType::UInt8, (4, 4)))
            .is_ok());
    }

    #[rstest]
    fn duplicate_band_names_are_rejected(product: Product) {
        let result = product.add_band(Band::operator_target("radiance_6", DataType::UInt8, (4, 4)));
        assert!(matches!(result, Err(RasterOpsError::DuplicateBand { .. })));
    }

    #[rstest]
    fn storage_statistics(product: Product) {
        assert_eq!(product.total_pixels(), 32);
        assert_eq!(product.raw_storage_size(), 16 * 4 + 16);
    }

    #[rstest]
    fn copy_flag_bands(product: Product) {
        let target = Product::new("target", "T", (4, 4));
        let copied = target.copy_flag_bands_from(&product).unwrap();
        assert_eq!(copied, vec!["l1_flags".to_string()]);
        assert!(target.flag_coding("l1_flags").is_some());
        assert!(matches!(
            target.band("l1_flags").unwrap().source(),
            BandSource::Operator
        ));
    }

    #[rstest]
    fn sub_sampled_flag_bands_are_not_copied(product: Product) {
        let reader = Arc::new(ClosingReader::default());
        product
            .add_band(
                Band::from_reader("coarse_flags", DataType::UInt8, (2, 2), reader)
                    .with_flag_coding("l1_flags"),
            )
            .unwrap();
        let target = Product::new("target", "T", (4, 4));
        let copied = target.copy_flag_bands_from(&product).unwrap();
        assert_eq!(copied, vec!["l1_flags".to_string()]);
        assert!(!target.contains_band("coarse_flags"));
    }

    #[rstest]
    fn dispose_closes_readers(product: Product) {
        let reader = Arc::new(ClosingReader::default());
        product
            .add_band(Band::from_reader("r", DataType::UInt8, (4, 4), reader.clone()))
            .unwrap();
        product.dispose();
        product.dispose();
        assert_eq!(reader.0.load(Ordering::SeqCst), 1);
        assert!(product.is_disposed());
        assert_eq!(product.num_bands(), 0);
        assert!(matches!(
            product.add_band(Band::operator_target("x", DataType::UInt8, (4, 4))),
            Err(RasterOpsError::Disposed(_))
        ));
    }

    #[rstest]
    fn select_bands_by_index(product: Product) {
        let selected = product.select_bands(Indexes::from(([0usize], true)));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "l1_flags");
    }
}
