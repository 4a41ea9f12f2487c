//! Products read through GDAL.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use gdal::{
    raster::{GdalDataType, GdalType, RasterBand as GdalRasterBand},
    Dataset as GdalDataset, Metadata as GdalMetadata, MetadataEntry as GdalMetadataEntry,
};
use log::{debug, warn};

use crate::{
    components::{Band, BandReader, DataType, GeoCoding, PixelBounds, Product, RasterData},
    errors::{RasterOpsError, Result},
    registry::{Descriptor, Qualification, ReaderPlugIn},
};

fn filter_metadata_gdal(metadata: &impl GdalMetadata) -> Vec<(String, String)> {
    GdalMetadata::metadata(metadata)
        .filter_map(|GdalMetadataEntry { domain, key, value }| {
            if domain.eq("") {
                Some((key, value))
            } else {
                None
            }
        })
        .collect()
}

fn data_type_of(band_type: GdalDataType) -> Option<DataType> {
    match band_type {
        GdalDataType::Int8 => Some(DataType::Int8),
        GdalDataType::UInt8 => Some(DataType::UInt8),
        GdalDataType::Int16 => Some(DataType::Int16),
        GdalDataType::UInt16 => Some(DataType::UInt16),
        GdalDataType::Int32 => Some(DataType::Int32),
        GdalDataType::UInt32 => Some(DataType::UInt32),
        GdalDataType::Float32 => Some(DataType::Float32),
        GdalDataType::Float64 => Some(DataType::Float64),
        _ => None,
    }
}

/// Any raster GDAL can open. Intended for files whose GDAL driver is
/// one of `drivers`, suitable otherwise.
#[derive(Debug, Clone)]
pub struct GdalReaderPlugIn {
    name: String,
    description: String,
    drivers: Vec<String>,
    extensions: Vec<String>,
}

impl Default for GdalReaderPlugIn {
    fn default() -> Self {
        Self {
            name: String::from("GDAL"),
            description: String::from("Rasters readable by GDAL"),
            drivers: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

impl GdalReaderPlugIn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_drivers<S: Into<String>>(mut self, drivers: impl IntoIterator<Item = S>) -> Self {
        self.drivers = drivers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extensions<S: AsRef<str>>(mut self, extensions: impl IntoIterator<Item = S>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().to_lowercase())
            .collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn band_name(rasterband: &GdalRasterBand, index: usize) -> String {
        match rasterband.description() {
            Ok(description) if !description.trim().is_empty() => description,
            _ => format!("band_{index}"),
        }
    }
}

impl Descriptor for GdalReaderPlugIn {
    type Input = Path;

    fn name(&self) -> &str {
        &self.name
    }

    fn qualification(&self, path: &Path) -> Qualification {
        match GdalDataset::open(path) {
            Ok(dataset) if self.drivers.contains(&dataset.driver().short_name()) => {
                Qualification::Intended
            }
            Ok(_) => Qualification::Suitable,
            Err(_) => Qualification::Unable,
        }
    }
}

impl ReaderPlugIn for GdalReaderPlugIn {
    fn description(&self) -> &str {
        &self.description
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn open(&self, path: &Path) -> Result<Product> {
        let dataset = GdalDataset::open(path)?;
        let shape = dataset.raster_size();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let product = Product::new(name, dataset.driver().short_name(), shape);

        match dataset.geo_transform() {
            Ok(transform) => product.set_geocoding(Some(GeoCoding::from_gdal(transform))),
            Err(err) => debug!("{} has no geo transform: {err}", path.display()),
        }
        product.update_metadata(|metadata| {
            for (key, value) in filter_metadata_gdal(&dataset) {
                metadata.insert(key, value);
            }
        });

        let path: Arc<Path> = Arc::from(PathBuf::from(path));
        for index in 1..=dataset.raster_count() {
            let rasterband = dataset.rasterband(index)?;
            let Some(data_type) = data_type_of(rasterband.band_type()) else {
                warn!(
                    "skipping band {index} of {}: unsupported type {:?}",
                    path.display(),
                    rasterband.band_type()
                );
                continue;
            };
            let reader = GdalBandReader {
                path: Arc::clone(&path),
                index,
            };
            let mut band = Band::from_reader(
                Self::band_name(&rasterband, index),
                data_type,
                shape,
                Arc::new(reader),
            );
            if let Some(no_data) = rasterband.no_data_value() {
                band = band.with_no_data(no_data);
            }
            product.add_band(band)?;
        }
        Ok(product)
    }
}

/// Band `index` (1 based) of a GDAL dataset.
/// Datasets are reopened per read so reads may run on any thread.
#[derive(Debug)]
struct GdalBandReader {
    path: Arc<Path>,
    index: usize,
}

fn read_window<T: GdalType + Copy>(
    rasterband: &GdalRasterBand,
    bounds: &PixelBounds,
    slice: &mut [T],
) -> Result<()> {
    let offset = (bounds.x() as isize, bounds.y() as isize);
    let window_shape = (bounds.width(), bounds.height());
    Ok(rasterband.read_into_slice::<T>(offset, window_shape, window_shape, slice, None)?)
}

impl BandReader for GdalBandReader {
    fn read_into(&self, bounds: &PixelBounds, data: &mut RasterData) -> Result<()> {
        let dataset = GdalDataset::open(&self.path)?;
        let rasterband = dataset.rasterband(self.index)?;
        let read = match data.data_type() {
            DataType::Int8 => read_window(&rasterband, bounds, data.as_mut_slice::<i8>()?),
            DataType::UInt8 => read_window(&rasterband, bounds, data.as_mut_slice::<u8>()?),
            DataType::Int16 => read_window(&rasterband, bounds, data.as_mut_slice::<i16>()?),
            DataType::UInt16 => read_window(&rasterband, bounds, data.as_mut_slice::<u16>()?),
            DataType::Int32 => read_window(&rasterband, bounds, data.as_mut_slice::<i32>()?),
            DataType::UInt32 => read_window(&rasterband, bounds, data.as_mut_slice::<u32>()?),
            DataType::Float32 => read_window(&rasterband, bounds, data.as_mut_slice::<f32>()?),
            DataType::Float64 => read_window(&rasterband, bounds, data.as_mut_slice::<f64>()?),
        };
        read.map_err(|err| match err {
            RasterOpsError::Gdal(err) => RasterOpsError::computation(
                format!("{}:{}", self.path.display(), self.index),
                err,
            ),
            err => err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdal::{raster::Buffer, DriverManager};

    fn write_geotiff(path: &Path) {
        let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
        let mut dataset = driver
            .create_with_band_type::<u16, _>(path, 4, 3, 1)
            .unwrap();
        dataset
            .set_geo_transform(&[10., 1., 0., 50., 0., -1.])
            .unwrap();
        let mut rasterband = dataset.rasterband(1).unwrap();
        let mut buffer = Buffer::new((4, 3), (0..12u16).collect());
        rasterband.write((0, 0), (4, 3), &mut buffer).unwrap();
        rasterband.set_no_data_value(Some(0.)).unwrap();
    }

    #[test_log::test]
    fn opens_geotiff_lazily() {
        let path = std::env::temp_dir().join(format!("rasterops_{}.tif", std::process::id()));
        write_geotiff(&path);

        let plug_in = GdalReaderPlugIn::new("GeoTIFF").with_drivers(["GTiff"]);
        assert_eq!(plug_in.qualification(&path), Qualification::Intended);
        assert_eq!(
            GdalReaderPlugIn::default().qualification(&path),
            Qualification::Suitable
        );
        assert_eq!(
            plug_in.qualification(Path::new("/does/not/exist.tif")),
            Qualification::Unable
        );

        let product = plug_in.open(&path).unwrap();
        assert_eq!(product.shape(), (4, 3));
        assert_eq!(product.product_type(), "GTiff");
        let band = product.band("band_1").unwrap();
        assert_eq!(band.data_type(), DataType::UInt16);
        assert_eq!(band.no_data(), Some(0.));

        let bounds = PixelBounds::new((1, 1), (2, 2));
        let mut data = RasterData::zeros(DataType::UInt16, (2, 2));
        let crate::components::BandSource::Reader(reader) = band.source() else {
            panic!("GDAL bands are read from file");
        };
        reader.read_into(&bounds, &mut data).unwrap();
        assert_eq!(data.as_slice::<u16>().unwrap(), &[5, 6, 9, 10]);

        std::fs::remove_file(&path).unwrap();
    }
}
