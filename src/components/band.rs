use std::{fmt::Debug, sync::Arc};

use crate::{
    components::{
        data::{DataType, RasterData},
        expression::Expression,
        PixelBounds,
    },
    errors::Result,
};

/// Lazy pixel access of a band backed by a file or memory.
pub trait BandReader: Send + Sync + Debug {
    /// Reads `bounds` into `data`, which is sized for `bounds`
    /// and typed with the band's [DataType].
    fn read_into(&self, bounds: &PixelBounds, data: &mut RasterData) -> Result<()>;

    /// Releases held resources. Called once when the owning product is disposed.
    fn close(&self) {}
}

/// What produces the samples of a [Band].
#[derive(Debug, Clone)]
pub enum BandSource {
    Reader(Arc<dyn BandReader>),
    /// Computed from other bands of the same product.
    Virtual(Expression),
    /// Computed by the operator that created the product.
    Operator,
}

/// Named, typed raster plane of a product.
#[derive(Debug, Clone)]
pub struct Band {
    name: Arc<str>,
    data_type: DataType,
    /// (width, height)
    shape: (usize, usize),
    description: String,
    unit: Option<String>,
    no_data: Option<f64>,
    flag_coding: Option<String>,
    valid_expression: Option<Expression>,
    source: BandSource,
}

impl Band {
    pub fn new(
        name: impl Into<Arc<str>>,
        data_type: DataType,
        shape: (usize, usize),
        source: BandSource,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            shape,
            description: String::new(),
            unit: None,
            no_data: None,
            flag_coding: None,
            valid_expression: None,
            source,
        }
    }

    pub fn from_reader(
        name: impl Into<Arc<str>>,
        data_type: DataType,
        shape: (usize, usize),
        reader: Arc<dyn BandReader>,
    ) -> Self {
        Self::new(name, data_type, shape, BandSource::Reader(reader))
    }

    pub fn from_expression(
        name: impl Into<Arc<str>>,
        data_type: DataType,
        shape: (usize, usize),
        expression: Expression,
    ) -> Self {
        Self::new(name, data_type, shape, BandSource::Virtual(expression))
    }

    pub fn operator_target(
        name: impl Into<Arc<str>>,
        data_type: DataType,
        shape: (usize, usize),
    ) -> Self {
        Self::new(name, data_type, shape, BandSource::Operator)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data = Some(no_data);
        self
    }

    /// Name of the product's flag coding describing the bits of this band.
    pub fn with_flag_coding(mut self, flag_coding: impl Into<String>) -> Self {
        self.flag_coding = Some(flag_coding.into());
        self
    }

    pub fn with_valid_expression(mut self, expression: Expression) -> Self {
        self.valid_expression = Some(expression);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn bounds(&self) -> PixelBounds {
        PixelBounds::full(self.shape)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn no_data(&self) -> Option<f64> {
        self.no_data
    }

    pub fn flag_coding(&self) -> Option<&str> {
        self.flag_coding.as_deref()
    }

    pub fn is_flag_band(&self) -> bool {
        self.flag_coding.is_some()
    }

    pub fn valid_expression(&self) -> Option<&Expression> {
        self.valid_expression.as_ref()
    }

    pub fn source(&self) -> &BandSource {
        &self.source
    }

    pub fn num_pixels(&self) -> usize {
        self.shape.0 * self.shape.1
    }

    /// Bytes needed to hold all samples in memory.
    pub fn raw_storage_size(&self) -> usize {
        self.num_pixels() * self.data_type.size()
    }

    /// Same band description, re-targeted to be computed by an operator.
    pub(crate) fn as_operator_target(&self) -> Self {
        Self {
            source: BandSource::Operator,
            ..self.clone()
        }
    }
}
