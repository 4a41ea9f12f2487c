use std::{collections::BTreeMap, sync::Arc};

use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::{
    components::GeoCoding,
    registry::{Descriptor, DescriptorRegistry, Qualification},
};

/// User data key naming the descriptor a feature type is meant for.
pub const PLACEMARK_DESCRIPTOR_KEY: &str = "placemarkDescriptor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeKind {
    Point,
    Text,
    Integer,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
}

/// Schema of vector features: a type name, free form user data and attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureType {
    pub name: String,
    #[serde(default)]
    pub user_data: BTreeMap<String, String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl FeatureType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_user_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_data.insert(key.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn has_point_geometry(&self) -> bool {
        self.attributes
            .iter()
            .any(|attribute| attribute.kind == AttributeKind::Point)
    }

    /// Descriptor name stored under [PLACEMARK_DESCRIPTOR_KEY].
    pub fn designated_descriptor(&self) -> Option<&str> {
        self.user_data
            .get(PLACEMARK_DESCRIPTOR_KEY)
            .map(String::as_str)
    }
}

/// A point feature positioned both in pixel and geographic space.
#[derive(Debug, Clone, PartialEq)]
pub struct Placemark {
    pub name: String,
    pub pixel_pos: Option<Coord<f64>>,
    pub geo_pos: Option<Coord<f64>>,
}

impl Placemark {
    pub fn at_pixel(name: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            name: name.into(),
            pixel_pos: Some(Coord { x, y }),
            geo_pos: None,
        }
    }

    pub fn at_geo(name: impl Into<String>, lon: f64, lat: f64) -> Self {
        Self {
            name: name.into(),
            pixel_pos: None,
            geo_pos: Some(Coord { x: lon, y: lat }),
        }
    }
}

fn base_schema(type_name: &str, descriptor: &str) -> FeatureType {
    FeatureType::new(type_name)
        .with_user_data(PLACEMARK_DESCRIPTOR_KEY, descriptor)
        .with_attribute("geometry", AttributeKind::Point)
        .with_attribute("label", AttributeKind::Text)
        .with_attribute("text", AttributeKind::Text)
}

fn designated_or_named(feature_type: &FeatureType, descriptor: &str, type_name: &str) -> Qualification {
    if feature_type.designated_descriptor() == Some(descriptor) || feature_type.name == type_name {
        Qualification::Intended
    } else {
        Qualification::Unable
    }
}

/// Geographic position from the pixel position, when both a geocoding and a
/// pixel position exist.
fn geo_from_pixel(geocoding: Option<&GeoCoding>, placemark: &mut Placemark) {
    if let (Some(geocoding), Some(pixel_pos)) = (geocoding, placemark.pixel_pos) {
        placemark.geo_pos = Some(geocoding.geo_pos_of(pixel_pos));
    }
}

fn pixel_from_geo(geocoding: Option<&GeoCoding>, placemark: &mut Placemark) {
    let Some(geocoding) = geocoding else {
        return;
    };
    if let Some(pixel_pos) = placemark.geo_pos.and_then(|geo_pos| geocoding.pixel_pos(geo_pos)) {
        placemark.pixel_pos = Some(pixel_pos);
    }
}

/// Behaviour shared by every kind of placemark.
#[ambassador::delegatable_trait]
pub trait PlacemarkType {
    fn name(&self) -> &str;

    fn role(&self) -> &str;

    fn qualification(&self, feature_type: &FeatureType) -> Qualification;

    /// Schema of features created for this kind, if it defines one.
    fn base_feature_type(&self) -> Option<FeatureType>;

    /// Re-derives the pixel position after the geocoding changed.
    fn update_pixel_pos(&self, geocoding: Option<&GeoCoding>, placemark: &mut Placemark);

    /// Re-derives the geographic position after the pixel position changed.
    fn update_geo_pos(&self, geocoding: Option<&GeoCoding>, placemark: &mut Placemark);
}

/// Pins stick to their geographic position.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinDescriptor;

impl PinDescriptor {
    pub const NAME: &'static str = "PinDescriptor";
    pub const TYPE_NAME: &'static str = "org.esa.beam.Pin";
}

impl PlacemarkType for PinDescriptor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn role(&self) -> &str {
        "pin"
    }

    fn qualification(&self, feature_type: &FeatureType) -> Qualification {
        designated_or_named(feature_type, Self::NAME, Self::TYPE_NAME)
    }

    fn base_feature_type(&self) -> Option<FeatureType> {
        Some(base_schema(Self::TYPE_NAME, Self::NAME))
    }

    fn update_pixel_pos(&self, geocoding: Option<&GeoCoding>, placemark: &mut Placemark) {
        pixel_from_geo(geocoding, placemark)
    }

    fn update_geo_pos(&self, geocoding: Option<&GeoCoding>, placemark: &mut Placemark) {
        geo_from_pixel(geocoding, placemark)
    }
}

/// Ground control points are fixed in pixel space.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcpDescriptor;

impl GcpDescriptor {
    pub const NAME: &'static str = "GcpDescriptor";
    pub const TYPE_NAME: &'static str = "org.esa.beam.GroundControlPoint";
}

impl PlacemarkType for GcpDescriptor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn role(&self) -> &str {
        "gcp"
    }

    fn qualification(&self, feature_type: &FeatureType) -> Qualification {
        designated_or_named(feature_type, Self::NAME, Self::TYPE_NAME)
    }

    fn base_feature_type(&self) -> Option<FeatureType> {
        Some(base_schema(Self::TYPE_NAME, Self::NAME))
    }

    fn update_pixel_pos(&self, _geocoding: Option<&GeoCoding>, _placemark: &mut Placemark) {}

    fn update_geo_pos(&self, geocoding: Option<&GeoCoding>, placemark: &mut Placemark) {
        geo_from_pixel(geocoding, placemark)
    }
}

/// Fallback for any feature type with a point geometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericPointDescriptor;

impl GenericPointDescriptor {
    pub const NAME: &'static str = "GenericPointDescriptor";
}

impl PlacemarkType for GenericPointDescriptor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn role(&self) -> &str {
        "point"
    }

    fn qualification(&self, feature_type: &FeatureType) -> Qualification {
        if feature_type.designated_descriptor() == Some(Self::NAME) {
            Qualification::Intended
        } else if feature_type.has_point_geometry() {
            Qualification::Suitable
        } else {
            Qualification::Unable
        }
    }

    fn base_feature_type(&self) -> Option<FeatureType> {
        None
    }

    fn update_pixel_pos(&self, geocoding: Option<&GeoCoding>, placemark: &mut Placemark) {
        pixel_from_geo(geocoding, placemark)
    }

    fn update_geo_pos(&self, geocoding: Option<&GeoCoding>, placemark: &mut Placemark) {
        geo_from_pixel(geocoding, placemark)
    }
}

#[derive(ambassador::Delegate, Debug, Clone, Copy)]
#[delegate(PlacemarkType)]
pub enum PlacemarkDescriptor {
    Pin(PinDescriptor),
    Gcp(GcpDescriptor),
    Generic(GenericPointDescriptor),
}

impl PlacemarkDescriptor {
    /// Registry holding pin, GCP and generic point descriptors, in that order.
    pub fn registry() -> DescriptorRegistry<PlacemarkDescriptor> {
        let registry = DescriptorRegistry::new();
        for descriptor in [
            PlacemarkDescriptor::Pin(PinDescriptor),
            PlacemarkDescriptor::Gcp(GcpDescriptor),
            PlacemarkDescriptor::Generic(GenericPointDescriptor),
        ] {
            registry.register(Arc::new(descriptor));
        }
        registry
    }
}

impl Descriptor for PlacemarkDescriptor {
    type Input = FeatureType;

    fn name(&self) -> &str {
        PlacemarkType::name(self)
    }

    fn qualification(&self, input: &FeatureType) -> Qualification {
        PlacemarkType::qualification(self, input)
    }

    fn carries_marker(&self) -> bool {
        self.base_feature_type()
            .is_some_and(|schema| schema.designated_descriptor().is_some())
    }
}
