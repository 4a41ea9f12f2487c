mod placemarks;
mod readers;

pub use placemarks::{
    Attribute, AttributeKind, FeatureType, GcpDescriptor, GenericPointDescriptor, PinDescriptor,
    Placemark, PlacemarkDescriptor, PlacemarkType, PLACEMARK_DESCRIPTOR_KEY,
};
pub use readers::{FilePatternReaderPlugIn, ProductFactory, ReaderPlugIn};
#[cfg(feature = "gdal")]
pub use crate::components::engines::GdalReaderPlugIn;

use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Reverse,
    fmt::Debug,
    sync::{Arc, PoisonError, RwLock},
};

/// Confidence of a descriptor that it handles an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Qualification {
    Unable,
    Suitable,
    Intended,
}

/// Handler of some kind of input, e.g. a file format or a vector feature type.
///
/// Qualification must be free of side effects, it is asked
/// repeatedly and from several threads.
pub trait Descriptor: Send + Sync {
    type Input: ?Sized;

    fn name(&self) -> &str;

    fn qualification(&self, input: &Self::Input) -> Qualification;

    /// Whether the descriptor's base schema carries the marker designating it.
    /// Breaks ties between intended descriptors.
    fn carries_marker(&self) -> bool {
        false
    }
}

/// Descriptors of one family, resolved by qualification.
///
/// Lookups take a read lock, registration a write lock.
pub struct DescriptorRegistry<D: Descriptor + ?Sized> {
    descriptors: RwLock<Vec<Arc<D>>>,
}

impl<D: Descriptor + ?Sized> Default for DescriptorRegistry<D> {
    fn default() -> Self {
        Self {
            descriptors: RwLock::default(),
        }
    }
}

impl<D: Descriptor + ?Sized> Debug for DescriptorRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .descriptors()
            .iter()
            .map(|descriptor| descriptor.name().to_string())
            .collect();
        f.debug_struct("DescriptorRegistry")
            .field("descriptors", &names)
            .finish()
    }
}

impl<D: Descriptor + ?Sized> DescriptorRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `descriptor` after all registered ones.
    /// A descriptor with the same name is replaced in place.
    pub fn register(&self, descriptor: Arc<D>) {
        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match descriptors
            .iter()
            .position(|registered| registered.name() == descriptor.name())
        {
            Some(idx) => {
                debug!("replacing descriptor '{}'", descriptor.name());
                descriptors[idx] = descriptor;
            }
            None => {
                debug!("registering descriptor '{}'", descriptor.name());
                descriptors.push(descriptor);
            }
        }
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> Vec<Arc<D>> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<D>> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|descriptor| descriptor.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every descriptor able to handle `input`, best first:
    /// intended before suitable, among intended ones those carrying the
    /// marker first, otherwise in registration order.
    pub fn all_valid(&self, input: &D::Input) -> Vec<Arc<D>> {
        let mut valid: Vec<(Qualification, Arc<D>)> = self
            .descriptors()
            .into_iter()
            .map(|descriptor| (descriptor.qualification(input), descriptor))
            .filter(|(qualification, _)| *qualification != Qualification::Unable)
            .collect();
        // Stable, so registration order survives among equals.
        valid.sort_by_key(|(qualification, descriptor)| {
            let marked = *qualification == Qualification::Intended && descriptor.carries_marker();
            (Reverse(*qualification), Reverse(marked))
        });
        valid.into_iter().map(|(_, descriptor)| descriptor).collect()
    }

    /// Head of [DescriptorRegistry::all_valid], `None` when nothing qualifies.
    pub fn best(&self, input: &D::Input) -> Option<Arc<D>> {
        self.all_valid(input).into_iter().next()
    }
}
