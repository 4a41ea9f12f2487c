use log::trace;
use lru::LruCache;
use std::sync::Arc;

use crate::components::{PixelBounds, ProductId, Tile};

/// Identity of a cached tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TileKey {
    pub product: ProductId,
    pub band: Arc<str>,
    pub bounds: PixelBounds,
}

impl TileKey {
    pub fn new(product: ProductId, band: impl Into<Arc<str>>, bounds: PixelBounds) -> Self {
        Self {
            product,
            band: band.into(),
            bounds,
        }
    }
}

/// Computed tiles, evicted least recently used first once
/// `capacity_bytes` is exceeded. Without capacity nothing is evicted.
///
/// Eviction only drops the cache's reference,
/// tiles handed out before stay valid.
pub(crate) struct TileCache {
    current_bytes: usize,
    capacity_bytes: Option<usize>,
    entries: LruCache<TileKey, Arc<Tile>>,
}

impl TileCache {
    pub fn new(capacity_bytes: Option<usize>) -> Self {
        TileCache {
            current_bytes: 0,
            capacity_bytes,
            entries: LruCache::unbounded(),
        }
    }

    pub fn get(&mut self, key: &TileKey) -> Option<Arc<Tile>> {
        self.entries.get(key).map(Arc::clone)
    }

    /// Lookup without touching the eviction order.
    pub fn peek(&self, key: &TileKey) -> Option<Arc<Tile>> {
        self.entries.peek(key).map(Arc::clone)
    }

    pub fn insert(&mut self, key: TileKey, tile: Arc<Tile>) {
        let size_bytes = tile.size_in_bytes();
        if self.capacity_bytes.is_some_and(|capacity| size_bytes > capacity) {
            trace!("{key:?} exceeds the cache capacity");
            return;
        }
        if let Some(old) = self.entries.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_in_bytes());
        }
        if let Some(capacity) = self.capacity_bytes {
            while self.current_bytes + size_bytes > capacity {
                match self.entries.pop_lru() {
                    Some((evicted, tile)) => {
                        trace!("evicting {evicted:?}");
                        self.current_bytes = self.current_bytes.saturating_sub(tile.size_in_bytes());
                    }
                    None => break,
                }
            }
        }
        self.current_bytes = self.current_bytes.saturating_add(size_bytes);
        self.entries.put(key, tile);
    }

    /// Drops every tile of `product`, returns how many.
    pub fn remove_product(&mut self, product: ProductId) -> usize {
        let keys: Vec<TileKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.product == product)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys.iter() {
            if let Some(tile) = self.entries.pop(key) {
                self.current_bytes = self.current_bytes.saturating_sub(tile.size_in_bytes());
            }
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.current_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{DataType, Product};

    fn tile(id: ProductId, x: usize) -> (TileKey, Arc<Tile>) {
        let bounds = PixelBounds::new((x, 0), (2, 2));
        let key = TileKey::new(id, "b", bounds);
        (key, Arc::new(Tile::new("b", DataType::Float32, bounds)))
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let id = Product::new("p", "T", (8, 2)).id();
        let mut cache = TileCache::new(Some(32));
        let (first, first_tile) = tile(id, 0);
        let (second, second_tile) = tile(id, 2);
        let (third, third_tile) = tile(id, 4);
        cache.insert(first.clone(), first_tile.clone());
        cache.insert(second.clone(), second_tile);
        assert!(cache.get(&first).is_some());
        cache.insert(third.clone(), third_tile);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size_in_bytes(), 32);
        assert!(cache.get(&second).is_none());
        assert!(cache.get(&first).is_some());
        assert_eq!(first_tile.bounds().x(), 0);
    }

    #[test]
    fn oversized_tiles_are_not_cached() {
        let id = Product::new("p", "T", (2, 2)).id();
        let mut cache = TileCache::new(Some(8));
        let (key, tile) = tile(id, 0);
        cache.insert(key.clone(), tile);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn unbounded_cache_removes_by_product() {
        let one = Product::new("one", "T", (4, 2)).id();
        let two = Product::new("two", "T", (4, 2)).id();
        let mut cache = TileCache::new(None);
        for (key, tile) in [tile(one, 0), tile(one, 2), tile(two, 0)] {
            cache.insert(key, tile);
        }
        assert_eq!(cache.remove_product(one), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_in_bytes(), 16);
    }
}
