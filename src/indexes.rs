use std::{collections::HashSet, sync::Arc};

use itertools::Itertools;

/// Selection of bands by position, either keeping or dropping the listed indexes.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct Indexes {
    selection: Arc<[usize]>,
    drop: bool,
}

impl<const N: usize> From<([usize; N], bool)> for Indexes {
    fn from(value: ([usize; N], bool)) -> Self {
        let selection = Arc::from(value.0);
        let drop = value.1;
        Indexes { selection, drop }
    }
}

impl From<(std::ops::Range<usize>, bool)> for Indexes {
    fn from(value: (std::ops::Range<usize>, bool)) -> Self {
        let selection = value.0.collect();
        let drop = value.1;
        Indexes { selection, drop }
    }
}

impl<const N: usize> From<[usize; N]> for Indexes {
    fn from(value: [usize; N]) -> Self {
        let selection = Arc::from(value);
        Indexes {
            selection,
            drop: false,
        }
    }
}

impl From<std::ops::Range<usize>> for Indexes {
    fn from(value: std::ops::Range<usize>) -> Self {
        let selection = value.collect();
        Indexes {
            selection,
            drop: false,
        }
    }
}

impl Indexes {
    /// Selected positions in a collection of `collection_len`.
    /// Out of range positions are ignored.
    pub fn indexes_from(&self, collection_len: usize) -> Vec<usize> {
        if self.drop {
            let drop_idxs: HashSet<usize> = self.selection.iter().copied().collect();
            (0..collection_len)
                .filter(|idx| !drop_idxs.contains(idx))
                .collect()
        } else {
            self.selection
                .iter()
                .copied()
                .filter(|idx| *idx < collection_len)
                .unique()
                .collect()
        }
    }

    pub fn select_from<T: Clone>(&self, collection: Vec<T>) -> Vec<T> {
        self.indexes_from(collection.len())
            .into_iter()
            .map(|idx| collection[idx].clone())
            .collect()
    }

    pub fn all() -> Self {
        Self {
            selection: Arc::from([]),
            drop: true,
        }
    }
}
