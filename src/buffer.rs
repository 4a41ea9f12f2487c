use std::marker::PhantomData;

use num::Zero;

#[derive(Debug, Clone, PartialEq)]
pub struct Buffer<T, const ND: usize> {
    // Row-major
    data: Box<[T]>,
    shape: [usize; ND],
    _t: PhantomData<T>,
}

impl<T: Zero + Clone, const ND: usize> Buffer<T, ND> {
    pub fn new_zeroed(shape: [usize; ND]) -> Self {
        Self {
            data: vec![T::zero(); shape.iter().product()].into_boxed_slice(),
            shape,
            _t: PhantomData,
        }
    }
}

impl<T, const ND: usize> Buffer<T, ND> {
    /// Wraps `data`, which must hold exactly `shape.product()` elements.
    pub fn from_parts(data: Box<[T]>, shape: [usize; ND]) -> Option<Self> {
        (data.len() == shape.iter().product::<usize>()).then_some(Self {
            data,
            shape,
            _t: PhantomData,
        })
    }

    pub fn to_owned_parts(self) -> (Box<[T]>, [usize; ND]) {
        (self.data, self.shape)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> [usize; ND] {
        self.shape
    }
}

impl<T> Buffer<T, 2> {
    /// Elements per row.
    pub fn stride(&self) -> usize {
        self.shape[1]
    }

    /// Flat index of (row, col). No bounds checking.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.stride() + col
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, T> {
        self.data.chunks_exact(self.stride().max(1))
    }

    pub fn rows_mut(&mut self) -> std::slice::ChunksExactMut<'_, T> {
        let stride = self.stride().max(1);
        self.data.chunks_exact_mut(stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_checks_length() {
        assert!(Buffer::<u8, 2>::from_parts(vec![0; 6].into_boxed_slice(), [2, 3]).is_some());
        assert!(Buffer::<u8, 2>::from_parts(vec![0; 5].into_boxed_slice(), [2, 3]).is_none());
    }

    #[test]
    fn rows_follow_stride() {
        let buff =
            Buffer::<u16, 2>::from_parts((0..6).collect::<Vec<_>>().into_boxed_slice(), [2, 3])
                .unwrap();
        let rows: Vec<&[u16]> = buff.rows().collect();
        assert_eq!(rows, vec![&[0, 1, 2][..], &[3, 4, 5][..]]);
        assert_eq!(buff.index(1, 2), 5);
    }
}
