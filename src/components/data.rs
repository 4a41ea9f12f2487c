use num::{NumCast, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{
    buffer::Buffer,
    errors::{RasterOpsError, Result},
};

/// Sample data type of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl DataType {
    /// Size of one sample in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, DataType::Float32 | DataType::Float64)
    }
}

/// Rust primitive usable as a band sample.
pub trait Sample: NumCast + ToPrimitive + Zero + Copy + Send + Sync + Debug + 'static {
    const DATA_TYPE: DataType;

    fn wrap(buffer: Buffer<Self, 2>) -> RasterData;
    fn slice(data: &RasterData) -> Option<&[Self]>;
    fn slice_mut(data: &mut RasterData) -> Option<&mut [Self]>;
}

macro_rules! impl_sample {
    ($t:ty, $variant:ident) => {
        impl Sample for $t {
            const DATA_TYPE: DataType = DataType::$variant;

            fn wrap(buffer: Buffer<Self, 2>) -> RasterData {
                RasterData::$variant(buffer)
            }

            fn slice(data: &RasterData) -> Option<&[Self]> {
                match data {
                    RasterData::$variant(buffer) => Some(buffer.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut RasterData) -> Option<&mut [Self]> {
                match data {
                    RasterData::$variant(buffer) => Some(buffer.as_mut()),
                    _ => None,
                }
            }
        }
    };
}

impl_sample!(i8, Int8);
impl_sample!(u8, UInt8);
impl_sample!(i16, Int16);
impl_sample!(u16, UInt16);
impl_sample!(i32, Int32);
impl_sample!(u32, UInt32);
impl_sample!(f32, Float32);
impl_sample!(f64, Float64);

/// Row-major sample storage, one variant per [DataType].
#[derive(Debug, Clone, PartialEq)]
pub enum RasterData {
    Int8(Buffer<i8, 2>),
    UInt8(Buffer<u8, 2>),
    Int16(Buffer<i16, 2>),
    UInt16(Buffer<u16, 2>),
    Int32(Buffer<i32, 2>),
    UInt32(Buffer<u32, 2>),
    Float32(Buffer<f32, 2>),
    Float64(Buffer<f64, 2>),
}

macro_rules! with_buffer {
    ($data:expr, $buffer:ident => $body:expr) => {
        match $data {
            RasterData::Int8($buffer) => $body,
            RasterData::UInt8($buffer) => $body,
            RasterData::Int16($buffer) => $body,
            RasterData::UInt16($buffer) => $body,
            RasterData::Int32($buffer) => $body,
            RasterData::UInt32($buffer) => $body,
            RasterData::Float32($buffer) => $body,
            RasterData::Float64($buffer) => $body,
        }
    };
}

fn cast<T: Sample>(value: f64) -> T {
    // Out of range values saturate, NaN maps to zero for integer types.
    match T::from(value) {
        Some(sample) => sample,
        None if value.is_nan() => T::zero(),
        None if value > 0. => max_of::<T>().unwrap_or_else(T::zero),
        None => min_of::<T>().unwrap_or_else(T::zero),
    }
}

fn max_of<T: Sample>() -> Option<T> {
    match T::DATA_TYPE {
        DataType::Int8 => T::from(i8::MAX),
        DataType::UInt8 => T::from(u8::MAX),
        DataType::Int16 => T::from(i16::MAX),
        DataType::UInt16 => T::from(u16::MAX),
        DataType::Int32 => T::from(i32::MAX),
        DataType::UInt32 => T::from(u32::MAX),
        DataType::Float32 => T::from(f32::MAX),
        DataType::Float64 => T::from(f64::MAX),
    }
}

fn min_of<T: Sample>() -> Option<T> {
    match T::DATA_TYPE {
        DataType::Int8 => T::from(i8::MIN),
        DataType::UInt8 => T::from(u8::MIN),
        DataType::Int16 => T::from(i16::MIN),
        DataType::UInt16 => T::from(u16::MIN),
        DataType::Int32 => T::from(i32::MIN),
        DataType::UInt32 => T::from(u32::MIN),
        DataType::Float32 => T::from(f32::MIN),
        DataType::Float64 => T::from(f64::MIN),
    }
}

impl RasterData {
    /// Zero filled storage of `shape` (width, height).
    pub fn zeros(data_type: DataType, shape: (usize, usize)) -> Self {
        let shape = [shape.1, shape.0];
        match data_type {
            DataType::Int8 => RasterData::Int8(Buffer::new_zeroed(shape)),
            DataType::UInt8 => RasterData::UInt8(Buffer::new_zeroed(shape)),
            DataType::Int16 => RasterData::Int16(Buffer::new_zeroed(shape)),
            DataType::UInt16 => RasterData::UInt16(Buffer::new_zeroed(shape)),
            DataType::Int32 => RasterData::Int32(Buffer::new_zeroed(shape)),
            DataType::UInt32 => RasterData::UInt32(Buffer::new_zeroed(shape)),
            DataType::Float32 => RasterData::Float32(Buffer::new_zeroed(shape)),
            DataType::Float64 => RasterData::Float64(Buffer::new_zeroed(shape)),
        }
    }

    /// Wraps row-major `samples` of `shape` (width, height).
    pub fn from_vec<T: Sample>(samples: Vec<T>, shape: (usize, usize)) -> Option<Self> {
        Buffer::from_parts(samples.into_boxed_slice(), [shape.1, shape.0]).map(T::wrap)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            RasterData::Int8(_) => DataType::Int8,
            RasterData::UInt8(_) => DataType::UInt8,
            RasterData::Int16(_) => DataType::Int16,
            RasterData::UInt16(_) => DataType::UInt16,
            RasterData::Int32(_) => DataType::Int32,
            RasterData::UInt32(_) => DataType::UInt32,
            RasterData::Float32(_) => DataType::Float32,
            RasterData::Float64(_) => DataType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        with_buffer!(self, buffer => buffer.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements per row.
    pub fn stride(&self) -> usize {
        with_buffer!(self, buffer => buffer.stride())
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.data_type().size()
    }

    /// Sample at flat `index` as f64. Panics if out of range.
    pub fn get_f64(&self, index: usize) -> f64 {
        with_buffer!(self, buffer => buffer.as_slice()[index].to_f64().unwrap_or(f64::NAN))
    }

    /// Stores `value` at flat `index`, converted to the storage type.
    pub fn set_f64(&mut self, index: usize, value: f64) {
        match self {
            RasterData::Int8(buffer) => buffer.as_mut()[index] = cast(value),
            RasterData::UInt8(buffer) => buffer.as_mut()[index] = cast(value),
            RasterData::Int16(buffer) => buffer.as_mut()[index] = cast(value),
            RasterData::UInt16(buffer) => buffer.as_mut()[index] = cast(value),
            RasterData::Int32(buffer) => buffer.as_mut()[index] = cast(value),
            RasterData::UInt32(buffer) => buffer.as_mut()[index] = cast(value),
            RasterData::Float32(buffer) => buffer.as_mut()[index] = cast(value),
            RasterData::Float64(buffer) => buffer.as_mut()[index] = value,
        }
    }

    pub fn fill_f64(&mut self, value: f64) {
        (0..self.len()).for_each(|index| self.set_f64(index, value))
    }

    pub fn as_slice<T: Sample>(&self) -> Result<&[T]> {
        let actual = self.data_type();
        T::slice(self).ok_or(RasterOpsError::DataTypeMismatch {
            expected: T::DATA_TYPE,
            actual,
        })
    }

    pub fn as_mut_slice<T: Sample>(&mut self) -> Result<&mut [T]> {
        let actual = self.data_type();
        T::slice_mut(self).ok_or(RasterOpsError::DataTypeMismatch {
            expected: T::DATA_TYPE,
            actual,
        })
    }

    /// Bulk copy from storage of the same type and length.
    pub fn copy_from(&mut self, other: &RasterData) -> Result<()> {
        match (self, other) {
            (RasterData::Int8(lhs), RasterData::Int8(rhs)) => copy(lhs, rhs),
            (RasterData::UInt8(lhs), RasterData::UInt8(rhs)) => copy(lhs, rhs),
            (RasterData::Int16(lhs), RasterData::Int16(rhs)) => copy(lhs, rhs),
            (RasterData::UInt16(lhs), RasterData::UInt16(rhs)) => copy(lhs, rhs),
            (RasterData::Int32(lhs), RasterData::Int32(rhs)) => copy(lhs, rhs),
            (RasterData::UInt32(lhs), RasterData::UInt32(rhs)) => copy(lhs, rhs),
            (RasterData::Float32(lhs), RasterData::Float32(rhs)) => copy(lhs, rhs),
            (RasterData::Float64(lhs), RasterData::Float64(rhs)) => copy(lhs, rhs),
            (lhs, rhs) => Err(RasterOpsError::DataTypeMismatch {
                expected: lhs.data_type(),
                actual: rhs.data_type(),
            }),
        }
    }
}

fn copy<T: Copy>(lhs: &mut Buffer<T, 2>, rhs: &Buffer<T, 2>) -> Result<()> {
    if lhs.shape() != rhs.shape() {
        return Err(RasterOpsError::RasterSizeMismatch {
            band: String::from("<copy>"),
            expected: (lhs.shape()[1], lhs.shape()[0]),
            actual: (rhs.shape()[1], rhs.shape()[0]),
        });
    }
    lhs.as_mut().copy_from_slice(rhs.as_slice());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DataType::UInt8, 300., 255.)]
    #[case(DataType::UInt8, -4., 0.)]
    #[case(DataType::Int16, 12.7, 12.)]
    #[case(DataType::Int32, f64::NAN, 0.)]
    #[case(DataType::Float32, 0.25, 0.25)]
    fn set_converts_to_storage_type(
        #[case] data_type: DataType,
        #[case] value: f64,
        #[case] expected: f64,
    ) {
        let mut data = RasterData::zeros(data_type, (2, 2));
        data.set_f64(3, value);
        assert_eq!(data.get_f64(3), expected);
    }

    #[test]
    fn typed_slices_check_type() {
        let data = RasterData::from_vec(vec![1f32, 2., 3., 4.], (2, 2)).unwrap();
        assert_eq!(data.as_slice::<f32>().unwrap(), &[1., 2., 3., 4.]);
        assert!(matches!(
            data.as_slice::<i32>(),
            Err(RasterOpsError::DataTypeMismatch { .. })
        ));
        assert_eq!(data.stride(), 2);
        assert_eq!(data.size_in_bytes(), 16);
    }

    #[test]
    fn copy_requires_same_type() {
        let source = RasterData::from_vec(vec![1i32, 2, 3, 4], (2, 2)).unwrap();
        let mut target = RasterData::zeros(DataType::Int32, (2, 2));
        target.copy_from(&source).unwrap();
        assert_eq!(target, source);
        let mut other = RasterData::zeros(DataType::UInt8, (2, 2));
        assert!(other.copy_from(&source).is_err());
    }
}
