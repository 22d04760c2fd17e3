//! Core data types for voxel storage

use bytemuck::Pod;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element types a volume buffer can hold
///
/// Exactly one tag applies to a volume. The discriminants follow the
/// NIfTI-1 `datatype` codes so loaders can map header fields directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum DataType {
    /// Unknown or unset element type
    None = 0,
    /// Unsigned 8-bit integer
    U8 = 2,
    /// Signed 16-bit integer
    I16 = 4,
    /// Signed 32-bit integer
    I32 = 8,
    /// 32-bit floating point
    F32 = 16,
    /// Complex number made of two 32-bit floats
    Complex64 = 32,
    /// 64-bit floating point
    F64 = 64,
    /// Packed 8-bit red, green, blue triple
    Rgb24 = 128,
    /// Signed 8-bit integer
    I8 = 256,
    /// Unsigned 16-bit integer
    U16 = 512,
    /// Unsigned 32-bit integer
    U32 = 768,
    /// Signed 64-bit integer
    I64 = 1024,
    /// Unsigned 64-bit integer
    U64 = 1280,
    /// 128-bit floating point
    F128 = 1536,
    /// Complex number made of two 64-bit floats
    Complex128 = 1792,
    /// Complex number made of two 128-bit floats
    Complex256 = 2048,
    /// Packed 8-bit red, green, blue, alpha quadruple
    Rgba32 = 2304,
}

impl DataType {
    /// Size in bytes of one element, 0 for [`DataType::None`]
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::None => 0,
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::Rgb24 => 3,
            DataType::U32 | DataType::I32 | DataType::F32 | DataType::Rgba32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 | DataType::Complex64 => 8,
            DataType::F128 | DataType::Complex128 => 16,
            DataType::Complex256 => 32,
        }
    }

    /// Width of the unit that byte order applies to
    ///
    /// Complex elements are swapped per component and colour elements are
    /// plain byte sequences.
    pub fn swap_unit(&self) -> usize {
        match self {
            DataType::Complex64 | DataType::Complex128 | DataType::Complex256 => {
                self.size_in_bytes() / 2
            }
            DataType::Rgb24 | DataType::Rgba32 => 1,
            _ => self.size_in_bytes(),
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64 | DataType::F128)
    }

    /// Check if this is a complex type
    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            DataType::Complex64 | DataType::Complex128 | DataType::Complex256
        )
    }

    /// NIfTI-1 `datatype` code
    pub fn nifti_code(&self) -> i16 {
        *self as u16 as i16
    }

    /// Map a NIfTI-1 `datatype` code, `None` for codes without a storage type
    pub fn from_nifti_code(code: i16) -> Option<Self> {
        let data_type = match code {
            0 => DataType::None,
            2 => DataType::U8,
            4 => DataType::I16,
            8 => DataType::I32,
            16 => DataType::F32,
            32 => DataType::Complex64,
            64 => DataType::F64,
            128 => DataType::Rgb24,
            256 => DataType::I8,
            512 => DataType::U16,
            768 => DataType::U32,
            1024 => DataType::I64,
            1280 => DataType::U64,
            1536 => DataType::F128,
            1792 => DataType::Complex128,
            2048 => DataType::Complex256,
            2304 => DataType::Rgba32,
            _ => return None,
        };
        Some(data_type)
    }

    /// Decode one element from exactly `size_in_bytes` native-endian bytes
    pub fn read(&self, bytes: &[u8]) -> Option<VoxelValue> {
        if *self == DataType::None || bytes.len() != self.size_in_bytes() {
            return None;
        }

        let value = match self {
            DataType::None => return None,
            DataType::U8 => VoxelValue::U8(bytes[0]),
            DataType::I8 => VoxelValue::I8(read_pod(bytes)),
            DataType::U16 => VoxelValue::U16(read_pod(bytes)),
            DataType::I16 => VoxelValue::I16(read_pod(bytes)),
            DataType::U32 => VoxelValue::U32(read_pod(bytes)),
            DataType::I32 => VoxelValue::I32(read_pod(bytes)),
            DataType::U64 => VoxelValue::U64(read_pod(bytes)),
            DataType::I64 => VoxelValue::I64(read_pod(bytes)),
            DataType::F32 => VoxelValue::F32(read_pod(bytes)),
            DataType::F64 => VoxelValue::F64(read_pod(bytes)),
            DataType::F128 => VoxelValue::F128(read_pod(bytes)),
            DataType::Complex64 => VoxelValue::Complex64(read_pod(bytes)),
            DataType::Complex128 => VoxelValue::Complex128(read_pod(bytes)),
            DataType::Complex256 => VoxelValue::Complex256(read_pod(bytes)),
            DataType::Rgb24 => VoxelValue::Rgb24(read_pod(bytes)),
            DataType::Rgba32 => VoxelValue::Rgba32(read_pod(bytes)),
        };
        Some(value)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[inline]
fn read_pod<T: Pod>(bytes: &[u8]) -> T {
    bytemuck::pod_read_unaligned(bytes)
}

#[inline]
fn scalar<T: ToPrimitive>(value: T) -> Option<f64> {
    value.to_f64()
}

/// A decoded voxel, one variant per [`DataType`]
///
/// 128-bit floats have no stable Rust representation and are carried as
/// their raw bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoxelValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    F128([u8; 16]),
    Complex64([f32; 2]),
    Complex128([f64; 2]),
    Complex256([u8; 32]),
    Rgb24([u8; 3]),
    Rgba32([u8; 4]),
}

impl VoxelValue {
    /// Element type this value belongs to
    pub fn data_type(&self) -> DataType {
        match self {
            VoxelValue::U8(_) => DataType::U8,
            VoxelValue::I8(_) => DataType::I8,
            VoxelValue::U16(_) => DataType::U16,
            VoxelValue::I16(_) => DataType::I16,
            VoxelValue::U32(_) => DataType::U32,
            VoxelValue::I32(_) => DataType::I32,
            VoxelValue::U64(_) => DataType::U64,
            VoxelValue::I64(_) => DataType::I64,
            VoxelValue::F32(_) => DataType::F32,
            VoxelValue::F64(_) => DataType::F64,
            VoxelValue::F128(_) => DataType::F128,
            VoxelValue::Complex64(_) => DataType::Complex64,
            VoxelValue::Complex128(_) => DataType::Complex128,
            VoxelValue::Complex256(_) => DataType::Complex256,
            VoxelValue::Rgb24(_) => DataType::Rgb24,
            VoxelValue::Rgba32(_) => DataType::Rgba32,
        }
    }

    /// Scalar interpretation used for bounds and display
    ///
    /// Returns `None` for element types without one (128-bit float, complex
    /// and colour types).
    pub fn as_scalar(&self) -> Option<f64> {
        match *self {
            VoxelValue::U8(v) => scalar(v),
            VoxelValue::I8(v) => scalar(v),
            VoxelValue::U16(v) => scalar(v),
            VoxelValue::I16(v) => scalar(v),
            VoxelValue::U32(v) => scalar(v),
            VoxelValue::I32(v) => scalar(v),
            VoxelValue::U64(v) => scalar(v),
            VoxelValue::I64(v) => scalar(v),
            VoxelValue::F32(v) => scalar(v),
            VoxelValue::F64(v) => scalar(v),
            VoxelValue::F128(_)
            | VoxelValue::Complex64(_)
            | VoxelValue::Complex128(_)
            | VoxelValue::Complex256(_)
            | VoxelValue::Rgb24(_)
            | VoxelValue::Rgba32(_) => None,
        }
    }

    /// Encode into `bytes`, which must be exactly one element long
    pub fn write_to(&self, bytes: &mut [u8]) {
        match self {
            VoxelValue::U8(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::I8(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::U16(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::I16(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::U32(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::I32(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::U64(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::I64(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::F32(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::F64(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::F128(v) => bytes.copy_from_slice(v),
            VoxelValue::Complex64(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::Complex128(v) => bytes.copy_from_slice(bytemuck::bytes_of(v)),
            VoxelValue::Complex256(v) => bytes.copy_from_slice(v),
            VoxelValue::Rgb24(v) => bytes.copy_from_slice(v),
            VoxelValue::Rgba32(v) => bytes.copy_from_slice(v),
        }
    }
}

/// Byte order of a stored buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the running host
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Linear mapping from stored value to display value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Rescale {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    /// Apply the mapping; a zero slope means the values are unscaled
    pub fn apply(&self, raw: f64) -> f64 {
        if self.slope == 0.0 {
            raw
        } else {
            raw.mul_add(self.slope, self.intercept)
        }
    }
}

impl Default for Rescale {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

/// Integer-rounded value range of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    pub fn width(&self) -> i64 {
        self.max - self.min
    }
}
