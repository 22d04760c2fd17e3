//! volslice - oblique reslicing for NIfTI/Analyze-style medical volumes
//!
//! Given a 3D(+time) volume and an arbitrary cutting plane, this crate
//! produces a 2D array of live references into the volume's voxels, ready for
//! windowing and display, or for drawing tools that paint straight into a
//! mask volume through the same view.
//!
//! # Features
//!
//! - Quaternion + offset orientation model with affine conversion and inverse
//! - One typed buffer abstraction over every NIfTI element type
//! - Oblique slices from a normal, an up-hint and a pivot, with cached basis
//! - Sentinel semantics: samples outside the volume never alias real voxels
//!
//! File parsing is left to the caller: a loader fills a [`VolumeHeader`]
//! and hands over the raw voxel buffer.
//!
//! # Example
//!
//! ```rust
//! use volslice::{DataType, IdGenerator, Slice, Volume, VoxelValue};
//!
//! # fn example() -> volslice::Result<()> {
//! let ids = IdGenerator::new();
//! let volume = Volume::new(ids.next_id(), "t1", [10, 10, 10], DataType::I16)?;
//! let mask = volume.derive_mask(ids.next_id(), "lesion")?.into_handle();
//!
//! let mut slice = Slice::new(ids.next_id(), &mask);
//! slice.set_normal([0.0, 0.0, 1.0])?;
//! slice.set_pivot([0.0, 0.0, 5.0])?;
//!
//! let samples = slice.sample()?;
//! let mut guard = mask.write();
//! if let Some(pixel) = samples.get(3, 4) {
//!     guard.set(pixel, VoxelValue::I16(1))?;
//! }
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod error;
pub mod metadata;
pub mod orientation;
pub mod slice;
pub mod types;
pub mod utils;
pub mod volume;

// Re-exports
pub use error::{ResliceError, Result};
pub use metadata::VolumeHeader;
pub use orientation::{
    matrix_inverse, matrix_to_quaternion, matrix_to_quaternion_orthogonalized,
    quaternion_to_matrix, transform, Mat44, Quaternion, Vec3,
};
pub use slice::{AxisWindow, Slice, SliceSamples, Viewport};
pub use types::{ByteOrder, DataType, Rescale, ValueRange, VoxelValue};
pub use utils::IdGenerator;
pub use volume::{Volume, VolumeHandle, VoxelRef};

/// Version of the crate
pub const VOLSLICE_VERSION: &str = env!("CARGO_PKG_VERSION");
