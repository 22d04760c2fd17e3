//! Volume - the 3D(+time) voxel store a slice samples from

use crate::error::{ResliceError, Result};
use crate::metadata::VolumeHeader;
use crate::orientation::{
    is_degenerate, matrix_inverse, quaternion_to_matrix, transform, Mat44, Quaternion, Vec3,
};
use crate::types::{ByteOrder, DataType, Rescale, ValueRange, VoxelValue};
use crate::utils::{format_bytes, swap_bytes};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared, lockable volume as held by the viewer and referenced by slices
pub type VolumeHandle = Arc<RwLock<Volume>>;

/// Element type of volumes derived as drawing masks
pub const MASK_DATA_TYPE: DataType = DataType::I16;

/// Non-owning reference to one element of a volume
///
/// `Voxel` carries the byte offset of the element inside the volume buffer;
/// `Sentinel` stands for "outside the volume" and resolves to the volume's
/// sentinel element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoxelRef {
    Voxel(usize),
    Sentinel,
}

impl VoxelRef {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, VoxelRef::Sentinel)
    }

    /// Byte offset into the buffer, `None` for the sentinel
    pub fn offset(&self) -> Option<usize> {
        match self {
            VoxelRef::Voxel(offset) => Some(*offset),
            VoxelRef::Sentinel => None,
        }
    }
}

/// A 3D(+time) scalar or vector volume
#[derive(Debug)]
pub struct Volume {
    id: u64,
    header: VolumeHeader,
    quaternion: Quaternion,
    affine: Mat44,
    bounds: ValueRange,
    buffer: Vec<u8>,
    sentinel: Vec<u8>,
    raw_header: Option<Bytes>,
}

impl Volume {
    /// Create a volume from a loader's header and voxel buffer
    ///
    /// The buffer must hold exactly `voxels × element size × time points`
    /// bytes. A buffer in foreign byte order is swapped to native order.
    pub fn from_header(id: u64, mut header: VolumeHeader, buffer: Vec<u8>) -> Result<Self> {
        header.validate()?;

        let expected = header.expected_buffer_len();
        if buffer.len() != expected {
            return Err(ResliceError::InvalidDimensions(format!(
                "Buffer size mismatch: expected {} bytes, got {}",
                expected,
                buffer.len()
            )));
        }

        let mut quaternion = header.quaternion();
        let affine = quaternion_to_matrix(&mut quaternion, header.offset, header.qfac);
        let sentinel = vec![0u8; header.data_type.size_in_bytes()];
        header.qfac = if header.qfac < 0.0 { -1.0 } else { 1.0 };

        let needs_swap = header.byte_order != ByteOrder::native();

        let mut volume = Self {
            id,
            header,
            quaternion,
            affine,
            bounds: ValueRange::default(),
            buffer,
            sentinel,
            raw_header: None,
        };

        if needs_swap {
            volume.byte_swap_in_place();
        } else {
            volume.compute_bounds();
        }

        log::debug!("Created volume {}: {}", volume.id, volume.summary());
        Ok(volume)
    }

    /// Create a zero-filled, single time point volume with identity orientation
    pub fn new(id: u64, name: impl Into<String>, dims: [usize; 3], data_type: DataType) -> Result<Self> {
        let header = VolumeHeader::new(name, dims, data_type);
        let buffer = vec![0u8; header.expected_buffer_len()];
        Self::from_header(id, header, buffer)
    }

    /// Keep the raw on-disk header bytes alongside the volume
    pub fn with_raw_header(mut self, raw_header: Bytes) -> Self {
        self.raw_header = Some(raw_header);
        self
    }

    /// Wrap into a shared handle that slices can reference
    pub fn into_handle(self) -> VolumeHandle {
        Arc::new(RwLock::new(self))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn group_id(&self) -> u64 {
        self.header.group_id
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    /// Voxel counts along x, y, z
    pub fn dims(&self) -> [usize; 3] {
        self.header.dims
    }

    pub fn spacing(&self) -> Vec3 {
        self.header.spacing
    }

    pub fn time_points(&self) -> usize {
        self.header.time_points
    }

    pub fn data_type(&self) -> DataType {
        self.header.data_type
    }

    pub fn element_size(&self) -> usize {
        self.header.data_type.size_in_bytes()
    }

    pub fn rescale(&self) -> Rescale {
        self.header.rescale
    }

    /// Integer-rounded minimum and maximum sample values
    pub fn bounds(&self) -> ValueRange {
        self.bounds
    }

    pub fn quaternion(&self) -> Quaternion {
        self.quaternion
    }

    pub fn offset(&self) -> Vec3 {
        self.header.offset
    }

    pub fn qfac(&self) -> f64 {
        self.header.qfac
    }

    /// Affine placement derived from quaternion, offset and qfac
    pub fn affine(&self) -> &Mat44 {
        &self.affine
    }

    pub fn raw_header(&self) -> Option<&Bytes> {
        self.raw_header.as_ref()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of voxels in one time point
    pub fn voxel_count(&self) -> usize {
        self.header.voxel_count()
    }

    /// Bytes between the starts of consecutive time points
    pub fn time_stride(&self) -> usize {
        self.voxel_count() * self.element_size()
    }

    /// Replace the orientation and re-derive the affine matrix
    pub fn set_orientation(&mut self, quaternion: Quaternion, offset: Vec3, qfac: f64) {
        let mut quaternion = quaternion;
        self.affine = quaternion_to_matrix(&mut quaternion, offset, qfac);
        self.quaternion = quaternion;
        self.header.quatern = [quaternion.i, quaternion.j, quaternion.k];
        self.header.offset = offset;
        self.header.qfac = if qfac < 0.0 { -1.0 } else { 1.0 };
        self.header.touch();
    }

    /// Patient-space position of a (fractional) voxel index
    pub fn voxel_to_patient(&self, voxel: Vec3) -> Vec3 {
        let spacing = self.spacing();
        let scaled = [
            voxel[0] * spacing[0],
            voxel[1] * spacing[1],
            voxel[2] * spacing[2],
        ];
        transform(&self.affine, scaled)
    }

    /// Fractional voxel index of a patient-space position
    ///
    /// Returns `None` when the affine placement is not invertible.
    pub fn patient_to_voxel(&self, point: Vec3) -> Option<Vec3> {
        let inverse = matrix_inverse(&self.affine);
        if is_degenerate(&inverse) {
            return None;
        }
        let scaled = transform(&inverse, point);
        let spacing = self.spacing();
        Some([
            scaled[0] / spacing[0],
            scaled[1] / spacing[1],
            scaled[2] / spacing[2],
        ])
    }

    /// Scan every element and cache the integer-rounded minimum and maximum
    ///
    /// Element types without a scalar interpretation leave the bounds at zero.
    pub fn compute_bounds(&mut self) {
        let data_type = self.data_type();
        let mut range: Option<(f64, f64)> = None;

        for element in self.buffer.chunks_exact(data_type.size_in_bytes()) {
            let Some(value) = data_type.read(element).and_then(|v| v.as_scalar()) else {
                log::warn!(
                    "Cannot compute bounds of volume {} with element type {}",
                    self.id,
                    data_type
                );
                self.bounds = ValueRange::default();
                return;
            };

            let value = value.round();
            range = Some(match range {
                None => (value, value),
                Some((min, max)) => (min.min(value), max.max(value)),
            });
        }

        self.bounds = range
            .map(|(min, max)| ValueRange::new(min as i64, max as i64))
            .unwrap_or_default();
    }

    /// Reverse the byte order of every element in place, then recompute bounds
    ///
    /// A no-op for single-byte and colour element types.
    pub fn byte_swap_in_place(&mut self) {
        let unit = self.data_type().swap_unit();
        swap_bytes(&mut self.buffer, unit);
        swap_bytes(&mut self.sentinel, unit);

        self.header.byte_order = match self.header.byte_order {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        };
        if unit > 1 {
            log::info!(
                "Byte-swapped volume {} ({}, {}-byte words)",
                self.id,
                format_bytes(self.buffer.len()),
                unit
            );
        }
        self.compute_bounds();
    }

    /// Derive an empty drawing mask over the same anatomy
    ///
    /// The mask shares group, spacing, orientation and time points, stores
    /// [`MASK_DATA_TYPE`] elements and starts zeroed.
    pub fn derive_mask(&self, id: u64, name: impl Into<String>) -> Result<Volume> {
        let now = Utc::now();
        let header = VolumeHeader {
            name: name.into(),
            data_type: MASK_DATA_TYPE,
            rescale: Rescale::default(),
            byte_order: ByteOrder::native(),
            created_at: now,
            modified_at: now,
            custom_metadata: HashMap::new(),
            ..self.header.clone()
        };
        let buffer = vec![0u8; header.expected_buffer_len()];

        log::info!(
            "Deriving mask {} from volume {} (group {})",
            id,
            self.id,
            self.group_id()
        );
        Volume::from_header(id, header, buffer)
    }

    /// Reference to voxel (x, y, z) at time point `time`
    pub fn voxel_ref(&self, x: usize, y: usize, z: usize, time: usize) -> VoxelRef {
        let [dx, dy, dz] = self.dims();
        if x >= dx || y >= dy || z >= dz {
            return VoxelRef::Sentinel;
        }
        self.reference_at([x as i64, y as i64, z as i64], time)
    }

    /// Reference for a floored sample position, the sentinel when outside
    pub(crate) fn reference_at(&self, index: [i64; 3], time: usize) -> VoxelRef {
        let dims = self.dims();
        if index
            .iter()
            .zip(dims.iter())
            .any(|(&i, &d)| i < 0 || i as usize >= d)
        {
            return VoxelRef::Sentinel;
        }

        let [x, y, z] = [index[0] as usize, index[1] as usize, index[2] as usize];
        let element_size = self.element_size();
        let linear = z * dims[0] * dims[1] + y * dims[0] + x;
        let offset = linear * element_size + time * self.time_stride();

        if offset + element_size <= self.buffer.len() {
            VoxelRef::Voxel(offset)
        } else {
            VoxelRef::Sentinel
        }
    }

    fn element_bytes(&self, reference: VoxelRef) -> &[u8] {
        let element_size = self.element_size();
        match reference {
            VoxelRef::Voxel(offset) if offset + element_size <= self.buffer.len() => {
                &self.buffer[offset..offset + element_size]
            }
            _ => &self.sentinel,
        }
    }

    /// Value behind a reference
    ///
    /// The sentinel and references past the end of the buffer read the
    /// sentinel element.
    pub fn get(&self, reference: VoxelRef) -> Option<VoxelValue> {
        self.data_type().read(self.element_bytes(reference))
    }

    /// Value of voxel (x, y, z) at time point `time`
    pub fn value_at(&self, x: usize, y: usize, z: usize, time: usize) -> Option<VoxelValue> {
        self.get(self.voxel_ref(x, y, z, time))
    }

    /// Write through a reference
    ///
    /// Returns `Ok(false)` without writing when the reference is the
    /// sentinel, so drawing outside the volume is harmless.
    pub fn set(&mut self, reference: VoxelRef, value: VoxelValue) -> Result<bool> {
        if value.data_type() != self.data_type() {
            return Err(ResliceError::TypeMismatch {
                expected: self.data_type(),
                found: value.data_type(),
            });
        }

        let VoxelRef::Voxel(offset) = reference else {
            return Ok(false);
        };

        let element_size = self.element_size();
        if offset + element_size > self.buffer.len() {
            return Err(ResliceError::OutOfBounds(format!(
                "Offset {} outside buffer of {} bytes",
                offset,
                self.buffer.len()
            )));
        }

        value.write_to(&mut self.buffer[offset..offset + element_size]);
        Ok(true)
    }

    /// Rescaled display value behind a reference, 0 for non-scalar types
    pub fn display_value(&self, reference: VoxelRef) -> f64 {
        self.get(reference)
            .and_then(|v| v.as_scalar())
            .map(|raw| self.rescale().apply(raw))
            .unwrap_or(0.0)
    }

    /// Value shown for samples outside the volume
    pub fn sentinel_value(&self) -> Option<VoxelValue> {
        self.data_type().read(&self.sentinel)
    }

    /// Change the value shown for samples outside the volume
    pub fn set_sentinel(&mut self, value: VoxelValue) -> Result<()> {
        if value.data_type() != self.data_type() {
            return Err(ResliceError::TypeMismatch {
                expected: self.data_type(),
                found: value.data_type(),
            });
        }
        value.write_to(&mut self.sentinel);
        Ok(())
    }

    /// Get a summary string of the volume
    pub fn summary(&self) -> String {
        let [x, y, z] = self.dims();
        format!(
            "'{}' {} x {} x {} x {} ({}), {}",
            self.name(),
            x,
            y,
            z,
            self.time_points(),
            self.data_type(),
            format_bytes(self.byte_len())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::IdGenerator;

    fn i16_volume(values: &[i16], dims: [usize; 3]) -> Volume {
        let header = VolumeHeader::new("test", dims, DataType::I16);
        let buffer = bytemuck::cast_slice::<i16, u8>(values).to_vec();
        Volume::from_header(1, header, buffer).unwrap()
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let header = VolumeHeader::new("bad", [2, 2, 2], DataType::U16);
        let result = Volume::from_header(1, header, vec![0u8; 15]);
        assert!(matches!(result, Err(ResliceError::InvalidDimensions(_))));
    }

    #[test]
    fn test_bounds_integer() {
        let volume = i16_volume(&[5, -3, 12, 0, 7, 7, 1, 2], [2, 2, 2]);
        assert_eq!(volume.bounds(), ValueRange::new(-3, 12));
    }

    #[test]
    fn test_bounds_float_rounding() {
        let values = [0.4f32, 2.6, -1.5, 1.0];
        let header = VolumeHeader::new("f", [2, 2, 1], DataType::F32);
        let buffer = bytemuck::cast_slice::<f32, u8>(&values).to_vec();
        let volume = Volume::from_header(1, header, buffer).unwrap();
        assert_eq!(volume.bounds(), ValueRange::new(-2, 3));
    }

    #[test]
    fn test_bounds_unsupported_type() {
        let header = VolumeHeader::new("rgb", [2, 1, 1], DataType::Rgb24);
        let volume = Volume::from_header(1, header, vec![200u8; 6]).unwrap();
        assert_eq!(volume.bounds(), ValueRange::default());
    }

    #[test]
    fn test_foreign_byte_order_is_swapped() {
        let foreign = match ByteOrder::native() {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        };
        let stored: Vec<u8> = [300i16, -2]
            .iter()
            .flat_map(|v| {
                let mut bytes = v.to_ne_bytes();
                bytes.reverse();
                bytes
            })
            .collect();
        let header = VolumeHeader::new("be", [2, 1, 1], DataType::I16).with_byte_order(foreign);
        let volume = Volume::from_header(1, header, stored).unwrap();

        assert_eq!(volume.header().byte_order, ByteOrder::native());
        assert_eq!(volume.value_at(0, 0, 0, 0), Some(VoxelValue::I16(300)));
        assert_eq!(volume.value_at(1, 0, 0, 0), Some(VoxelValue::I16(-2)));
        assert_eq!(volume.bounds(), ValueRange::new(-2, 300));
    }

    #[test]
    fn test_byte_swap_single_byte_is_noop() {
        let mut volume = Volume::new(1, "u8", [2, 2, 1], DataType::U8).unwrap();
        volume.set(VoxelRef::Voxel(1), VoxelValue::U8(9)).unwrap();
        volume.byte_swap_in_place();
        assert_eq!(volume.buffer(), &[0, 9, 0, 0]);
    }

    #[test]
    fn test_reference_write_through() {
        let mut volume = Volume::new(1, "v", [4, 4, 4], DataType::I16).unwrap();
        let reference = volume.voxel_ref(1, 2, 3, 0);
        assert_eq!(reference, VoxelRef::Voxel((3 * 16 + 2 * 4 + 1) * 2));

        assert!(volume.set(reference, VoxelValue::I16(42)).unwrap());
        assert_eq!(volume.value_at(1, 2, 3, 0), Some(VoxelValue::I16(42)));
    }

    #[test]
    fn test_sentinel_is_never_written() {
        let mut volume = Volume::new(1, "v", [2, 2, 2], DataType::I16).unwrap();
        assert_eq!(volume.voxel_ref(2, 0, 0, 0), VoxelRef::Sentinel);
        assert!(!volume.set(VoxelRef::Sentinel, VoxelValue::I16(5)).unwrap());
        assert_eq!(volume.sentinel_value(), Some(VoxelValue::I16(0)));

        volume.set_sentinel(VoxelValue::I16(-1000)).unwrap();
        assert_eq!(volume.get(VoxelRef::Sentinel), Some(VoxelValue::I16(-1000)));
    }

    #[test]
    fn test_type_mismatch() {
        let mut volume = Volume::new(1, "v", [2, 2, 2], DataType::I16).unwrap();
        let result = volume.set(VoxelRef::Voxel(0), VoxelValue::F32(1.0));
        assert!(matches!(
            result,
            Err(ResliceError::TypeMismatch {
                expected: DataType::I16,
                found: DataType::F32
            })
        ));
    }

    #[test]
    fn test_time_points() {
        let header = VolumeHeader::new("4d", [2, 2, 2], DataType::U8).with_time_points(3);
        let volume = Volume::from_header(1, header, vec![0u8; 24]).unwrap();
        assert_eq!(volume.time_stride(), 8);
        assert_eq!(volume.voxel_ref(1, 1, 1, 2), VoxelRef::Voxel(7 + 16));
        assert_eq!(volume.voxel_ref(0, 0, 0, 3), VoxelRef::Sentinel);
    }

    #[test]
    fn test_derive_mask() {
        let ids = IdGenerator::new();
        let header = VolumeHeader::new("ct", [3, 3, 3], DataType::F32)
            .with_spacing([0.5, 0.5, 2.0])
            .with_group(4)
            .with_time_points(2)
            .with_orientation(Quaternion::new(0.0, 0.0, 0.0, 1.0), [1.0, 2.0, 3.0], -1.0);
        let source = Volume::from_header(ids.next_id(), header, vec![1u8; 27 * 4 * 2]).unwrap();

        let mask = source.derive_mask(ids.next_id(), "ct mask").unwrap();
        assert_eq!(mask.id(), 2);
        assert_eq!(mask.data_type(), MASK_DATA_TYPE);
        assert_eq!(mask.group_id(), 4);
        assert_eq!(mask.spacing(), [0.5, 0.5, 2.0]);
        assert_eq!(mask.time_points(), 2);
        assert_eq!(mask.affine(), source.affine());
        assert_eq!(mask.byte_len(), 27 * 2 * 2);
        assert!(mask.buffer().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_patient_space_round_trip() {
        let header = VolumeHeader::new("o", [8, 8, 8], DataType::U8)
            .with_spacing([0.5, 1.0, 2.0])
            .with_orientation(Quaternion::new(0.9, 0.1, -0.3, 0.2), [10.0, -4.0, 2.5], -1.0);
        let volume = Volume::from_header(1, header, vec![0u8; 512]).unwrap();

        let voxel = [1.5, 6.0, 3.25];
        let patient = volume.voxel_to_patient(voxel);
        let back = volume.patient_to_voxel(patient).unwrap();
        for axis in 0..3 {
            assert!((back[axis] - voxel[axis]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_raw_header_and_summary() {
        let volume = Volume::new(3, "brain", [4, 4, 2], DataType::U16)
            .unwrap()
            .with_raw_header(Bytes::from_static(b"n+1\0"));
        assert_eq!(volume.raw_header().map(|b| b.len()), Some(4));
        assert_eq!(volume.summary(), "'brain' 4 x 4 x 2 x 1 (U16), 64 B");
    }

    #[test]
    fn test_display_value_applies_rescale() {
        let header = VolumeHeader::new("ct", [1, 1, 1], DataType::I16)
            .with_rescale(Rescale::new(1.0, -1024.0));
        let buffer = 1000i16.to_ne_bytes().to_vec();
        let volume = Volume::from_header(1, header, buffer).unwrap();
        assert_eq!(volume.display_value(VoxelRef::Voxel(0)), -24.0);
    }
}
