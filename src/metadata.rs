//! Volume header - the description a loader hands over with a voxel buffer

use crate::error::{ResliceError, Result};
use crate::orientation::{Quaternion, Vec3};
use crate::types::{ByteOrder, DataType, Rescale};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Header-derived description of a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeHeader {
    /// Display name
    pub name: String,

    /// Group shared by a volume and the masks/overlays derived from it
    pub group_id: u64,

    /// Voxel counts along x, y, z
    pub dims: [usize; 3],

    /// Physical voxel spacing along x, y, z
    pub spacing: Vec3,

    /// Number of time points (at least 1)
    pub time_points: usize,

    /// Element type of the buffer
    pub data_type: DataType,

    /// Stored-to-display value mapping
    pub rescale: Rescale,

    /// Quaternion I, J, K components; W is derived
    pub quatern: Vec3,

    /// Translation of the affine placement
    pub offset: Vec3,

    /// Handedness factor, -1 or 1
    pub qfac: f64,

    /// Byte order of the buffer as read from disk
    pub byte_order: ByteOrder,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,

    /// Custom metadata key-value pairs
    pub custom_metadata: HashMap<String, String>,
}

impl VolumeHeader {
    /// Create a header with unit spacing, one time point and identity orientation
    pub fn new(name: impl Into<String>, dims: [usize; 3], data_type: DataType) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            group_id: 0,
            dims,
            spacing: [1.0; 3],
            time_points: 1,
            data_type,
            rescale: Rescale::default(),
            quatern: [0.0; 3],
            offset: [0.0; 3],
            qfac: 1.0,
            byte_order: ByteOrder::native(),
            created_at: now,
            modified_at: now,
            custom_metadata: HashMap::new(),
        }
    }

    /// Set voxel spacing
    pub fn with_spacing(mut self, spacing: Vec3) -> Self {
        self.spacing = spacing;
        self
    }

    /// Set the number of time points
    pub fn with_time_points(mut self, time_points: usize) -> Self {
        self.time_points = time_points;
        self
    }

    /// Set the group id
    pub fn with_group(mut self, group_id: u64) -> Self {
        self.group_id = group_id;
        self
    }

    /// Set the rescale pair
    pub fn with_rescale(mut self, rescale: Rescale) -> Self {
        self.rescale = rescale;
        self
    }

    /// Set orientation from a quaternion, offset and handedness
    pub fn with_orientation(mut self, quaternion: Quaternion, offset: Vec3, qfac: f64) -> Self {
        let q = if quaternion.w < 0.0 {
            quaternion.negated()
        } else {
            quaternion
        };
        self.quatern = [q.i, q.j, q.k];
        self.offset = offset;
        self.qfac = if qfac < 0.0 { -1.0 } else { 1.0 };
        self
    }

    /// Set the on-disk byte order
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Add custom metadata
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom_metadata.insert(key.into(), value.into());
        self.touch();
    }

    /// Get custom metadata
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.custom_metadata.get(key).map(|s| s.as_str())
    }

    /// Update the modification timestamp
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    /// Unit quaternion encoded by the header
    pub fn quaternion(&self) -> Quaternion {
        Quaternion::from_ijk(self.quatern[0], self.quatern[1], self.quatern[2])
    }

    /// Number of voxels in one time point
    pub fn voxel_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Buffer length the header describes, in bytes
    pub fn expected_buffer_len(&self) -> usize {
        self.voxel_count() * self.data_type.size_in_bytes() * self.time_points
    }

    /// Check that the header describes a storable volume
    pub fn validate(&self) -> Result<()> {
        if self.dims.iter().any(|&d| d == 0) {
            return Err(ResliceError::InvalidDimensions(format!(
                "Every dimension must be non-zero, got {:?}",
                self.dims
            )));
        }

        if self.time_points == 0 {
            return Err(ResliceError::InvalidDimensions(
                "At least one time point is required".to_string(),
            ));
        }

        if self.data_type.size_in_bytes() == 0 {
            return Err(ResliceError::InvalidDataType);
        }

        if self.spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(ResliceError::Metadata(format!(
                "Spacing must be finite and positive, got {:?}",
                self.spacing
            )));
        }

        Ok(())
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ResliceError::Metadata(e.to_string()))
    }

    /// Write the header as JSON to `path`
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a JSON header from `path`
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_header() -> VolumeHeader {
        VolumeHeader::new("t1", [64, 64, 32], DataType::I16)
            .with_spacing([0.9, 0.9, 3.0])
            .with_time_points(2)
            .with_group(7)
            .with_rescale(Rescale::new(2.0, -1024.0))
    }

    #[test]
    fn test_header_creation() {
        let header = create_test_header();
        assert_eq!(header.voxel_count(), 64 * 64 * 32);
        assert_eq!(header.expected_buffer_len(), 64 * 64 * 32 * 2 * 2);
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let header = VolumeHeader::new("bad", [0, 4, 4], DataType::U8);
        assert!(matches!(
            header.validate(),
            Err(ResliceError::InvalidDimensions(_))
        ));

        let header = VolumeHeader::new("bad", [4, 4, 4], DataType::None);
        assert!(matches!(header.validate(), Err(ResliceError::InvalidDataType)));

        let header = VolumeHeader::new("bad", [4, 4, 4], DataType::U8).with_time_points(0);
        assert!(header.validate().is_err());

        let header = VolumeHeader::new("bad", [4, 4, 4], DataType::U8).with_spacing([1.0, 0.0, 1.0]);
        assert!(matches!(header.validate(), Err(ResliceError::Metadata(_))));
    }

    #[test]
    fn test_orientation_keeps_positive_w() {
        let q = Quaternion {
            w: -0.8,
            i: 0.6,
            j: 0.0,
            k: 0.0,
        };
        let header = VolumeHeader::new("o", [2, 2, 2], DataType::U8).with_orientation(q, [1.0, 2.0, 3.0], -5.0);
        assert_eq!(header.quatern, [-0.6, 0.0, 0.0]);
        assert_eq!(header.qfac, -1.0);
        let recovered = header.quaternion();
        assert!((recovered.w - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_custom_metadata() {
        let mut header = create_test_header();
        header.add_metadata("modality", "MR");
        assert_eq!(header.get_metadata("modality"), Some("MR"));
        assert_eq!(header.get_metadata("missing"), None);
        assert!(header.modified_at >= header.created_at);
    }

    #[test]
    fn test_json_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("header.json");

        let header = create_test_header();
        header.save_json(&path).unwrap();
        let loaded = VolumeHeader::load_json(&path).unwrap();

        assert_eq!(loaded.name, "t1");
        assert_eq!(loaded.dims, [64, 64, 32]);
        assert_eq!(loaded.data_type, DataType::I16);
        assert_eq!(loaded.rescale, Rescale::new(2.0, -1024.0));
        assert_eq!(loaded.group_id, 7);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            VolumeHeader::from_json("{ not json"),
            Err(ResliceError::Metadata(_))
        ));
    }
}
