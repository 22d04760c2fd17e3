//! Slice - an oblique, sentinel-safe view onto a volume
//!
//! A slice is defined by a normal, an up-hint and a pivot. From those it
//! derives an in-plane basis (the perpendicular and crossproduct vectors),
//! traversal signs and a sampling window, and produces a 2D array of
//! [`VoxelRef`]s into its volume. The basis and window are cached until the
//! normal, up-hint or pivot change; the reference array itself is rebuilt on
//! every call.

use crate::error::{ResliceError, Result};
use crate::orientation::{add, cross, dot, norm, normalize, scale, sub, transform, Mat44, Vec3};
use crate::types::DataType;
use crate::volume::{Volume, VolumeHandle, VoxelRef};
use ndarray::Array2;
use parking_lot::RwLock;
use std::sync::Weak;

/// Squared length below which a projected up-hint is considered collinear
pub const PERPENDICULAR_EPSILON: f64 = 1e-7;

/// Up-hints tried, in order, when the caller's hint is collinear with the normal
pub const FALLBACK_UP_AXES: [Vec3; 2] = [[0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Sampling range along one in-plane axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisWindow {
    /// Pixel extent derived from the volume dimensions
    pub extent: usize,
    /// Traversal sign, -1 or 1
    pub stride: i32,
    /// First step (inclusive), in units of `stride × basis vector`
    pub start: i64,
    /// Last step (exclusive)
    pub stop: i64,
}

impl AxisWindow {
    /// Number of samples along this axis
    pub fn len(&self) -> usize {
        (self.stop - self.start).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cached viewport state derived from normal, up-hint and pivot
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    /// Unit normal
    pub normal: Vec3,
    /// Unit in-plane vector closest to the up-hint; walks the rows
    pub perpendicular: Vec3,
    /// Unit `normal × perpendicular`, handedness-canonicalized; walks the columns
    pub crossproduct: Vec3,
    /// Traversal sign along the normal
    pub depth_stride: i32,
    /// Window along the perpendicular (height)
    pub rows: AxisWindow,
    /// Window along the crossproduct (width)
    pub columns: AxisWindow,
    /// Aspect correction for anisotropic spacing, `[width, height]`
    pub scale: [f64; 2],
    /// Point of the plane the windows are measured from
    pub anchor: Vec3,
}

impl Viewport {
    /// Derive the viewport of a plane through `volume`
    ///
    /// `normal` must be unit length.
    ///
    /// # Panics
    ///
    /// Panics if the up-hint and both fallback axes are collinear with the
    /// normal, which cannot happen for a unit normal.
    pub fn compute(volume: &Volume, normal: Vec3, up: Vec3, pivot: Vec3) -> Self {
        let dims = volume.dims();
        let affine = volume.affine();

        let perpendicular = perpendicular_vector(normal, up);
        let crossproduct = crossproduct_vector(normal, perpendicular);

        let row_extent = pixel_extent(perpendicular, dims);
        let column_extent = pixel_extent(crossproduct, dims);

        let row_stride = stride_sign(affine, perpendicular);
        let column_stride = stride_sign(affine, crossproduct);
        let depth_stride = stride_sign(affine, normal);

        let anchor = plane_anchor(dims, normal, pivot);

        let (row_start, row_stop) = search_window(
            dims,
            anchor,
            scale(perpendicular, row_stride as f64),
            row_extent,
        );
        let (column_start, column_stop) = search_window(
            dims,
            anchor,
            scale(crossproduct, column_stride as f64),
            column_extent,
        );

        let viewport = Self {
            normal,
            perpendicular,
            crossproduct,
            depth_stride,
            rows: AxisWindow {
                extent: row_extent,
                stride: row_stride,
                start: row_start,
                stop: row_stop,
            },
            columns: AxisWindow {
                extent: column_extent,
                stride: column_stride,
                start: column_start,
                stop: column_stop,
            },
            scale: spacing_scale(volume.spacing(), perpendicular, crossproduct),
            anchor,
        };

        log::debug!(
            "Viewport for volume {}: perpendicular {:?}, crossproduct {:?}, {} x {} samples, strides ({}, {}, {})",
            volume.id(),
            viewport.perpendicular,
            viewport.crossproduct,
            viewport.width(),
            viewport.height(),
            row_stride,
            column_stride,
            depth_stride
        );
        viewport
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }
}

/// Project `up` onto the plane orthogonal to `normal`, falling back to the
/// Y and then the Z axis when the projection vanishes
fn perpendicular_vector(normal: Vec3, up: Vec3) -> Vec3 {
    std::iter::once(up)
        .chain(FALLBACK_UP_AXES)
        .map(|hint| sub(hint, scale(normal, dot(hint, normal))))
        .find(|projected| dot(*projected, *projected) >= PERPENDICULAR_EPSILON)
        .and_then(normalize)
        .unwrap_or_else(|| {
            panic!(
                "up-hint {:?} and every fallback axis are collinear with normal {:?}",
                up, normal
            )
        })
}

/// `normal × perpendicular`, negated when its smallest component is negative
fn crossproduct_vector(normal: Vec3, perpendicular: Vec3) -> Vec3 {
    let mut c = cross(normal, perpendicular);
    if c.iter().copied().fold(f64::INFINITY, f64::min) < 0.0 {
        c = scale(c, -1.0);
    }
    normalize(c).unwrap_or(c)
}

/// Largest per-axis projection of the voxel counts onto `v`
fn pixel_extent(v: Vec3, dims: [usize; 3]) -> usize {
    let extent = (0..3)
        .map(|axis| v[axis].abs() * dims[axis] as f64)
        .fold(0.0, f64::max);
    (extent.round() as usize).max(1)
}

/// Sign of the smallest component of `v` mapped through the affine's rotation
fn stride_sign(affine: &Mat44, v: Vec3) -> i32 {
    let delta = sub(transform(affine, v), transform(affine, [0.0; 3]));
    if delta.iter().copied().fold(f64::INFINITY, f64::min) < 0.0 {
        -1
    } else {
        1
    }
}

/// The volume centre moved along the normal to the pivot's depth
fn plane_anchor(dims: [usize; 3], normal: Vec3, pivot: Vec3) -> Vec3 {
    let centre = [
        dims[0] as f64 / 2.0,
        dims[1] as f64 / 2.0,
        dims[2] as f64 / 2.0,
    ];
    let depth = dot(sub(pivot, centre), normal);
    add(centre, scale(normal, depth))
}

fn inside(dims: [usize; 3], p: Vec3) -> bool {
    (0..3).all(|axis| {
        let index = p[axis].floor();
        index >= 0.0 && index < dims[axis] as f64
    })
}

/// Find `[start, stop)` along `walk` that keeps the window inside the volume
///
/// Steps outward from the anchor on both sides; whichever side leaves the
/// volume first pins that end of the window.
fn search_window(dims: [usize; 3], anchor: Vec3, walk: Vec3, extent: usize) -> (i64, i64) {
    let extent = extent as i64;
    let centred = (-(extent / 2), extent - extent / 2);

    if !inside(dims, anchor) {
        return centred;
    }

    for k in 1..=extent {
        let step = k as f64;
        if !inside(dims, add(anchor, scale(walk, step))) {
            return (k - extent, k);
        }
        if !inside(dims, sub(anchor, scale(walk, step))) {
            return (1 - k, 1 - k + extent);
        }
    }

    centred
}

/// Per-axis scale `[width, height]`, the longer physical axis being 1
fn spacing_scale(spacing: Vec3, perpendicular: Vec3, crossproduct: Vec3) -> [f64; 2] {
    let physical = |v: Vec3| norm([v[0] * spacing[0], v[1] * spacing[1], v[2] * spacing[2]]);
    let height = physical(perpendicular);
    let width = physical(crossproduct);
    let longest = width.max(height);
    if longest == 0.0 {
        [1.0, 1.0]
    } else {
        [width / longest, height / longest]
    }
}

/// Result of one sampling pass: a (height × width) array of references
#[derive(Debug, Clone)]
pub struct SliceSamples {
    refs: Array2<VoxelRef>,
    data_type: DataType,
    volume_id: u64,
}

impl SliceSamples {
    pub fn refs(&self) -> &Array2<VoxelRef> {
        &self.refs
    }

    pub fn into_refs(self) -> Array2<VoxelRef> {
        self.refs
    }

    /// (height, width)
    pub fn dim(&self) -> (usize, usize) {
        self.refs.dim()
    }

    pub fn width(&self) -> usize {
        self.refs.ncols()
    }

    pub fn height(&self) -> usize {
        self.refs.nrows()
    }

    /// Element type the references point at
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn volume_id(&self) -> u64 {
        self.volume_id
    }

    pub fn get(&self, row: usize, col: usize) -> Option<VoxelRef> {
        self.refs.get((row, col)).copied()
    }

    pub fn sentinel_count(&self) -> usize {
        self.refs.iter().filter(|r| r.is_sentinel()).count()
    }

    /// Rescaled display values
    pub fn values(&self, volume: &Volume) -> Array2<f64> {
        self.refs.map(|r| volume.display_value(*r))
    }

    /// Linear window/level mapping of the display values to 8-bit grey
    pub fn window(&self, volume: &Volume, center: f64, width: f64) -> Array2<u8> {
        let lower = center - width / 2.0;
        self.refs.map(|r| {
            let value = volume.display_value(*r);
            if width <= 0.0 {
                return if value >= center { 255 } else { 0 };
            }
            ((value - lower) / width * 255.0).clamp(0.0, 255.0) as u8
        })
    }
}

/// An oblique view onto one volume
#[derive(Debug)]
pub struct Slice {
    id: u64,
    volume: Weak<RwLock<Volume>>,
    volume_id: u64,
    normal: Vec3,
    up: Vec3,
    pivot: Vec3,
    time: usize,
    viewport: Option<Viewport>,
}

impl Slice {
    /// Create an axial slice through the centre of `volume`
    ///
    /// The slice keeps only a weak reference; it never keeps the volume alive.
    pub fn new(id: u64, volume: &VolumeHandle) -> Self {
        let guard = volume.read();
        let [x, y, z] = guard.dims();
        Self {
            id,
            volume: std::sync::Arc::downgrade(volume),
            volume_id: guard.id(),
            normal: [0.0, 0.0, 1.0],
            up: [0.0, 1.0, 0.0],
            pivot: [x as f64 / 2.0, y as f64 / 2.0, z as f64 / 2.0],
            time: 0,
            viewport: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn volume_id(&self) -> u64 {
        self.volume_id
    }

    /// The referenced volume, if it is still alive
    pub fn volume(&self) -> Option<VolumeHandle> {
        self.volume.upgrade()
    }

    /// Unit normal of the cutting plane
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn pivot(&self) -> Vec3 {
        self.pivot
    }

    pub fn time(&self) -> usize {
        self.time
    }

    /// True when the viewport must be recomputed before the next sample
    pub fn is_stale(&self) -> bool {
        self.viewport.is_none()
    }

    /// Cached viewport, `None` while stale
    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    /// Set the plane normal; it is stored normalized
    pub fn set_normal(&mut self, normal: Vec3) -> Result<()> {
        self.normal = normalize(normal).ok_or_else(|| {
            ResliceError::DegenerateVector(format!("normal {:?} has no direction", normal))
        })?;
        self.invalidate();
        Ok(())
    }

    /// Set the up-hint; collinear hints fall back to the Y, then Z axis
    pub fn set_up(&mut self, up: Vec3) -> Result<()> {
        if up.iter().any(|v| !v.is_finite()) {
            return Err(ResliceError::DegenerateVector(format!(
                "up-hint {:?} is not finite",
                up
            )));
        }
        self.up = up;
        self.invalidate();
        Ok(())
    }

    /// Set the pivot, in voxel coordinates
    pub fn set_pivot(&mut self, pivot: Vec3) -> Result<()> {
        if pivot.iter().any(|v| !v.is_finite()) {
            return Err(ResliceError::DegenerateVector(format!(
                "pivot {:?} is not finite",
                pivot
            )));
        }
        self.pivot = pivot;
        self.invalidate();
        Ok(())
    }

    /// Select the time point; does not invalidate the viewport
    pub fn set_time(&mut self, time: usize) -> Result<()> {
        let handle = self.volume.upgrade().ok_or(ResliceError::VolumeReleased)?;
        let time_points = handle.read().time_points();
        if time >= time_points {
            return Err(ResliceError::OutOfBounds(format!(
                "Time index {} outside {} time points",
                time, time_points
            )));
        }
        self.time = time;
        Ok(())
    }

    fn invalidate(&mut self) {
        self.viewport = None;
    }

    fn check_volume(&self, volume: &Volume) -> Result<()> {
        if volume.id() != self.volume_id {
            return Err(ResliceError::VolumeMismatch {
                expected: self.volume_id,
                found: volume.id(),
            });
        }
        Ok(())
    }

    fn ensure_viewport(&mut self, volume: &Volume) -> &Viewport {
        let (normal, up, pivot) = (self.normal, self.up, self.pivot);
        self.viewport
            .get_or_insert_with(|| Viewport::compute(volume, normal, up, pivot))
    }

    /// Output size `(width, height)`, recomputing the viewport if stale
    pub fn dimensions(&mut self) -> Result<(usize, usize)> {
        let handle = self.volume.upgrade().ok_or(ResliceError::VolumeReleased)?;
        let volume = handle.read();
        let viewport = self.ensure_viewport(&volume);
        Ok((viewport.width(), viewport.height()))
    }

    /// Aspect scale `[width, height]`, recomputing the viewport if stale
    pub fn scale(&mut self) -> Result<[f64; 2]> {
        let handle = self.volume.upgrade().ok_or(ResliceError::VolumeReleased)?;
        let volume = handle.read();
        Ok(self.ensure_viewport(&volume).scale)
    }

    /// Sample the plane, locking the volume for reading
    pub fn sample(&mut self) -> Result<SliceSamples> {
        let handle = self.volume.upgrade().ok_or(ResliceError::VolumeReleased)?;
        let volume = handle.read();
        self.sample_from(&volume)
    }

    /// Sample the plane from an already locked volume
    ///
    /// Useful for drawing tools that hold the write lock while painting.
    pub fn sample_from(&mut self, volume: &Volume) -> Result<SliceSamples> {
        self.check_volume(volume)?;

        let time = self.time;
        let pivot = self.pivot;
        let viewport = self.ensure_viewport(volume);

        let anchor = plane_anchor(volume.dims(), viewport.normal, pivot);
        let row_walk = scale(viewport.perpendicular, viewport.rows.stride as f64);
        let column_walk = scale(viewport.crossproduct, viewport.columns.stride as f64);
        let rows = viewport.rows;
        let columns = viewport.columns;

        let mut refs = Array2::from_elem((rows.len(), columns.len()), VoxelRef::Sentinel);
        let column_origin = scale(column_walk, columns.start as f64);
        let mut row_position = add(anchor, scale(row_walk, rows.start as f64));

        for mut line in refs.rows_mut() {
            let mut position = add(row_position, column_origin);
            for cell in line.iter_mut() {
                let index = [
                    position[0].floor() as i64,
                    position[1].floor() as i64,
                    position[2].floor() as i64,
                ];
                *cell = volume.reference_at(index, time);
                position = add(position, column_walk);
            }
            row_position = add(row_position, row_walk);
        }

        log::trace!(
            "Slice {} sampled {} x {} references at time {}",
            self.id,
            columns.len(),
            rows.len(),
            time
        );

        Ok(SliceSamples {
            refs,
            data_type: volume.data_type(),
            volume_id: volume.id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::VolumeHeader;
    use crate::orientation::Quaternion;

    const EPS: f64 = 1e-9;

    fn assert_vec_close(a: Vec3, b: Vec3) {
        for axis in 0..3 {
            assert!((a[axis] - b[axis]).abs() < EPS, "{:?} != {:?}", a, b);
        }
    }

    fn cube(dims: [usize; 3]) -> Volume {
        Volume::new(1, "cube", dims, DataType::I16).unwrap()
    }

    #[test]
    fn test_perpendicular_projects_up_hint() {
        let p = perpendicular_vector([0.0, 0.0, 1.0], [0.0, 2.0, 0.5]);
        assert_vec_close(p, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_perpendicular_falls_back_to_y_then_z() {
        let p = perpendicular_vector([1.0, 0.0, 0.0], [3.0, 0.0, 0.0]);
        assert_vec_close(p, [0.0, 1.0, 0.0]);

        let p = perpendicular_vector([0.0, 1.0, 0.0], [0.0, -1.0, 0.0]);
        assert_vec_close(p, [0.0, 0.0, 1.0]);

        let p = perpendicular_vector([0.0, 0.0, 1.0], [0.0; 3]);
        assert_vec_close(p, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_crossproduct_is_canonicalized() {
        let c = crossproduct_vector([0.0, 0.0, 1.0], [0.0, 1.0, 0.0]);
        assert_vec_close(c, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_pixel_extent() {
        assert_eq!(pixel_extent([0.0, 1.0, 0.0], [10, 20, 30]), 20);
        assert_eq!(pixel_extent([0.6, 0.8, 0.0], [10, 10, 10]), 8);
        assert_eq!(pixel_extent([0.0, 0.0, 1.0], [4, 4, 0]), 1);
    }

    #[test]
    fn test_stride_sign_follows_affine() {
        let mut q = Quaternion::identity();
        let identity = crate::orientation::quaternion_to_matrix(&mut q, [3.0, 3.0, 3.0], 1.0);
        assert_eq!(stride_sign(&identity, [0.0, 1.0, 0.0]), 1);
        assert_eq!(stride_sign(&identity, [0.0, -1.0, 0.0]), -1);

        let flipped = crate::orientation::quaternion_to_matrix(&mut q, [0.0; 3], -1.0);
        assert_eq!(stride_sign(&flipped, [0.0, 0.0, 1.0]), -1);
    }

    #[test]
    fn test_search_window_centred_anchor() {
        let window = search_window([10, 10, 10], [5.0, 5.0, 5.0], [0.0, 1.0, 0.0], 10);
        assert_eq!(window, (-5, 5));
    }

    #[test]
    fn test_search_window_offset_anchor() {
        // Anchor close to the low face: the window leans towards the high side.
        let window = search_window([10, 10, 10], [2.0, 5.0, 5.0], [1.0, 0.0, 0.0], 10);
        assert_eq!(window, (-2, 8));

        // Close to the high face: pinned at the exit on that side.
        let window = search_window([10, 10, 10], [8.5, 5.0, 5.0], [1.0, 0.0, 0.0], 10);
        assert_eq!(window, (-8, 2));
    }

    #[test]
    fn test_search_window_outside_is_centred() {
        let window = search_window([10, 10, 10], [15.0, 5.0, 5.0], [0.0, 1.0, 0.0], 9);
        assert_eq!(window, (-4, 5));
    }

    #[test]
    fn test_spacing_scale() {
        let scale = spacing_scale([1.0, 1.0, 3.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]);
        assert_eq!(scale, [1.0 / 3.0, 1.0]);

        let iso = spacing_scale([2.0, 2.0, 2.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]);
        assert_eq!(iso, [1.0, 1.0]);
    }

    #[test]
    fn test_axial_viewport() {
        let volume = cube([10, 10, 10]);
        let viewport = Viewport::compute(&volume, [0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 0.0, 5.0]);
        assert_vec_close(viewport.perpendicular, [0.0, 1.0, 0.0]);
        assert_vec_close(viewport.crossproduct, [1.0, 0.0, 0.0]);
        assert_eq!((viewport.width(), viewport.height()), (10, 10));
        assert_eq!(viewport.rows.stride, 1);
        assert_eq!(viewport.columns.stride, 1);
        assert_eq!(viewport.depth_stride, 1);
        assert_vec_close(viewport.anchor, [5.0, 5.0, 5.0]);
    }

    #[test]
    fn test_setters_invalidate() {
        let handle = cube([4, 4, 4]).into_handle();
        let mut slice = Slice::new(2, &handle);
        assert!(slice.is_stale());

        slice.sample().unwrap();
        assert!(!slice.is_stale());

        slice.set_time(0).unwrap();
        assert!(!slice.is_stale());

        slice.set_pivot([1.0, 1.0, 1.0]).unwrap();
        assert!(slice.is_stale());
        slice.sample().unwrap();

        slice.set_up([1.0, 0.0, 0.0]).unwrap();
        assert!(slice.is_stale());
        slice.sample().unwrap();

        slice.set_normal([0.0, 2.0, 0.0]).unwrap();
        assert!(slice.is_stale());
        assert_eq!(slice.normal(), [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_setters_reject_degenerate_input() {
        let handle = cube([4, 4, 4]).into_handle();
        let mut slice = Slice::new(2, &handle);
        assert!(matches!(
            slice.set_normal([0.0; 3]),
            Err(ResliceError::DegenerateVector(_))
        ));
        assert!(slice.set_up([f64::NAN, 0.0, 0.0]).is_err());
        assert!(slice.set_pivot([0.0, f64::INFINITY, 0.0]).is_err());
        assert!(matches!(slice.set_time(1), Err(ResliceError::OutOfBounds(_))));
        assert_eq!(slice.normal(), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_volume_mismatch() {
        let handle = cube([4, 4, 4]).into_handle();
        let other = Volume::new(9, "other", [4, 4, 4], DataType::I16).unwrap();
        let mut slice = Slice::new(2, &handle);
        assert!(matches!(
            slice.sample_from(&other),
            Err(ResliceError::VolumeMismatch {
                expected: 1,
                found: 9
            })
        ));
    }

    #[test]
    fn test_window_mapping() {
        let header = VolumeHeader::new("w", [2, 1, 1], DataType::I16);
        let buffer = bytemuck::cast_slice::<i16, u8>(&[0, 100]).to_vec();
        let handle = Volume::from_header(1, header, buffer).unwrap().into_handle();

        let mut slice = Slice::new(2, &handle);
        let samples = slice.sample().unwrap();
        assert_eq!(samples.dim(), (1, 2));

        let volume = handle.read();
        let grey = samples.window(&volume, 50.0, 100.0);
        assert_eq!(grey[[0, 0]], 0);
        assert_eq!(grey[[0, 1]], 255);

        let thresholded = samples.window(&volume, 50.0, 0.0);
        assert_eq!(thresholded[[0, 1]], 255);
    }
}
