//! Orientation algebra - quaternion/affine conversion and small matrix helpers
//!
//! Affine matrices are row-major `[[f64; 4]; 4]`. Rows 0..3 hold the
//! rotation block and, in column 3, the translation; row 3 is `[0, 0, 0, 1]`
//! for a valid matrix. Every function here is total: degenerate input yields
//! a documented fallback value instead of an error.

use serde::{Deserialize, Serialize};

/// A 3-vector
pub type Vec3 = [f64; 3];

/// A row-major 3x3 matrix
pub type Mat33 = [[f64; 3]; 3];

/// A row-major 4x4 affine matrix
pub type Mat44 = [[f64; 4]; 4];

/// Below this, `1 - (I² + J² + K²)` is treated as a 180 degree rotation
const W_EPSILON: f64 = 1e-7;

/// Convergence threshold of the polar decomposition iteration
const POLAR_TOLERANCE: f64 = 3.0e-6;

const POLAR_MAX_ITERATIONS: usize = 100;

pub const IDENTITY44: Mat44 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

#[inline]
pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

#[inline]
pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Unit vector along `a`, `None` when `a` has zero or non-finite length
pub fn normalize(a: Vec3) -> Option<Vec3> {
    let length = norm(a);
    if length == 0.0 || !length.is_finite() {
        None
    } else {
        Some(scale(a, 1.0 / length))
    }
}

/// Unit quaternion in (W, I, J, K) order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub i: f64,
    pub j: f64,
    pub k: f64,
}

impl Quaternion {
    /// Build from all four components and normalize
    pub fn new(w: f64, i: f64, j: f64, k: f64) -> Self {
        let mut q = Self { w, i, j, k };
        q.normalize();
        q
    }

    /// Build from the three stored components, deriving W
    ///
    /// This is how NIfTI-style headers encode orientation.
    pub fn from_ijk(i: f64, j: f64, k: f64) -> Self {
        Self::new(1.0, i, j, k)
    }

    pub fn identity() -> Self {
        Self {
            w: 1.0,
            i: 0.0,
            j: 0.0,
            k: 0.0,
        }
    }

    /// Re-derive W from I, J, K so that the quaternion has unit norm
    ///
    /// If `1 - (I² + J² + K²)` vanishes the rotation is 180 degrees: I, J, K
    /// are scaled to unit length and W becomes 0. Otherwise
    /// `W = sqrt(1 - (I² + J² + K²))`. A negative supplied W flips I, J, K
    /// first, which describes the same rotation with W >= 0.
    pub fn normalize(&mut self) {
        if self.w < 0.0 {
            self.i = -self.i;
            self.j = -self.j;
            self.k = -self.k;
        }

        let ijk = self.i * self.i + self.j * self.j + self.k * self.k;
        let remainder = 1.0 - ijk;
        if remainder < W_EPSILON {
            let inv = 1.0 / ijk.sqrt();
            self.i *= inv;
            self.j *= inv;
            self.k *= inv;
            self.w = 0.0;
        } else {
            self.w = remainder.sqrt();
        }
    }

    /// Same rotation with all components negated
    pub fn negated(&self) -> Self {
        Self {
            w: -self.w,
            i: -self.i,
            j: -self.j,
            k: -self.k,
        }
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.i * self.i + self.j * self.j + self.k * self.k).sqrt()
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Build the affine matrix for a quaternion, offset and handedness factor
///
/// The third rotation column is multiplied by `qfac` (any negative value is
/// taken as -1). `q` is normalized in place first.
pub fn quaternion_to_matrix(q: &mut Quaternion, offset: Vec3, qfac: f64) -> Mat44 {
    q.normalize();
    let Quaternion { w: a, i: b, j: c, k: d } = *q;
    let handedness = if qfac < 0.0 { -1.0 } else { 1.0 };

    [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            2.0 * (b * d + a * c) * handedness,
            offset[0],
        ],
        [
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d - a * b) * handedness,
            offset[1],
        ],
        [
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            (a * a + d * d - c * c - b * b) * handedness,
            offset[2],
        ],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Recover the quaternion and handedness factor of an affine matrix
///
/// Assumes the rotation block is close to orthogonal; columns are only
/// normalized, not orthogonalized. Use
/// [`matrix_to_quaternion_orthogonalized`] for sheared input.
pub fn matrix_to_quaternion(matrix: &Mat44) -> (Quaternion, f64) {
    let r = normalized_columns(matrix);
    rotation_to_quaternion(r)
}

/// Like [`matrix_to_quaternion`] but replaces the rotation block by its
/// nearest orthogonal matrix (polar decomposition) before extraction
pub fn matrix_to_quaternion_orthogonalized(matrix: &Mat44) -> (Quaternion, f64) {
    let r = mat33_polar(&normalized_columns(matrix));
    rotation_to_quaternion(r)
}

fn normalized_columns(matrix: &Mat44) -> Mat33 {
    let mut r = rotation_block(matrix);
    for col in 0..3 {
        let length = (r[0][col] * r[0][col] + r[1][col] * r[1][col] + r[2][col] * r[2][col]).sqrt();
        if length == 0.0 {
            for (row, line) in r.iter_mut().enumerate() {
                line[col] = if row == col { 1.0 } else { 0.0 };
            }
        } else {
            for line in r.iter_mut() {
                line[col] /= length;
            }
        }
    }
    r
}

fn rotation_to_quaternion(mut r: Mat33) -> (Quaternion, f64) {
    let qfac = if mat33_determinant(&r) > 0.0 {
        1.0
    } else {
        for line in r.iter_mut() {
            line[2] = -line[2];
        }
        -1.0
    };

    let trace = r[0][0] + r[1][1] + r[2][2] + 1.0;
    let (mut a, mut b, mut c, mut d);

    if trace > 0.5 {
        a = 0.5 * trace.sqrt();
        b = 0.25 * (r[2][1] - r[1][2]) / a;
        c = 0.25 * (r[0][2] - r[2][0]) / a;
        d = 0.25 * (r[1][0] - r[0][1]) / a;
    } else {
        let xd = 1.0 + r[0][0] - (r[1][1] + r[2][2]);
        let yd = 1.0 + r[1][1] - (r[0][0] + r[2][2]);
        let zd = 1.0 + r[2][2] - (r[0][0] + r[1][1]);

        if xd >= yd && xd >= zd {
            b = 0.5 * xd.sqrt();
            c = 0.25 * (r[0][1] + r[1][0]) / b;
            d = 0.25 * (r[0][2] + r[2][0]) / b;
            a = 0.25 * (r[2][1] - r[1][2]) / b;
        } else if yd >= zd {
            c = 0.5 * yd.sqrt();
            b = 0.25 * (r[0][1] + r[1][0]) / c;
            d = 0.25 * (r[1][2] + r[2][1]) / c;
            a = 0.25 * (r[0][2] - r[2][0]) / c;
        } else {
            d = 0.5 * zd.sqrt();
            b = 0.25 * (r[0][2] + r[2][0]) / d;
            c = 0.25 * (r[1][2] + r[2][1]) / d;
            a = 0.25 * (r[1][0] - r[0][1]) / d;
        }

        if a < 0.0 {
            a = -a;
            b = -b;
            c = -c;
            d = -d;
        }
    }

    (Quaternion { w: a, i: b, j: c, k: d }, qfac)
}

/// Invert an affine matrix
///
/// The rotation block is inverted through its cofactors and the translation
/// is re-derived as `-R⁻¹·t`. A singular rotation block yields an all-zero
/// rotation with `m[3][3] == 0`, which callers test via [`is_degenerate`].
pub fn matrix_inverse(matrix: &Mat44) -> Mat44 {
    let r = rotation_block(matrix);
    let t = [matrix[0][3], matrix[1][3], matrix[2][3]];
    let det = mat33_determinant(&r);
    let inverse = mat33_cofactor_inverse(&r, det);

    let mut out = [[0.0; 4]; 4];
    for row in 0..3 {
        out[row][..3].copy_from_slice(&inverse[row]);
        out[row][3] = -dot(inverse[row], t);
    }
    out[3][3] = if det == 0.0 { 0.0 } else { 1.0 };
    out
}

/// True for the marker produced by inverting a singular matrix
pub fn is_degenerate(matrix: &Mat44) -> bool {
    matrix[3][3] == 0.0
}

/// Apply the 3x4 affine part of `matrix` to `v`, ignoring row 3
pub fn transform(matrix: &Mat44, v: Vec3) -> Vec3 {
    let mut out = [0.0; 3];
    for (row, value) in out.iter_mut().enumerate() {
        *value = matrix[row][0] * v[0] + matrix[row][1] * v[1] + matrix[row][2] * v[2] + matrix[row][3];
    }
    out
}

/// Single precision copy of an affine matrix, for renderer uploads
pub fn matrix_to_f32(matrix: &Mat44) -> [[f32; 4]; 4] {
    let mut out = [[0.0f32; 4]; 4];
    for (dst, src) in out.iter_mut().zip(matrix.iter()) {
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = *s as f32;
        }
    }
    out
}

pub fn rotation_block(matrix: &Mat44) -> Mat33 {
    [
        [matrix[0][0], matrix[0][1], matrix[0][2]],
        [matrix[1][0], matrix[1][1], matrix[1][2]],
        [matrix[2][0], matrix[2][1], matrix[2][2]],
    ]
}

pub fn mat33_determinant(r: &Mat33) -> f64 {
    r[0][0] * r[1][1] * r[2][2] - r[0][0] * r[2][1] * r[1][2] - r[1][0] * r[0][1] * r[2][2]
        + r[1][0] * r[2][1] * r[0][2]
        + r[2][0] * r[0][1] * r[1][2]
        - r[2][0] * r[1][1] * r[0][2]
}

/// Inverse of a 3x3 matrix, all zeros when singular
pub fn mat33_inverse(r: &Mat33) -> Mat33 {
    mat33_cofactor_inverse(r, mat33_determinant(r))
}

fn mat33_cofactor_inverse(r: &Mat33, det: f64) -> Mat33 {
    let inv = if det == 0.0 { 0.0 } else { 1.0 / det };
    [
        [
            inv * (r[1][1] * r[2][2] - r[2][1] * r[1][2]),
            inv * (r[2][1] * r[0][2] - r[0][1] * r[2][2]),
            inv * (r[0][1] * r[1][2] - r[1][1] * r[0][2]),
        ],
        [
            inv * (r[2][0] * r[1][2] - r[1][0] * r[2][2]),
            inv * (r[0][0] * r[2][2] - r[2][0] * r[0][2]),
            inv * (r[1][0] * r[0][2] - r[0][0] * r[1][2]),
        ],
        [
            inv * (r[1][0] * r[2][1] - r[2][0] * r[1][1]),
            inv * (r[2][0] * r[0][1] - r[0][0] * r[2][1]),
            inv * (r[0][0] * r[1][1] - r[1][0] * r[0][1]),
        ],
    ]
}

pub fn mat33_transpose(r: &Mat33) -> Mat33 {
    [
        [r[0][0], r[1][0], r[2][0]],
        [r[0][1], r[1][1], r[2][1]],
        [r[0][2], r[1][2], r[2][2]],
    ]
}

/// Maximum absolute row sum
pub fn mat33_row_norm(r: &Mat33) -> f64 {
    r.iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Maximum absolute column sum
pub fn mat33_col_norm(r: &Mat33) -> f64 {
    mat33_row_norm(&mat33_transpose(r))
}

/// Nearest orthogonal matrix by scaled Newton iteration
///
/// A singular input is nudged along its diagonal until invertible.
pub fn mat33_polar(a: &Mat33) -> Mat33 {
    let mut x = *a;

    let mut gam = mat33_determinant(&x);
    while gam == 0.0 {
        gam = 0.00001 * (0.001 + mat33_row_norm(&x));
        for (i, row) in x.iter_mut().enumerate() {
            row[i] += gam;
        }
        gam = mat33_determinant(&x);
    }

    let mut dif = 1.0;
    let mut iterations = 0;
    loop {
        let y = mat33_inverse(&x);
        let (gam, gmi) = if dif > 0.3 {
            let alp = (mat33_row_norm(&x) * mat33_col_norm(&x)).sqrt();
            let bet = (mat33_row_norm(&y) * mat33_col_norm(&y)).sqrt();
            let gam = (bet / alp).sqrt();
            (gam, 1.0 / gam)
        } else {
            (1.0, 1.0)
        };

        let mut z = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                z[i][j] = 0.5 * (gam * x[i][j] + gmi * y[j][i]);
            }
        }

        dif = (0..3)
            .flat_map(|i| (0..3).map(move |j| (i, j)))
            .map(|(i, j)| (z[i][j] - x[i][j]).abs())
            .sum();

        iterations += 1;
        if iterations > POLAR_MAX_ITERATIONS || dif < POLAR_TOLERANCE {
            return z;
        }
        x = z;
    }
}
