use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

use crate::error::GeometryError;

const ORIENTATION_TOLERANCE: f64 = 1e-4;
/// Scaled by the product of the axis lengths
const DEGENERATE_TOLERANCE: f64 = 1e-9;
const GEOMETRY_TOLERANCE: f64 = 1e-4;
const SPACING_RELATIVE_TOLERANCE: f64 = 1e-2;

/// Geometry tags of one slice (or one frame of a multi-frame dataset)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceGeometry {
    pub image_position_patient: [f64; 3],
    /// Direction cosines of the first row and of the first column
    pub image_orientation_patient: ([f64; 3], [f64; 3]),
    /// `(row spacing, column spacing)` as stored in `PixelSpacing`
    pub pixel_spacing: (f64, f64),
}

impl SliceGeometry {
    pub fn position(&self) -> Vector3<f64> {
        Vector3::from(self.image_position_patient)
    }

    pub fn row_cosine(&self) -> Vector3<f64> {
        Vector3::from(self.image_orientation_patient.0)
    }

    pub fn column_cosine(&self) -> Vector3<f64> {
        Vector3::from(self.image_orientation_patient.1)
    }

    /// Normal of the slice plane
    pub fn normal(&self) -> Vector3<f64> {
        self.row_cosine().cross(&self.column_cosine())
    }

    pub(crate) fn same_position(&self, other: &Self, tolerance: f64) -> bool {
        (self.position() - other.position()).amax() <= tolerance
    }

    pub(crate) fn same_orientation(&self, other: &Self, tolerance: f64) -> bool {
        (self.row_cosine() - other.row_cosine()).amax() <= tolerance
            && (self.column_cosine() - other.column_cosine()).amax() <= tolerance
    }

    pub(crate) fn same_spacing(&self, other: &Self, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance * a.abs().max(b.abs());
        close(self.pixel_spacing.0, other.pixel_spacing.0)
            && close(self.pixel_spacing.1, other.pixel_spacing.1)
    }
}

/// Homogeneous 4x4 voxel-to-world transform
///
/// Column `n` of the upper-left 3x3 block is the world direction of voxel
/// index axis `n`, scaled by the spacing along that axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Affine(Matrix4<f64>);

impl Affine {
    /// Build from a 4x4 matrix, rejecting non-affine or singular input
    pub fn from_matrix(matrix: Matrix4<f64>) -> Result<Self, GeometryError> {
        let last_row = [matrix[(3, 0)], matrix[(3, 1)], matrix[(3, 2)], matrix[(3, 3)]];
        if last_row != [0.0, 0.0, 0.0, 1.0] {
            return Err(GeometryError::Degenerate(format!(
                "last row must be [0, 0, 0, 1], got {last_row:?}"
            )));
        }
        let affine = Self(matrix);
        let det = affine.determinant();
        let volume = (0..3).map(|axis| affine.axis(axis).norm()).product::<f64>();
        if !det.is_finite() || volume == 0.0 || det.abs() <= DEGENERATE_TOLERANCE * volume {
            return Err(GeometryError::Degenerate(format!(
                "determinant of the 3x3 block is {det}"
            )));
        }
        Ok(affine)
    }

    /// Build from the three scaled axis vectors and the origin
    pub fn from_axes(axes: [Vector3<f64>; 3], origin: Vector3<f64>) -> Result<Self, GeometryError> {
        let mut matrix = Matrix4::identity();
        matrix
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::from_columns(&axes));
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&origin);
        Self::from_matrix(matrix)
    }

    pub fn identity() -> Self {
        Self(Matrix4::identity())
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    pub fn into_matrix(self) -> Matrix4<f64> {
        self.0
    }

    pub fn origin(&self) -> [f64; 3] {
        self.0.fixed_view::<3, 1>(0, 3).into_owned().into()
    }

    /// Scaled direction of voxel index axis `axis` (0..3)
    pub fn axis(&self, axis: usize) -> Vector3<f64> {
        self.0.fixed_view::<3, 1>(0, axis).into_owned()
    }

    /// Length of each voxel index axis in world units
    pub fn spacing(&self) -> [f64; 3] {
        [0, 1, 2].map(|axis| self.axis(axis).norm())
    }

    /// World coordinates of a (possibly fractional) voxel index
    pub fn apply(&self, index: [f64; 3]) -> [f64; 3] {
        let world = self.0 * Vector4::new(index[0], index[1], index[2], 1.0);
        [world.x, world.y, world.z]
    }

    pub fn determinant(&self) -> f64 {
        self.0.fixed_view::<3, 3>(0, 0).determinant()
    }

    /// Largest absolute element-wise difference to `other`
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        (self.0 - other.0).amax()
    }
}

/// Compute the voxel-to-world affine of a stack of slices
///
/// The origin is the first slice's position. With two or more slices the
/// through-slice axis is the vector between the first two positions, which
/// also carries the slice spacing. A single slice uses the plane normal scaled
/// by `fallback_spacing`, or 1.0 when none is given.
pub fn reconstruct_affine(
    slices: &[SliceGeometry],
    fallback_spacing: Option<f64>,
) -> Result<Affine, GeometryError> {
    let first = slices
        .first()
        .ok_or_else(|| GeometryError::MissingGeometry("no slice geometry".to_string()))?;
    validate_orientation(first)?;

    let (row_spacing, col_spacing) = first.pixel_spacing;
    if row_spacing <= 0.0 || col_spacing <= 0.0 {
        return Err(GeometryError::Degenerate(format!(
            "non-positive PixelSpacing {:?}",
            first.pixel_spacing
        )));
    }

    let slice_axis = match slices.get(1) {
        Some(second) => {
            let delta = second.position() - first.position();
            if delta.norm() <= DEGENERATE_TOLERANCE * row_spacing.max(col_spacing) {
                return Err(GeometryError::Degenerate(
                    "first two slices share the same position".to_string(),
                ));
            }
            // unit direction times slice distance is the delta itself
            delta
        }
        None => first.normal() * fallback_spacing.unwrap_or(1.0),
    };

    Affine::from_axes(
        [
            first.row_cosine() * col_spacing,
            first.column_cosine() * row_spacing,
            slice_axis,
        ],
        first.position(),
    )
}

/// Check that slices share orientation and pixel spacing and sit on a uniform grid
pub fn validate_stack(slices: &[SliceGeometry]) -> Result<(), GeometryError> {
    let Some(first) = slices.first() else {
        return Ok(());
    };
    for (index, slice) in slices.iter().enumerate().skip(1) {
        if !slice.same_orientation(first, GEOMETRY_TOLERANCE) {
            return Err(GeometryError::Inconsistent {
                property: "ImageOrientationPatient",
                detail: format!(
                    "slice {index} has {:?}, slice 0 has {:?}",
                    slice.image_orientation_patient, first.image_orientation_patient
                ),
            });
        }
        if !slice.same_spacing(first, GEOMETRY_TOLERANCE) {
            return Err(GeometryError::Inconsistent {
                property: "PixelSpacing",
                detail: format!(
                    "slice {index} has {:?}, slice 0 has {:?}",
                    slice.pixel_spacing, first.pixel_spacing
                ),
            });
        }
    }

    if let [a, b, ..] = slices {
        let step = b.position() - a.position();
        let expected = step.norm();
        for (index, pair) in slices.windows(2).enumerate().skip(1) {
            let delta = pair[1].position() - pair[0].position();
            if (delta - step).norm() > SPACING_RELATIVE_TOLERANCE * expected {
                return Err(GeometryError::NonUniformSpacing {
                    expected,
                    found: delta.norm(),
                    index: index + 1,
                });
            }
        }
    }
    Ok(())
}

/// Direction cosines must be unit vectors and orthogonal to each other
pub fn validate_orientation(geometry: &SliceGeometry) -> Result<(), GeometryError> {
    let row = geometry.row_cosine();
    let col = geometry.column_cosine();
    for (name, cosine) in [("row", row), ("column", col)] {
        let length = cosine.norm();
        if (length - 1.0).abs() > ORIENTATION_TOLERANCE {
            return Err(GeometryError::InvalidOrientation(format!(
                "{name} cosine {:?} has length {length}",
                cosine.as_slice()
            )));
        }
    }
    let dot_product = row.dot(&col);
    if dot_product.abs() > ORIENTATION_TOLERANCE {
        return Err(GeometryError::InvalidOrientation(format!(
            "row and column cosines are not orthogonal (dot = {dot_product})"
        )));
    }
    Ok(())
}
