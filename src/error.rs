use std::path::PathBuf;

use dicom::core::Tag;
use thiserror::Error;

/// Errors raised by the underlying DICOM codec
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("DICOM read error: {0}")]
    Read(#[from] dicom::object::ReadError),

    #[error("DICOM write error: {0}")]
    Write(#[from] dicom::object::WriteError),

    #[error("Pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),

    /// Decoded pixel buffer does not match the declared dimensions
    #[error("Pixel buffer of {actual} bytes does not match the expected {expected} bytes")]
    PixelBufferSize { expected: usize, actual: usize },

    #[error("Unsupported pixel layout: {0}")]
    UnsupportedPixelLayout(String),
}

/// Errors describing inconsistent or missing spatial information
#[derive(Debug, Error)]
pub enum GeometryError {
    /// Geometry tags are absent and no default affine was allowed
    #[error("Missing geometry ({0}), default affine not permitted")]
    MissingGeometry(String),

    /// Slices disagree on a property that must be shared
    #[error("Inconsistent {property} across slices: {detail}")]
    Inconsistent {
        property: &'static str,
        detail: String,
    },

    /// Slice positions are not evenly spaced along the stacking direction
    #[error("Non-uniform slice spacing: expected {expected:.6}, found {found:.6} at slice {index}")]
    NonUniformSpacing {
        expected: f64,
        found: f64,
        index: usize,
    },

    /// Direction cosines are not unit length or not orthogonal
    #[error("Invalid ImageOrientationPatient: {0}")]
    InvalidOrientation(String),

    /// The resulting affine is not invertible
    #[error("Degenerate affine: {0}")]
    Degenerate(String),
}

#[derive(Debug, Error)]
pub enum VolumeIoError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The directory glob matched no files
    #[error("No files matching \"{pattern}\" in directory {}", path.display())]
    EmptyInput { path: PathBuf, pattern: String },

    /// A series with no slices reached the combiner
    #[error("Cannot combine an empty series")]
    EmptySeries,

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// An expected tag is absent
    #[error("Missing tag {name} {tag}")]
    MissingTag { tag: Tag, name: &'static str },

    /// A requested axis does not exist in the array
    #[error("Axis {axis} is out of bounds for an array with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<dicom::object::ReadError> for VolumeIoError {
    fn from(err: dicom::object::ReadError) -> Self {
        Self::Codec(err.into())
    }
}

impl From<dicom::object::WriteError> for VolumeIoError {
    fn from(err: dicom::object::WriteError) -> Self {
        Self::Codec(err.into())
    }
}

impl From<dicom::pixeldata::Error> for VolumeIoError {
    fn from(err: dicom::pixeldata::Error) -> Self {
        Self::Codec(err.into())
    }
}

pub type Result<T, E = VolumeIoError> = std::result::Result<T, E>;
