//! # DICOM-volume-io library
//!
//! This crate reads DICOM images into N-dimensional arrays together with the
//! affine that maps voxel indices to patient coordinates, and writes arrays
//! back into DICOM files.
//!
//! It builds on the dicom-rs ecosystem for parsing and encoding and owns the
//! spatial reconstruction. Three encodings are understood:
//!  - a single 2D file (one slice)
//!  - a single multi-frame file, with geometry in its functional groups
//!  - a directory of single-frame files forming one series
//!
//! Series files are parsed in parallel using rayon, sorted by
//! InstanceNumber and checked to form a uniform grid (same shape, pixel
//! spacing and orientation, evenly spaced positions).
//!
//! Arrays are returned as `([sample,] column, row, slice)`: the leading
//! spatial axes follow the voxel index order of the affine, and color
//! samples sit on axis [`DEFAULT_CHANNELS_AXIS`] unless moved with
//! [`ReadOptions::channels_axis`]. Affines use the [`COORD_SYS`] convention.
//!
//! # Examples
//!
//! ## Reading a series and writing one slice back
//!
//! ```no_run
//! # use dicom_volume_io::{ReadOptions, VolumeIo, WriteOptions};
//! let (volume, metadata) = VolumeIo::read_image("dicom", &ReadOptions::default())
//!     .expect("should have read the series");
//! println!("shape {:?}, spacing {:?}", volume.shape(), metadata.spacing());
//!
//! let (slice, _) = VolumeIo::read_image("dicom/IM0001.dcm", &ReadOptions::default())
//!     .expect("should have read the slice");
//! VolumeIo::write_image(
//!     "out.dcm",
//!     "dicom/IM0001.dcm",
//!     &slice,
//!     &WriteOptions::default().with_keep_rescale(true),
//! )
//! .expect("should have written the slice");
//! ```

pub mod affine;
pub mod channels;
pub mod dataset;
pub mod enums;
pub mod error;
pub mod io;
pub mod multiframe;
pub mod volume;
pub mod volume_loader;

pub use affine::{Affine, SliceGeometry};
pub use dataset::Dataset;
pub use enums::{DatasetKind, PixelDtype, Rescale};
pub use error::{CodecError, GeometryError, VolumeIoError};
pub use io::{ReadOptions, VolumeIo, WriteOptions, read_image, write_image};
pub use volume::{MetaData, Sample, VolumeArray};

/// Coordinate system of every returned affine
pub const COORD_SYS: &str = "itk";

/// Axis holding color samples in arrays returned by [`VolumeIo::read_image`]
pub const DEFAULT_CHANNELS_AXIS: usize = 0;
