use crate::affine::{Affine, SliceGeometry, reconstruct_affine, validate_stack};
use crate::dataset::Dataset;
use crate::enums::Rescale;
use crate::error::{GeometryError, Result, VolumeIoError};
use crate::volume::{VolumeArray, apply_rescale};

use glob::Pattern;
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a series from a directory, keeping the files whose name matches `globber`
    ///
    /// # Errors
    ///
    /// Returns [`VolumeIoError::EmptyInput`] when no file matches, before
    /// anything is parsed.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        globber: &str,
        rescale: Rescale,
    ) -> Result<(VolumeArray, Affine, Vec<Dataset>)> {
        let path = path.as_ref();
        let paths = Self::find_files(path, globber)?;
        if paths.is_empty() {
            return Err(VolumeIoError::EmptyInput {
                path: path.to_path_buf(),
                pattern: globber.to_string(),
            });
        }
        debug!(dir = %path.display(), files = paths.len(), "reading DICOM series");
        Self::load_from_file_paths(&paths, rescale)
    }

    /// Parse every file (in parallel), sort by instance number and combine
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        rescale: Rescale,
    ) -> Result<(VolumeArray, Affine, Vec<Dataset>)> {
        let mut datasets = paths
            .par_iter()
            .map(|path| Dataset::open(path.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::sort_series(&mut datasets);
        let (volume, affine) = Self::combine_slices(&datasets, rescale)?;
        Ok((volume, affine, datasets))
    }

    /// Stable sort by `InstanceNumber`; slices without one count as 0
    pub fn sort_series(datasets: &mut [Dataset]) {
        datasets.sort_by_key(Dataset::instance_number);
    }

    /// Stack sorted single-frame slices into a volume
    ///
    /// # Errors
    ///
    /// Returns a [`GeometryError`] when slices disagree on shape, pixel
    /// spacing, orientation or series, or do not form a uniform grid.
    pub fn combine_slices(
        datasets: &[Dataset],
        rescale: Rescale,
    ) -> Result<(VolumeArray, Affine)> {
        let first = datasets.first().ok_or(VolumeIoError::EmptySeries)?;

        Self::validate_series(datasets)?;
        let geometries = Self::slice_geometries(datasets)?;
        validate_stack(&geometries)?;

        let slices = datasets
            .iter()
            .map(Dataset::decode_frames)
            .collect::<Result<Vec<_>>>()?;
        Self::validate_dimensions(&slices)?;

        let volume = VolumeArray::concatenate(&slices)?;
        let params: Vec<_> = datasets
            .iter()
            .map(|dataset| dataset.rescale().unwrap_or((1.0, 0.0)))
            .collect();
        let volume = apply_rescale(volume, &params, rescale);

        let affine = reconstruct_affine(&geometries, first.slice_spacing())?;
        debug!(slices = datasets.len(), shape = ?volume.shape(), "combined slices");

        Ok((volume.from_storage_order(), affine))
    }

    fn find_files(dir: &Path, globber: &str) -> Result<Vec<PathBuf>> {
        let pattern = Pattern::new(globber)?;
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| pattern.matches(name))
            })
            .collect();
        // ties in InstanceNumber must not depend on read_dir order
        paths.sort();
        Ok(paths)
    }

    fn validate_series(datasets: &[Dataset]) -> Result<()> {
        let first = &datasets[0];
        let series_uid = first.series_instance_uid();
        let samples = first.samples_per_pixel();
        let dtype = first.pixel_dtype()?;

        for (index, dataset) in datasets.iter().enumerate().skip(1) {
            if let (Some(expected), Some(found)) = (&series_uid, dataset.series_instance_uid()) {
                if *expected != found {
                    return Err(GeometryError::Inconsistent {
                        property: "SeriesInstanceUID",
                        detail: format!("slice {index} belongs to {found}, expected {expected}"),
                    }
                    .into());
                }
            }
            if dataset.samples_per_pixel() != samples {
                return Err(GeometryError::Inconsistent {
                    property: "SamplesPerPixel",
                    detail: format!(
                        "slice {index} has {}, slice 0 has {samples}",
                        dataset.samples_per_pixel()
                    ),
                }
                .into());
            }
            let found = dataset.pixel_dtype()?;
            if found != dtype {
                return Err(GeometryError::Inconsistent {
                    property: "pixel dtype",
                    detail: format!("slice {index} stores {found}, slice 0 stores {dtype}"),
                }
                .into());
            }
        }
        if series_uid.is_none() {
            warn!("series has no SeriesInstanceUID, slices are combined unchecked");
        }
        Ok(())
    }

    fn slice_geometries(datasets: &[Dataset]) -> Result<Vec<SliceGeometry>, GeometryError> {
        datasets
            .iter()
            .enumerate()
            .map(|(index, dataset)| {
                dataset.slice_geometry().ok_or_else(|| {
                    GeometryError::MissingGeometry(format!(
                        "ImagePositionPatient, ImageOrientationPatient or PixelSpacing of slice {index}"
                    ))
                })
            })
            .collect()
    }

    fn validate_dimensions(slices: &[VolumeArray]) -> Result<(), GeometryError> {
        let first_dim = slices[0].shape();
        for (index, slice) in slices.iter().enumerate() {
            if slice.shape()[0] != 1 {
                return Err(GeometryError::Inconsistent {
                    property: "frame count",
                    detail: format!("slice {index} holds {} frames", slice.shape()[0]),
                });
            }
            if slice.shape() != first_dim {
                return Err(GeometryError::Inconsistent {
                    property: "pixel shape",
                    detail: format!(
                        "slice {index} is {:?}, slice 0 is {:?}",
                        &slice.shape()[1..],
                        &first_dim[1..]
                    ),
                });
            }
        }
        Ok(())
    }
}
