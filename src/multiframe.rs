use dicom::core::Tag;
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use tracing::{debug, warn};

use crate::affine::{Affine, SliceGeometry, reconstruct_affine, validate_stack};
use crate::dataset::{self, Dataset};
use crate::enums::Rescale;
use crate::error::{GeometryError, Result};
use crate::volume::{VolumeArray, apply_rescale};

const POSITION_TOLERANCE: f64 = 1e-4;

/// Reconstruct the volume stored in a single multi-frame dataset
///
/// Frame geometry comes from the per-frame functional groups, falling back to
/// the shared group and then the top-level tags. Frames whose positions repeat,
/// slice-fastest or time-fastest, are read as a 4D stack `(.., slice, time)`.
pub fn unpack_dataset(
    dataset: &Dataset,
    allow_default_affine: bool,
    rescale: Rescale,
) -> Result<(VolumeArray, Affine)> {
    let frames = dataset.decode_frames()?;
    let frame_count = frames.shape()[0];
    let frames = apply_rescale(frames, &frame_rescale(dataset, frame_count), rescale);

    let (frames, affine) = match frame_geometries(dataset, frame_count) {
        Ok(geometries) => {
            let layout = frame_layout(&geometries);
            let stack = layout.stack(&geometries);
            validate_stack(&stack)?;
            let affine = reconstruct_affine(&stack, fallback_spacing(dataset))?;
            (layout.arrange(frames)?, affine)
        }
        Err(missing) if allow_default_affine => {
            warn!(%missing, "using a default affine for multi-frame dataset");
            (frames, Affine::identity())
        }
        Err(missing) => return Err(GeometryError::MissingGeometry(missing).into()),
    };

    Ok((frames.from_storage_order(), affine))
}

/// Geometry of every frame, or a description of what is missing
fn frame_geometries(dataset: &Dataset, frame_count: usize) -> Result<Vec<SliceGeometry>, String> {
    let shared = dataset.shared_group();
    let per_frame = dataset.per_frame_groups();
    let top_level: &InMemDicomObject = dataset.object();

    (0..frame_count)
        .map(|index| {
            let group = per_frame.get(index);
            let position = functional_items(group, shared, tags::PLANE_POSITION_SEQUENCE)
                .find_map(dataset::position)
                .or_else(|| {
                    (frame_count == 1)
                        .then(|| dataset::position(top_level))
                        .flatten()
                })
                .ok_or_else(|| format!("ImagePositionPatient of frame {index}"))?;
            let orientation = functional_items(group, shared, tags::PLANE_ORIENTATION_SEQUENCE)
                .find_map(dataset::orientation)
                .or_else(|| dataset::orientation(top_level))
                .ok_or_else(|| format!("ImageOrientationPatient of frame {index}"))?;
            let pixel_spacing = functional_items(group, shared, tags::PIXEL_MEASURES_SEQUENCE)
                .find_map(dataset::pixel_spacing)
                .or_else(|| dataset::pixel_spacing(top_level))
                .ok_or_else(|| format!("PixelSpacing of frame {index}"))?;

            Ok(SliceGeometry {
                image_position_patient: position,
                image_orientation_patient: orientation,
                pixel_spacing,
            })
        })
        .collect()
}

/// Items of `sequence` in the per-frame group, then in the shared group
fn functional_items<'a>(
    group: Option<&'a InMemDicomObject>,
    shared: Option<&'a InMemDicomObject>,
    sequence: Tag,
) -> impl Iterator<Item = &'a InMemDicomObject> {
    [group, shared]
        .into_iter()
        .flatten()
        .filter_map(move |group| dataset::first_item(group, sequence))
}

/// How the frames of a dataset map onto slice and time positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameLayout {
    /// Every frame is its own slice
    Stack,
    /// Frame `t * slices + s`, as in `[z0, z1, z2, z0, z1, z2]`
    SliceFastest { slices: usize, times: usize },
    /// Frame `s * times + t`, as in `[z0, z0, z1, z1, z2, z2]`
    TimeFastest { slices: usize, times: usize },
}

impl FrameLayout {
    /// Geometry of each distinct slice, in stack order
    fn stack(self, geometries: &[SliceGeometry]) -> Vec<SliceGeometry> {
        match self {
            Self::Stack => geometries.to_vec(),
            Self::SliceFastest { slices, .. } => geometries[..slices].to_vec(),
            Self::TimeFastest { times, .. } => geometries.iter().step_by(times).copied().collect(),
        }
    }

    /// Reshape `(frame, row, column, sample)` into `(time, slice, row, column, sample)`
    fn arrange(self, frames: VolumeArray) -> Result<VolumeArray> {
        let pixel_shape = frames.shape()[1..].to_vec();
        let shape_with = |leading: [usize; 2]| {
            let mut shape = leading.to_vec();
            shape.extend_from_slice(&pixel_shape);
            shape
        };
        let frames = match self {
            Self::Stack => frames,
            Self::SliceFastest { slices, times } => {
                debug!(slices, times, "multi-frame dataset is a 4D stack");
                frames.into_shape(&shape_with([times, slices]))?
            }
            Self::TimeFastest { slices, times } => {
                debug!(slices, times, "multi-frame dataset is a 4D stack, time fastest");
                let mut order: Vec<usize> = (0..pixel_shape.len() + 2).collect();
                order.swap(0, 1);
                frames
                    .into_shape(&shape_with([slices, times]))?
                    .permuted_axes(&order)
                    .into_standard_layout()
            }
        };
        Ok(frames)
    }
}

/// Detect repeated frame positions, in either slice-fastest or time-fastest order
fn frame_layout(geometries: &[SliceGeometry]) -> FrameLayout {
    let frame_count = geometries.len();
    let same = |a: &SliceGeometry, b: &SliceGeometry| a.same_position(b, POSITION_TOLERANCE);

    let mut distinct: Vec<&SliceGeometry> = Vec::new();
    for geometry in geometries {
        if !distinct.iter().any(|seen| same(seen, geometry)) {
            distinct.push(geometry);
        }
    }
    let slices = distinct.len();
    if slices == 0 || slices == frame_count || frame_count % slices != 0 {
        return FrameLayout::Stack;
    }
    let times = frame_count / slices;

    let matches = |slice_of: &dyn Fn(usize) -> usize| {
        geometries
            .iter()
            .enumerate()
            .all(|(index, geometry)| same(geometry, distinct[slice_of(index)]))
    };
    if matches(&|index| index % slices) {
        FrameLayout::SliceFastest { slices, times }
    } else if matches(&|index| index / times) {
        FrameLayout::TimeFastest { slices, times }
    } else {
        FrameLayout::Stack
    }
}

/// Through-slice spacing for stacks with a single slice position
fn fallback_spacing(dataset: &Dataset) -> Option<f64> {
    dataset
        .shared_group()
        .and_then(|shared| dataset::first_item(shared, tags::PIXEL_MEASURES_SEQUENCE))
        .and_then(dataset::slice_spacing)
        .or_else(|| dataset.slice_spacing())
}

/// `(slope, intercept)` for every frame
fn frame_rescale(dataset: &Dataset, frame_count: usize) -> Vec<(f64, f64)> {
    let shared = dataset
        .shared_group()
        .and_then(|shared| dataset::first_item(shared, tags::PIXEL_VALUE_TRANSFORMATION_SEQUENCE))
        .and_then(dataset::rescale);
    let top_level = dataset.rescale();
    let per_frame = dataset.per_frame_groups();

    (0..frame_count)
        .map(|index| {
            per_frame
                .get(index)
                .and_then(|group| {
                    dataset::first_item(group, tags::PIXEL_VALUE_TRANSFORMATION_SEQUENCE)
                })
                .and_then(dataset::rescale)
                .or(shared)
                .or(top_level)
                .unwrap_or((1.0, 0.0))
        })
        .collect()
}
