use crate::error::{Result, VolumeIoError};
use crate::volume::VolumeArray;

/// Move the sample (channel) axis of a color volume from `source` to `target`
///
/// Grayscale volumes and a missing `target` leave the array untouched. Only
/// the axis order changes; samples are not copied.
pub fn move_channels_axis(
    array: VolumeArray,
    samples_per_pixel: u16,
    source: usize,
    target: Option<usize>,
) -> Result<VolumeArray> {
    let Some(target) = target else {
        return Ok(array);
    };
    if samples_per_pixel <= 1 {
        return Ok(array);
    }

    let ndim = array.ndim();
    for axis in [source, target] {
        if axis >= ndim {
            return Err(VolumeIoError::InvalidAxis { axis, ndim });
        }
    }
    if source == target {
        return Ok(array);
    }

    let mut order: Vec<usize> = (0..ndim).filter(|&axis| axis != source).collect();
    order.insert(target, source);
    Ok(array.permuted_axes(&order))
}
