//! Directory series: stacking, ordering, file selection and grid checks.

use std::fs;

use dicom_dictionary_std::tags;
use dicom_volume_io::{
    GeometryError, PixelDtype, ReadOptions, Rescale, VolumeIo, VolumeIoError,
};
use tempfile::tempdir;

use super::test_utils::{PIXEL_SPACING, Slice, assert_close, pixel_value, write_series};

// =============================================================================
// Stacking
// =============================================================================

#[test]
fn test_series_is_stacked_along_last_axis() {
    let dir = tempdir().expect("temp dir");
    write_series(dir.path(), 4, 2.0);

    let (volume, metadata) =
        VolumeIo::read_image(dir.path(), &ReadOptions::default()).expect("read series");

    assert_eq!(volume.shape(), &[3, 2, 4]);
    assert_eq!(volume.dtype(), PixelDtype::U16);
    let array = volume.as_array::<u16>().expect("u16 samples");
    for s in 0..4 {
        for r in 0..2 {
            for c in 0..3 {
                assert_eq!(array[[c, r, s]], pixel_value(s, r, c));
            }
        }
    }

    let affine = &metadata.affine;
    assert_close(affine.axis(0), [PIXEL_SPACING.1, 0.0, 0.0]);
    assert_close(affine.axis(1), [0.0, PIXEL_SPACING.0, 0.0]);
    assert_close(affine.axis(2), [0.0, 0.0, 2.0]);
    assert_close(metadata.origin(), [-10.0, 20.0, 0.0]);
    assert_close(metadata.spacing(), [0.75, 0.5, 2.0]);
    assert_eq!(metadata.coord_sys, "itk");
    assert!(metadata.header.is_none());
}

#[test]
fn test_series_is_sorted_by_instance_number() {
    let dir = tempdir().expect("temp dir");
    // file names run opposite to the instance numbers
    for (name, k) in [("a.dcm", 2), ("b.dcm", 1), ("c.dcm", 0)] {
        Slice::new(k, Some(k as i32 + 1), k as f64 * 1.5).write(&dir.path().join(name));
    }

    let (volume, metadata) =
        VolumeIo::read_image(dir.path(), &ReadOptions::default()).expect("read series");

    let array = volume.as_array::<u16>().expect("u16 samples");
    for s in 0..3 {
        assert_eq!(array[[0, 0, s]], pixel_value(s, 0, 0));
    }
    assert_close(metadata.origin(), [-10.0, 20.0, 0.0]);
    assert_close(metadata.affine.axis(2), [0.0, 0.0, 1.5]);
}

#[test]
fn test_missing_instance_number_sorts_first() {
    let dir = tempdir().expect("temp dir");
    Slice::new(1, Some(1), 3.0).write(&dir.path().join("a.dcm"));
    Slice::new(2, Some(2), 6.0).write(&dir.path().join("b.dcm"));
    Slice::new(0, None, 0.0).write(&dir.path().join("z.dcm"));

    let (volume, metadata) =
        VolumeIo::read_image(dir.path(), &ReadOptions::default()).expect("read series");

    let array = volume.as_array::<u16>().expect("u16 samples");
    assert_eq!(array[[0, 0, 0]], pixel_value(0, 0, 0));
    assert_eq!(array[[0, 0, 2]], pixel_value(2, 0, 0));
    assert_close(metadata.affine.axis(2), [0.0, 0.0, 3.0]);
}

#[test]
fn test_tied_instance_numbers_do_not_depend_on_enumeration_order() {
    let dir = tempdir().expect("temp dir");
    let forward = dir.path().join("forward");
    let backward = dir.path().join("backward");
    fs::create_dir(&forward).expect("forward dir");
    fs::create_dir(&backward).expect("backward dir");

    // two files without InstanceNumber tie at 0, one more sorts after them
    let slices = [
        ("a.dcm", 0, None, 0.0),
        ("b.dcm", 1, None, 1.0),
        ("c.dcm", 2, Some(1), 2.0),
    ];
    for &(name, index, instance, z) in &slices {
        Slice::new(index, instance, z).write(&forward.join(name));
    }
    for &(name, index, instance, z) in slices.iter().rev() {
        Slice::new(index, instance, z).write(&backward.join(name));
    }

    let (first, first_meta) =
        VolumeIo::read_image(&forward, &ReadOptions::default()).expect("forward read");
    let (second, second_meta) =
        VolumeIo::read_image(&backward, &ReadOptions::default()).expect("backward read");

    assert_eq!(first, second);
    assert_eq!(first_meta.affine, second_meta.affine);

    let array = first.as_array::<u16>().expect("u16 samples");
    for slice in 0..3 {
        assert_eq!(array[[0, 0, slice]], pixel_value(slice, 0, 0));
    }
    assert_close(first_meta.affine.axis(2), [0.0, 0.0, 1.0]);
}

// =============================================================================
// File selection
// =============================================================================

#[test]
fn test_empty_directory_fails() {
    let dir = tempdir().expect("temp dir");

    let err = VolumeIo::read_image(dir.path(), &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, VolumeIoError::EmptyInput { .. }));
}

#[test]
fn test_glob_matching_nothing_fails() {
    let dir = tempdir().expect("temp dir");
    write_series(dir.path(), 2, 1.0);

    let options = ReadOptions::default().with_globber("*.ima");
    let err = VolumeIo::read_image(dir.path(), &options).unwrap_err();
    match err {
        VolumeIoError::EmptyInput { pattern, .. } => assert_eq!(pattern, "*.ima"),
        other => panic!("expected EmptyInput, got {other:?}"),
    }
}

#[test]
fn test_glob_selects_series_files() {
    let dir = tempdir().expect("temp dir");
    write_series(dir.path(), 3, 1.0);
    fs::write(dir.path().join("notes.txt"), "not a DICOM file").expect("write notes");

    let options = ReadOptions::default().with_globber("*.dcm");
    let (volume, _) = VolumeIo::read_image(dir.path(), &options).expect("read series");
    assert_eq!(volume.shape(), &[3, 2, 3]);

    let err = VolumeIo::read_image(dir.path(), &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, VolumeIoError::Codec(_)));
}

#[test]
fn test_invalid_glob_fails() {
    let dir = tempdir().expect("temp dir");
    write_series(dir.path(), 2, 1.0);

    let options = ReadOptions::default().with_globber("[");
    let err = VolumeIo::read_image(dir.path(), &options).unwrap_err();
    assert!(matches!(err, VolumeIoError::Pattern(_)));
}

// =============================================================================
// Single slices
// =============================================================================

#[test]
fn test_single_slice_uses_unit_spacing() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("slice.dcm");
    Slice::new(0, Some(1), 7.0).write(&path);

    let (volume, metadata) =
        VolumeIo::read_image(&path, &ReadOptions::default()).expect("read slice");

    assert_eq!(volume.shape(), &[3, 2, 1]);
    assert_close(metadata.affine.axis(2), [0.0, 0.0, 1.0]);
    assert_close(metadata.origin(), [-10.0, 20.0, 7.0]);
}

#[test]
fn test_single_slice_uses_slice_thickness() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("slice.dcm");
    Slice::new(0, Some(1), 0.0)
        .with_slice_thickness(3.0)
        .write(&path);

    let (_, metadata) = VolumeIo::read_image(&path, &ReadOptions::default()).expect("read slice");
    assert_close(metadata.affine.axis(2), [0.0, 0.0, 3.0]);
}

#[test]
fn test_header_is_attached_for_single_files_only() {
    let dir = tempdir().expect("temp dir");
    write_series(dir.path(), 2, 1.0);
    let options = ReadOptions::default().with_header(true);

    let (_, metadata) =
        VolumeIo::read_image(dir.path().join("IM0.dcm"), &options).expect("read slice");
    let header = metadata.header.expect("header requested");
    assert!(header.contains_key(&tags::ROWS.to_string()));
    assert!(header.contains_key(&tags::IMAGE_POSITION_PATIENT.to_string()));

    let (_, metadata) = VolumeIo::read_image(dir.path(), &options).expect("read series");
    assert!(metadata.header.is_none());
}

// =============================================================================
// Grid validation
// =============================================================================

#[test]
fn test_mismatched_pixel_spacing_fails() {
    let dir = tempdir().expect("temp dir");
    Slice::new(0, Some(1), 0.0).write(&dir.path().join("a.dcm"));
    Slice::new(1, Some(2), 1.0)
        .with_pixel_spacing(0.6, 0.75)
        .write(&dir.path().join("b.dcm"));

    let err = VolumeIo::read_image(dir.path(), &ReadOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        VolumeIoError::Geometry(GeometryError::Inconsistent {
            property: "PixelSpacing",
            ..
        })
    ));
}

#[test]
fn test_uneven_slice_gaps_fail() {
    let dir = tempdir().expect("temp dir");
    for (k, z) in [0.0, 2.0, 5.0].into_iter().enumerate() {
        Slice::new(k, Some(k as i32 + 1), z).write(&dir.path().join(format!("IM{k}.dcm")));
    }

    let err = VolumeIo::read_image(dir.path(), &ReadOptions::default()).unwrap_err();
    match err {
        VolumeIoError::Geometry(GeometryError::NonUniformSpacing { index, .. }) => {
            assert_eq!(index, 2)
        }
        other => panic!("expected NonUniformSpacing, got {other:?}"),
    }
}

// =============================================================================
// Samples
// =============================================================================

#[test]
fn test_rgb_samples_lead_by_default() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("rgb.dcm");
    Slice::rgb(0.0).write(&path);

    let (volume, _) = VolumeIo::read_image(&path, &ReadOptions::default()).expect("read rgb");

    assert_eq!(volume.shape(), &[3, 3, 2, 1]);
    let array = volume.as_array::<u8>().expect("u8 samples");
    // pixel (row 1, column 2) holds v = 5
    assert_eq!(array[[0, 2, 1, 0]], 5);
    assert_eq!(array[[2, 2, 1, 0]], 7);
}

#[test]
fn test_rgb_samples_can_move_last() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("rgb.dcm");
    Slice::rgb(0.0).write(&path);

    let options = ReadOptions::default().with_channels_axis(3);
    let (volume, _) = VolumeIo::read_image(&path, &options).expect("read rgb");

    assert_eq!(volume.shape(), &[3, 2, 1, 3]);
    let array = volume.as_array::<u8>().expect("u8 samples");
    assert_eq!(array[[2, 1, 0, 0]], 5);
    assert_eq!(array[[2, 1, 0, 1]], 6);
}

#[test]
fn test_channels_axis_out_of_range_fails() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("rgb.dcm");
    Slice::rgb(0.0).write(&path);

    let options = ReadOptions::default().with_channels_axis(4);
    let err = VolumeIo::read_image(&path, &options).unwrap_err();
    assert!(matches!(err, VolumeIoError::InvalidAxis { axis: 4, ndim: 4 }));
}

// =============================================================================
// Rescale
// =============================================================================

#[test]
fn test_raw_read_keeps_stored_values() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("slice.dcm");
    Slice::new(1, Some(1), 0.0).with_rescale(2.0, -10.0).write(&path);

    let (volume, _) = VolumeIo::read_image(&path, &ReadOptions::default()).expect("read slice");
    assert_eq!(volume.dtype(), PixelDtype::U16);
    assert_eq!(volume.as_array::<u16>().expect("u16")[[1, 0, 0]], pixel_value(1, 0, 1));
}

#[test]
fn test_auto_rescale_applies_slope_and_intercept() {
    let dir = tempdir().expect("temp dir");
    for k in 0..2 {
        Slice::new(k, Some(k as i32 + 1), k as f64)
            .with_rescale(2.0, -10.0)
            .write(&dir.path().join(format!("IM{k}.dcm")));
    }

    let options = ReadOptions::default().with_rescale(Rescale::Auto);
    let (volume, _) = VolumeIo::read_image(dir.path(), &options).expect("read series");

    assert_eq!(volume.dtype(), PixelDtype::F32);
    let array = volume.as_array::<f32>().expect("f32 samples");
    let stored = f32::from(pixel_value(1, 1, 2));
    assert!((array[[2, 1, 1]] - (stored * 2.0 - 10.0)).abs() < 1e-4);
}

#[test]
fn test_auto_rescale_skips_identity_transform() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("slice.dcm");
    Slice::new(0, Some(1), 0.0).with_rescale(1.0, 0.0).write(&path);

    let options = ReadOptions::default().with_rescale(Rescale::Auto);
    let (volume, _) = VolumeIo::read_image(&path, &options).expect("read slice");
    assert_eq!(volume.dtype(), PixelDtype::U16);

    let options = ReadOptions::default().with_rescale(Rescale::Always);
    let (volume, _) = VolumeIo::read_image(&path, &options).expect("read slice");
    assert_eq!(volume.dtype(), PixelDtype::F32);
}
