use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::mem::InMemElement;
use dicom::object::{DefaultDicomObject, InMemDicomObject, from_reader, open_file};
use dicom::pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use dicom_dictionary_std::tags;
use tracing::debug;

use crate::affine::SliceGeometry;
use crate::enums::{DatasetKind, PixelDtype};
use crate::error::{CodecError, Result, VolumeIoError};
use crate::volume::VolumeArray;

const PREAMBLE_LEN: usize = 128;

/// Tags holding the modality rescale of a single-frame dataset
pub const RESCALE_TAGS: [(Tag, &str); 2] = [
    (tags::RESCALE_SLOPE, "RescaleSlope"),
    (tags::RESCALE_INTERCEPT, "RescaleIntercept"),
];

/// A parsed DICOM file with typed access to the tags volume reconstruction needs
#[derive(Debug, Clone)]
pub struct Dataset {
    obj: DefaultDicomObject,
}

impl Dataset {
    /// Open and parse a DICOM file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(VolumeIoError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )));
        }
        let obj = open_file(path)?;
        debug!(path = %path.display(), "parsed DICOM file");
        Ok(Self { obj })
    }

    /// Parse a DICOM file held in memory, with or without the 128 byte preamble
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let has_preamble = bytes.len() >= PREAMBLE_LEN + 4
            && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] == b"DICM";
        let body = if has_preamble {
            &bytes[PREAMBLE_LEN..]
        } else {
            bytes
        };
        let obj = from_reader(Cursor::new(body))?;
        Ok(Self { obj })
    }

    /// Encode the dataset, preamble and file meta group included
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.obj.write_all(&mut bytes)?;
        Ok(bytes)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.serialize()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn object(&self) -> &DefaultDicomObject {
        &self.obj
    }

    pub fn into_object(self) -> DefaultDicomObject {
        self.obj
    }

    /// Classify by structure: functional groups or several frames mean multi-frame
    pub fn kind(&self) -> DatasetKind {
        let has_groups = self
            .obj
            .element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
            .is_ok()
            || self
                .obj
                .element(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE)
                .is_ok();
        if has_groups || self.number_of_frames() > 1 {
            DatasetKind::MultiFrame
        } else {
            DatasetKind::SingleFrame
        }
    }

    /// Channel count, 1 for grayscale
    pub fn samples_per_pixel(&self) -> u16 {
        int_tag(&self.obj, tags::SAMPLES_PER_PIXEL).unwrap_or(1)
    }

    /// `InstanceNumber`, 0 when absent
    pub fn instance_number(&self) -> i32 {
        int_tag(&self.obj, tags::INSTANCE_NUMBER).unwrap_or(0)
    }

    pub fn number_of_frames(&self) -> u32 {
        int_tag(&self.obj, tags::NUMBER_OF_FRAMES).unwrap_or(1)
    }

    pub fn rows(&self) -> Option<u32> {
        int_tag(&self.obj, tags::ROWS)
    }

    pub fn columns(&self) -> Option<u32> {
        int_tag(&self.obj, tags::COLUMNS)
    }

    pub fn series_instance_uid(&self) -> Option<String> {
        self.obj
            .element(tags::SERIES_INSTANCE_UID)
            .ok()?
            .to_str()
            .ok()
            .map(|uid| uid.trim_end_matches(['\0', ' ']).to_string())
    }

    /// Sample type of the stored pixel data
    pub fn pixel_dtype(&self) -> Result<PixelDtype> {
        let bits_allocated: u16 = int_tag(&self.obj, tags::BITS_ALLOCATED).ok_or(
            VolumeIoError::MissingTag {
                tag: tags::BITS_ALLOCATED,
                name: "BitsAllocated",
            },
        )?;
        let signed = int_tag::<u16>(&self.obj, tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1;
        PixelDtype::from_bits(bits_allocated, signed).ok_or_else(|| {
            CodecError::UnsupportedPixelLayout(format!(
                "BitsAllocated {bits_allocated} is not 8, 16 or 32"
            ))
            .into()
        })
    }

    /// Top-level geometry of a single-frame dataset
    pub fn slice_geometry(&self) -> Option<SliceGeometry> {
        Some(SliceGeometry {
            image_position_patient: position(&self.obj)?,
            image_orientation_patient: orientation(&self.obj)?,
            pixel_spacing: pixel_spacing(&self.obj)?,
        })
    }

    /// `SpacingBetweenSlices`, else `SliceThickness`
    pub fn slice_spacing(&self) -> Option<f64> {
        slice_spacing(&self.obj)
    }

    /// Top-level `(RescaleSlope, RescaleIntercept)`
    pub fn rescale(&self) -> Option<(f64, f64)> {
        rescale(&self.obj)
    }

    pub fn shared_group(&self) -> Option<&InMemDicomObject> {
        first_item(&self.obj, tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE)
    }

    pub fn per_frame_groups(&self) -> &[InMemDicomObject] {
        self.obj
            .element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
            .ok()
            .and_then(|elem| elem.items())
            .unwrap_or(&[])
    }

    /// Whether the pixel data is stored as encapsulated fragments
    pub fn is_encapsulated(&self) -> bool {
        self.obj
            .element(tags::PIXEL_DATA)
            .is_ok_and(|elem| matches!(elem.value(), Value::PixelSequence(..)))
    }

    /// Decode the pixel data in storage order `(frame, row, column, sample)`
    ///
    /// Samples keep their stored values; the modality LUT is not applied.
    pub fn decode_frames(&self) -> Result<VolumeArray> {
        let dtype = self.pixel_dtype()?;
        let decoded = self.obj.decode_pixel_data()?;
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);

        let volume: VolumeArray = match dtype {
            PixelDtype::U8 => decoded.to_ndarray_with_options::<u8>(&options)?.into_dyn().into(),
            PixelDtype::I8 => decoded.to_ndarray_with_options::<i8>(&options)?.into_dyn().into(),
            PixelDtype::U16 => decoded.to_ndarray_with_options::<u16>(&options)?.into_dyn().into(),
            PixelDtype::I16 => decoded.to_ndarray_with_options::<i16>(&options)?.into_dyn().into(),
            PixelDtype::U32 => decoded.to_ndarray_with_options::<u32>(&options)?.into_dyn().into(),
            PixelDtype::I32 => decoded.to_ndarray_with_options::<i32>(&options)?.into_dyn().into(),
            PixelDtype::F32 => decoded.to_ndarray_with_options::<f32>(&options)?.into_dyn().into(),
            PixelDtype::F64 => decoded.to_ndarray_with_options::<f64>(&options)?.into_dyn().into(),
        };
        debug!(?dtype, shape = ?volume.shape(), "decoded pixel data");
        Ok(volume)
    }

    /// Snapshot of every element keyed by its tag, e.g. `(0010,0010)`
    pub fn header(&self) -> BTreeMap<String, InMemElement> {
        self.obj
            .iter()
            .map(|elem| (elem.header().tag.to_string(), elem.clone()))
            .collect()
    }

    /// Remove all of `tags`, failing without changes when any is absent
    pub fn remove_tags(mut self, to_remove: &[(Tag, &'static str)]) -> Result<Self> {
        let missing = to_remove
            .iter()
            .find(|(tag, _)| self.obj.element(*tag).is_err());
        if let Some(&(tag, name)) = missing {
            return Err(VolumeIoError::MissingTag { tag, name });
        }
        for (tag, _) in to_remove {
            self.obj.remove_element(*tag);
        }
        Ok(self)
    }

    /// Drop the intensity transform the way the dataset kind stores it
    pub fn remove_intensity_transform(self) -> Result<Self> {
        match self.kind() {
            DatasetKind::SingleFrame => self.remove_tags(&RESCALE_TAGS),
            DatasetKind::MultiFrame => self.remove_frame_intensity_transform(),
        }
    }

    fn remove_frame_intensity_transform(mut self) -> Result<Self> {
        let mut removed = false;
        for group_tag in [
            tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE,
            tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE,
        ] {
            let Some(mut items) = self
                .obj
                .element(group_tag)
                .ok()
                .and_then(|elem| elem.items())
                .map(<[InMemDicomObject]>::to_vec)
            else {
                continue;
            };
            let mut changed = false;
            for item in &mut items {
                changed |= item.remove_element(tags::PIXEL_VALUE_TRANSFORMATION_SEQUENCE);
            }
            if changed {
                self.obj.put(DataElement::new(
                    group_tag,
                    VR::SQ,
                    DataSetSequence::from(items),
                ));
                removed = true;
            }
        }
        for tag in [
            tags::RESCALE_SLOPE,
            tags::RESCALE_INTERCEPT,
            tags::RESCALE_TYPE,
        ] {
            removed |= self.obj.remove_element(tag);
        }
        if !removed {
            return Err(VolumeIoError::MissingTag {
                tag: tags::PIXEL_VALUE_TRANSFORMATION_SEQUENCE,
                name: "PixelValueTransformationSequence",
            });
        }
        Ok(self)
    }

    /// Replace the pixel data bytes, keeping the template element's VR
    pub fn with_pixel_data(mut self, bytes: Vec<u8>) -> Self {
        let vr = self
            .obj
            .element(tags::PIXEL_DATA)
            .map(|elem| elem.vr())
            .ok()
            .filter(|vr| matches!(vr, VR::OB | VR::OW))
            .unwrap_or(VR::OW);
        self.obj.put(DataElement::new(
            tags::PIXEL_DATA,
            vr,
            PrimitiveValue::from(bytes),
        ));
        self
    }
}

fn int_tag<T: TryFrom<i64>>(obj: &InMemDicomObject, tag: Tag) -> Option<T> {
    let value = obj.element(tag).ok()?.to_int::<i64>().ok()?;
    T::try_from(value).ok()
}

fn multi_f64<const N: usize>(obj: &InMemDicomObject, tag: Tag) -> Option<[f64; N]> {
    let values = obj.element(tag).ok()?.to_multi_float64().ok()?;
    values.get(..N)?.try_into().ok()
}

fn single_f64(obj: &InMemDicomObject, tag: Tag) -> Option<f64> {
    obj.element(tag).ok()?.to_float64().ok()
}

pub(crate) fn first_item(obj: &InMemDicomObject, sequence: Tag) -> Option<&InMemDicomObject> {
    obj.element(sequence).ok()?.items()?.first()
}

pub(crate) fn position(obj: &InMemDicomObject) -> Option<[f64; 3]> {
    multi_f64(obj, tags::IMAGE_POSITION_PATIENT)
}

pub(crate) fn orientation(obj: &InMemDicomObject) -> Option<([f64; 3], [f64; 3])> {
    let [rx, ry, rz, cx, cy, cz] = multi_f64::<6>(obj, tags::IMAGE_ORIENTATION_PATIENT)?;
    Some(([rx, ry, rz], [cx, cy, cz]))
}

pub(crate) fn pixel_spacing(obj: &InMemDicomObject) -> Option<(f64, f64)> {
    let [row, column] = multi_f64::<2>(obj, tags::PIXEL_SPACING)?;
    Some((row, column))
}

pub(crate) fn slice_spacing(obj: &InMemDicomObject) -> Option<f64> {
    single_f64(obj, tags::SPACING_BETWEEN_SLICES)
        .or_else(|| single_f64(obj, tags::SLICE_THICKNESS))
        .filter(|spacing| *spacing > 0.0)
}

pub(crate) fn rescale(obj: &InMemDicomObject) -> Option<(f64, f64)> {
    let slope = single_f64(obj, tags::RESCALE_SLOPE);
    let intercept = single_f64(obj, tags::RESCALE_INTERCEPT);
    if slope.is_none() && intercept.is_none() {
        return None;
    }
    Some((slope.unwrap_or(1.0), intercept.unwrap_or(0.0)))
}
