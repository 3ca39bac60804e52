use std::collections::BTreeMap;

use dicom::object::mem::InMemElement;
use ndarray::{ArrayD, Axis, IxDyn};

use crate::COORD_SYS;
use crate::affine::Affine;
use crate::enums::{PixelDtype, Rescale};
use crate::error::{CodecError, GeometryError};

/// Numeric sample types a [`VolumeArray`] can hold
pub trait Sample: bytemuck::Pod + Send + Sync + 'static {
    const DTYPE: PixelDtype;

    fn to_f64(self) -> f64;

    /// Saturating conversion, truncating towards zero for integer types
    fn from_f64(value: f64) -> Self;

    fn wrap(array: ArrayD<Self>) -> VolumeArray;

    fn as_array(volume: &VolumeArray) -> Option<&ArrayD<Self>>;

    fn into_array(volume: VolumeArray) -> Option<ArrayD<Self>>;
}

macro_rules! impl_sample {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Sample for $ty {
                const DTYPE: PixelDtype = PixelDtype::$variant;

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_f64(value: f64) -> Self {
                    value as $ty
                }

                fn wrap(array: ArrayD<Self>) -> VolumeArray {
                    VolumeArray::$variant(array)
                }

                fn as_array(volume: &VolumeArray) -> Option<&ArrayD<Self>> {
                    match volume {
                        VolumeArray::$variant(array) => Some(array),
                        _ => None,
                    }
                }

                fn into_array(volume: VolumeArray) -> Option<ArrayD<Self>> {
                    match volume {
                        VolumeArray::$variant(array) => Some(array),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_sample!(
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    f32 => F32,
    f64 => F64,
);

/// Run `$body` with `$array` bound to the typed array inside a [`VolumeArray`]
macro_rules! with_array {
    ($volume:expr, $array:ident => $body:expr) => {
        match $volume {
            $crate::volume::VolumeArray::U8($array) => $body,
            $crate::volume::VolumeArray::I8($array) => $body,
            $crate::volume::VolumeArray::U16($array) => $body,
            $crate::volume::VolumeArray::I16($array) => $body,
            $crate::volume::VolumeArray::U32($array) => $body,
            $crate::volume::VolumeArray::I32($array) => $body,
            $crate::volume::VolumeArray::F32($array) => $body,
            $crate::volume::VolumeArray::F64($array) => $body,
        }
    };
}

/// Like [`with_array`], rewrapping the resulting array in the same variant
macro_rules! map_array {
    ($volume:expr, $array:ident => $body:expr) => {
        match $volume {
            $crate::volume::VolumeArray::U8($array) => $crate::volume::VolumeArray::U8($body),
            $crate::volume::VolumeArray::I8($array) => $crate::volume::VolumeArray::I8($body),
            $crate::volume::VolumeArray::U16($array) => $crate::volume::VolumeArray::U16($body),
            $crate::volume::VolumeArray::I16($array) => $crate::volume::VolumeArray::I16($body),
            $crate::volume::VolumeArray::U32($array) => $crate::volume::VolumeArray::U32($body),
            $crate::volume::VolumeArray::I32($array) => $crate::volume::VolumeArray::I32($body),
            $crate::volume::VolumeArray::F32($array) => $crate::volume::VolumeArray::F32($body),
            $crate::volume::VolumeArray::F64($array) => $crate::volume::VolumeArray::F64($body),
        }
    };
}

/// N-dimensional sample array whose element type follows the source pixel data
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeArray {
    U8(ArrayD<u8>),
    I8(ArrayD<i8>),
    U16(ArrayD<u16>),
    I16(ArrayD<i16>),
    U32(ArrayD<u32>),
    I32(ArrayD<i32>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl<T: Sample> From<ArrayD<T>> for VolumeArray {
    fn from(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }
}

impl VolumeArray {
    pub fn dtype(&self) -> PixelDtype {
        match self {
            Self::U8(_) => PixelDtype::U8,
            Self::I8(_) => PixelDtype::I8,
            Self::U16(_) => PixelDtype::U16,
            Self::I16(_) => PixelDtype::I16,
            Self::U32(_) => PixelDtype::U32,
            Self::I32(_) => PixelDtype::I32,
            Self::F32(_) => PixelDtype::F32,
            Self::F64(_) => PixelDtype::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, array => array.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Borrow the typed array when the dtype matches `T`
    pub fn as_array<T: Sample>(&self) -> Option<&ArrayD<T>> {
        T::as_array(self)
    }

    pub fn into_array<T: Sample>(self) -> Option<ArrayD<T>> {
        T::into_array(self)
    }

    /// Convert every sample to `dtype`; the memory order of the array is kept
    pub fn cast(&self, dtype: PixelDtype) -> Self {
        if self.dtype() == dtype {
            return self.clone();
        }
        match dtype {
            PixelDtype::U8 => Self::U8(self.cast_to()),
            PixelDtype::I8 => Self::I8(self.cast_to()),
            PixelDtype::U16 => Self::U16(self.cast_to()),
            PixelDtype::I16 => Self::I16(self.cast_to()),
            PixelDtype::U32 => Self::U32(self.cast_to()),
            PixelDtype::I32 => Self::I32(self.cast_to()),
            PixelDtype::F32 => Self::F32(self.cast_to()),
            PixelDtype::F64 => Self::F64(self.cast_to()),
        }
    }

    fn cast_to<T: Sample>(&self) -> ArrayD<T> {
        with_array!(self, array => array.mapv(|v| T::from_f64(v.to_f64())))
    }

    /// Reverse the order of all axes without touching the buffer
    pub fn reversed_axes(self) -> Self {
        map_array!(self, array => array.reversed_axes())
    }

    pub fn permuted_axes(self, order: &[usize]) -> Self {
        map_array!(self, array => array.permuted_axes(IxDyn(order)))
    }

    /// Reshape a standard-layout array
    pub(crate) fn into_shape(self, shape: &[usize]) -> Result<Self, CodecError> {
        let expected = shape.iter().product::<usize>();
        let actual = self.shape().iter().product::<usize>();
        let invalid = |_| CodecError::PixelBufferSize {
            expected,
            actual,
        };
        Ok(match self {
            Self::U8(a) => Self::U8(a.into_shape_with_order(IxDyn(shape)).map_err(invalid)?),
            Self::I8(a) => Self::I8(a.into_shape_with_order(IxDyn(shape)).map_err(invalid)?),
            Self::U16(a) => Self::U16(a.into_shape_with_order(IxDyn(shape)).map_err(invalid)?),
            Self::I16(a) => Self::I16(a.into_shape_with_order(IxDyn(shape)).map_err(invalid)?),
            Self::U32(a) => Self::U32(a.into_shape_with_order(IxDyn(shape)).map_err(invalid)?),
            Self::I32(a) => Self::I32(a.into_shape_with_order(IxDyn(shape)).map_err(invalid)?),
            Self::F32(a) => Self::F32(a.into_shape_with_order(IxDyn(shape)).map_err(invalid)?),
            Self::F64(a) => Self::F64(a.into_shape_with_order(IxDyn(shape)).map_err(invalid)?),
        })
    }

    /// Copy into C order, keeping the logical shape
    pub(crate) fn into_standard_layout(self) -> Self {
        map_array!(self, array => {
            if array.is_standard_layout() {
                array
            } else {
                array.as_standard_layout().into_owned()
            }
        })
    }

    /// Samples in DICOM storage order: the inverse of the axis reversal
    /// applied on read, emitted as native little-endian bytes
    pub fn to_storage_bytes(&self) -> Vec<u8> {
        with_array!(self, array => storage_bytes(array))
    }

    /// Apply `value * slope + intercept` per entry of leading axis 0
    pub(crate) fn rescale_frames(self, params: &[(f64, f64)]) -> Self {
        let mut out: ArrayD<f32> = with_array!(&self, array => array.mapv(|v| v.to_f64() as f32));
        for (mut frame, &(slope, intercept)) in out.axis_iter_mut(Axis(0)).zip(params) {
            frame.mapv_inplace(|v| (f64::from(v) * slope + intercept) as f32);
        }
        Self::F32(out)
    }

    /// Turn a `(.., row, column, sample)` storage-order array into the
    /// returned layout `([sample,] column, row, ..)`
    pub(crate) fn from_storage_order(self) -> Self {
        let reversed = self.reversed_axes();
        if reversed.shape().first() == Some(&1) && reversed.ndim() > 3 {
            map_array!(reversed, array => array.remove_axis(Axis(0)))
        } else {
            reversed
        }
    }

    /// Stack arrays along axis 0; all parts must share dtype and trailing shape
    pub(crate) fn concatenate(parts: &[VolumeArray]) -> Result<Self, GeometryError> {
        let first = parts.first().ok_or_else(|| GeometryError::Inconsistent {
            property: "slice count",
            detail: "no slices to stack".to_string(),
        })?;
        Ok(match first.dtype() {
            PixelDtype::U8 => Self::U8(concat_as(parts)?),
            PixelDtype::I8 => Self::I8(concat_as(parts)?),
            PixelDtype::U16 => Self::U16(concat_as(parts)?),
            PixelDtype::I16 => Self::I16(concat_as(parts)?),
            PixelDtype::U32 => Self::U32(concat_as(parts)?),
            PixelDtype::I32 => Self::I32(concat_as(parts)?),
            PixelDtype::F32 => Self::F32(concat_as(parts)?),
            PixelDtype::F64 => Self::F64(concat_as(parts)?),
        })
    }
}

/// Apply per-frame `(slope, intercept)` according to `mode`
pub(crate) fn apply_rescale(volume: VolumeArray, params: &[(f64, f64)], mode: Rescale) -> VolumeArray {
    let non_trivial = params
        .iter()
        .any(|&(slope, intercept)| slope != 1.0 || intercept != 0.0);
    match mode {
        Rescale::Always => volume.rescale_frames(params),
        Rescale::Auto if non_trivial => volume.rescale_frames(params),
        Rescale::Auto | Rescale::Raw => volume,
    }
}

fn storage_bytes<T: Sample>(array: &ArrayD<T>) -> Vec<u8> {
    let samples: Vec<T> = array.t().iter().copied().collect();
    bytemuck::cast_slice(&samples).to_vec()
}

fn concat_as<T: Sample>(parts: &[VolumeArray]) -> Result<ArrayD<T>, GeometryError> {
    let views = parts
        .iter()
        .enumerate()
        .map(|(index, part)| {
            part.as_array::<T>()
                .map(|array| array.view())
                .ok_or_else(|| GeometryError::Inconsistent {
                    property: "pixel dtype",
                    detail: format!("slice {index} is {}, expected {}", part.dtype(), T::DTYPE),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    ndarray::concatenate(Axis(0), &views).map_err(|err| GeometryError::Inconsistent {
        property: "pixel shape",
        detail: err.to_string(),
    })
}

/// Spatial metadata returned alongside a [`VolumeArray`]
#[derive(Debug, Clone, PartialEq)]
pub struct MetaData {
    pub affine: Affine,
    pub coord_sys: &'static str,
    /// Snapshot of every parsed element keyed by its tag, single-file reads only
    pub header: Option<BTreeMap<String, InMemElement>>,
}

impl MetaData {
    pub fn new(affine: Affine) -> Self {
        Self {
            affine,
            coord_sys: COORD_SYS,
            header: None,
        }
    }

    pub fn with_header(mut self, header: BTreeMap<String, InMemElement>) -> Self {
        self.header = Some(header);
        self
    }

    /// Voxel spacing along each affine index axis
    pub fn spacing(&self) -> [f64; 3] {
        self.affine.spacing()
    }

    pub fn origin(&self) -> [f64; 3] {
        self.affine.origin()
    }
}
