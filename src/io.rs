use std::path::Path;
use std::slice;

use tracing::{debug, warn};

use crate::DEFAULT_CHANNELS_AXIS;
use crate::channels::move_channels_axis;
use crate::dataset::Dataset;
use crate::enums::{DatasetKind, PixelDtype, Rescale};
use crate::error::Result;
use crate::multiframe::unpack_dataset;
use crate::volume::{MetaData, VolumeArray};
use crate::volume_loader::VolumeLoader;

/// Options for [`VolumeIo::read_image`]
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Attach every parsed element to the returned metadata (single files only)
    pub header: bool,
    /// Where to move the sample axis of color images; `None` keeps it first
    pub channels_axis: Option<usize>,
    /// File name pattern selecting the series files of a directory
    pub globber: String,
    /// Fall back to an identity affine when a multi-frame file lacks geometry
    pub allow_default_affine: bool,
    pub rescale: Rescale,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            header: false,
            channels_axis: None,
            globber: "*".to_string(),
            allow_default_affine: false,
            rescale: Rescale::default(),
        }
    }
}

impl ReadOptions {
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn with_channels_axis(mut self, axis: usize) -> Self {
        self.channels_axis = Some(axis);
        self
    }

    pub fn with_globber(mut self, globber: impl Into<String>) -> Self {
        self.globber = globber.into();
        self
    }

    pub fn with_default_affine(mut self, allow: bool) -> Self {
        self.allow_default_affine = allow;
        self
    }

    pub fn with_rescale(mut self, rescale: Rescale) -> Self {
        self.rescale = rescale;
        self
    }
}

/// Options for [`VolumeIo::write_image`]
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Sample type to write; defaults to the template's pixel dtype
    pub dtype: Option<PixelDtype>,
    /// Keep the template's rescale slope/intercept
    pub keep_rescale: bool,
}

impl WriteOptions {
    pub fn with_dtype(mut self, dtype: PixelDtype) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_keep_rescale(mut self, keep: bool) -> Self {
        self.keep_rescale = keep;
        self
    }
}

/// Entry point for reading and writing DICOM volumes
pub struct VolumeIo;

impl VolumeIo {
    /// Read a DICOM file or a directory holding one series
    ///
    /// # Errors
    ///
    /// Fails on unreadable files, inconsistent geometry, or an empty directory.
    pub fn read_image(
        path: impl AsRef<Path>,
        options: &ReadOptions,
    ) -> Result<(VolumeArray, MetaData)> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::read_dcm_dir(path, options)
        } else {
            Self::read_dcm_file(path, options)
        }
    }

    /// Read a single file, either multi-frame or one slice
    pub fn read_dcm_file(
        path: impl AsRef<Path>,
        options: &ReadOptions,
    ) -> Result<(VolumeArray, MetaData)> {
        let dataset = Dataset::open(path)?;
        let kind = dataset.kind();
        debug!(?kind, "reading single DICOM file");

        let (image, affine) = match kind {
            DatasetKind::MultiFrame => {
                unpack_dataset(&dataset, options.allow_default_affine, options.rescale)?
            }
            DatasetKind::SingleFrame => {
                VolumeLoader::combine_slices(slice::from_ref(&dataset), options.rescale)?
            }
        };

        let mut metadata = MetaData::new(affine);
        if options.header {
            metadata = metadata.with_header(dataset.header());
        }
        let image = move_channels_axis(
            image,
            dataset.samples_per_pixel(),
            DEFAULT_CHANNELS_AXIS,
            options.channels_axis,
        )?;
        Ok((image, metadata))
    }

    /// Read the series in a directory; the header is never populated
    pub fn read_dcm_dir(
        path: impl AsRef<Path>,
        options: &ReadOptions,
    ) -> Result<(VolumeArray, MetaData)> {
        let (image, affine, datasets) =
            VolumeLoader::load_from_directory(path, &options.globber, options.rescale)?;
        let samples_per_pixel = datasets
            .first()
            .map(Dataset::samples_per_pixel)
            .unwrap_or(1);
        let image = move_channels_axis(
            image,
            samples_per_pixel,
            DEFAULT_CHANNELS_AXIS,
            options.channels_axis,
        )?;
        Ok((image, MetaData::new(affine)))
    }

    /// Write `image` into a copy of `template_path`
    ///
    /// The image must use the layout [`VolumeIo::read_image`] returns for the
    /// template; its size is not checked against `Rows`, `Columns` or
    /// `NumberOfFrames`. Unless `keep_rescale` is set, the template's
    /// intensity transform is removed, which fails when it has none.
    pub fn write_image(
        output_path: impl AsRef<Path>,
        template_path: impl AsRef<Path>,
        image: &VolumeArray,
        options: &WriteOptions,
    ) -> Result<()> {
        let template = Dataset::open(template_path)?;
        let template = if options.keep_rescale {
            template
        } else {
            template.remove_intensity_transform()?
        };

        let dtype = match options.dtype {
            Some(dtype) => dtype,
            None => template.pixel_dtype()?,
        };
        if template.is_encapsulated() {
            warn!("template pixel data is encapsulated, writing native samples into it");
        }

        let bytes = image.cast(dtype).to_storage_bytes();
        debug!(%dtype, bytes = bytes.len(), "substituting pixel data");
        template
            .with_pixel_data(bytes)
            .write_to_file(output_path)
    }
}

/// Shorthand for [`VolumeIo::read_image`]
pub fn read_image(
    path: impl AsRef<Path>,
    options: &ReadOptions,
) -> Result<(VolumeArray, MetaData)> {
    VolumeIo::read_image(path, options)
}

/// Shorthand for [`VolumeIo::write_image`]
pub fn write_image(
    output_path: impl AsRef<Path>,
    template_path: impl AsRef<Path>,
    image: &VolumeArray,
    options: &WriteOptions,
) -> Result<()> {
    VolumeIo::write_image(output_path, template_path, image, options)
}
