use std::fmt;

/// How a parsed dataset stores its frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// A flat image with one geometry, usually part of a series
    SingleFrame,
    /// Stacked frames described by functional groups
    MultiFrame,
}

/// Element type of pixel samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelDtype {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl PixelDtype {
    /// Derive the dtype from `BitsAllocated` and `PixelRepresentation`
    /// (0 = unsigned, 1 = two's complement)
    pub fn from_bits(bits_allocated: u16, signed: bool) -> Option<Self> {
        match (bits_allocated, signed) {
            (8, false) => Some(Self::U8),
            (8, true) => Some(Self::I8),
            (16, false) => Some(Self::U16),
            (16, true) => Some(Self::I16),
            (32, false) => Some(Self::U32),
            (32, true) => Some(Self::I32),
            _ => None,
        }
    }

    /// Size of one sample in bytes
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

impl fmt::Display for PixelDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "uint8",
            Self::I8 => "int8",
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::U32 => "uint32",
            Self::I32 => "int32",
            Self::F32 => "float32",
            Self::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Whether to apply the modality rescale (slope/intercept) on read
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Rescale {
    /// Return stored values in the source dtype
    #[default]
    Raw,
    /// Apply only when slope != 1 or intercept != 0
    Auto,
    Always,
}
