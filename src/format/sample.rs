//! Sample formats and little-endian sample access.

use std::fmt;

/// PCM frame format of a stream.
///
/// The copy primitives move whole containers, so `S24In32Le` and `S32Le`
/// share the wide (32-bit) path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleFormat {
    /// 16-bit signed little-endian.
    #[default]
    S16Le,
    /// 24-bit signed samples in 32-bit little-endian containers.
    S24In32Le,
    /// 32-bit signed little-endian.
    S32Le,
    /// 32-bit IEEE float.
    Float,
}

impl SampleFormat {
    /// Size of one sample container in bytes.
    #[must_use]
    pub const fn sample_bytes(self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::S24In32Le | Self::S32Le | Self::Float => 4,
        }
    }

    /// Returns the integer copy width used by the routing engine, or `None`
    /// when the format has no integer copy path.
    #[must_use]
    pub const fn copy_width(self) -> Option<SampleWidth> {
        match self {
            Self::S16Le => Some(SampleWidth::Narrow),
            Self::S24In32Le | Self::S32Le => Some(SampleWidth::Wide),
            Self::Float => None,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S16Le => "S16_LE",
            Self::S24In32Le => "S24_4LE",
            Self::S32Le => "S32_LE",
            Self::Float => "FLOAT_LE",
        };
        f.write_str(name)
    }
}

/// Integer container width selected once per copy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    /// 16-bit containers.
    Narrow,
    /// 32-bit containers.
    Wide,
}

/// A fixed-size integer sample stored little-endian in a byte buffer.
///
/// Callers guarantee `pos + Self::BYTES <= bytes.len()`; the ring buffer
/// only hands out positions that satisfy this.
pub trait Sample: Copy + Default + PartialEq + fmt::Debug + Send + 'static {
    /// Container size in bytes.
    const BYTES: usize;

    /// Reads a sample at `pos`.
    fn read_le(bytes: &[u8], pos: usize) -> Self;

    /// Writes a sample at `pos`.
    fn write_le(self, bytes: &mut [u8], pos: usize);
}

impl Sample for i16 {
    const BYTES: usize = 2;

    #[inline]
    fn read_le(bytes: &[u8], pos: usize) -> Self {
        i16::from_le_bytes([bytes[pos], bytes[pos + 1]])
    }

    #[inline]
    fn write_le(self, bytes: &mut [u8], pos: usize) {
        bytes[pos..pos + 2].copy_from_slice(&self.to_le_bytes());
    }
}

impl Sample for i32 {
    const BYTES: usize = 4;

    #[inline]
    fn read_le(bytes: &[u8], pos: usize) -> Self {
        i32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
    }

    #[inline]
    fn write_le(self, bytes: &mut [u8], pos: usize) {
        bytes[pos..pos + 4].copy_from_slice(&self.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_bytes() {
        assert_eq!(SampleFormat::S16Le.sample_bytes(), 2);
        assert_eq!(SampleFormat::S24In32Le.sample_bytes(), 4);
        assert_eq!(SampleFormat::S32Le.sample_bytes(), 4);
    }

    #[test]
    fn test_copy_width() {
        assert_eq!(SampleFormat::S16Le.copy_width(), Some(SampleWidth::Narrow));
        assert_eq!(SampleFormat::S24In32Le.copy_width(), Some(SampleWidth::Wide));
        assert_eq!(SampleFormat::Float.copy_width(), None);
    }

    #[test]
    fn test_i16_little_endian() {
        let mut bytes = [0u8; 4];
        (-2i16).write_le(&mut bytes, 2);
        assert_eq!(bytes, [0, 0, 0xfe, 0xff]);
        assert_eq!(i16::read_le(&bytes, 2), -2);
    }

    #[test]
    fn test_i32_little_endian() {
        let mut bytes = [0u8; 4];
        0x0102_0304i32.write_le(&mut bytes, 0);
        assert_eq!(bytes, [4, 3, 2, 1]);
        assert_eq!(i32::read_le(&bytes, 0), 0x0102_0304);
    }

    #[test]
    fn test_display() {
        assert_eq!(SampleFormat::S24In32Le.to_string(), "S24_4LE");
    }
}
