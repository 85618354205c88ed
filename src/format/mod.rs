//! PCM sample formats.
//!
//! This module describes how samples are laid out in stream memory:
//! - Frame formats (16-bit, 24-in-32-bit, 32-bit, float)
//! - The copy width chosen for a format (narrow or wide)
//! - Little-endian sample access used by the copy primitives

mod sample;

pub use sample::{Sample, SampleFormat, SampleWidth};
