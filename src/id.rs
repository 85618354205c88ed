//! Identifier types for components, buffers and driver types.

use std::fmt;

/// Unique identifier of a component instance within the firmware.
///
/// Identifiers are assigned by the topology (the IPC `comp.id` field) and
/// are only compared, never interpreted.
///
/// # Example
///
/// ```
/// use pcm_pipeline::CompId;
///
/// let host = CompId::new(1);
/// let mux = CompId::new(2);
///
/// assert_ne!(host, mux);
/// assert_eq!(host.to_string(), "comp1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompId(u32);

impl CompId {
    /// Creates a component id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "comp{}", self.0)
    }
}

impl From<u32> for CompId {
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

/// Stable handle of a buffer inside a [`BufferArena`](crate::BufferArena).
///
/// Handles stay valid while the buffer is alive; they are what components
/// keep in their source and sink lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    /// Returns the arena slot index of this buffer.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Component type, the key of the driver registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompType {
    /// Many streams into one sink.
    Mux,
    /// One stream into many sinks.
    Demux,
    /// Speaker model stage with a feedback input.
    Dsm,
    /// Splits a stream into a playback path and a feedback path.
    DsmDemux,
    /// Smart amplifier with feedback input.
    SmartAmp,
    /// Generic block-based processing module.
    ProcessingModule,
    /// Any other driver registered by the platform.
    Other(u32),
}

impl fmt::Display for CompType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mux => f.write_str("mux"),
            Self::Demux => f.write_str("demux"),
            Self::Dsm => f.write_str("dsm"),
            Self::DsmDemux => f.write_str("dsm-demux"),
            Self::SmartAmp => f.write_str("smart-amp"),
            Self::ProcessingModule => f.write_str("processing-module"),
            Self::Other(raw) => write!(f, "type-{raw}"),
        }
    }
}
