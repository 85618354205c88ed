//! Component buffers and the arena that owns them.
//!
//! Every buffer connects exactly one upstream component (the producer,
//! writing into it) to one downstream component (the consumer, reading from
//! it). Devices refer to buffers by [`BufferId`] only; the arena owns the
//! storage, so a device promoted to another context keeps valid links.

use std::ops::{BitOr, Deref, DerefMut};

use crate::config::MUX_MAX_STREAMS;
use crate::format::SampleFormat;
use crate::id::{BufferId, CompId, CompType};
use crate::pipeline::ring_buffer::AudioStream;
use crate::ComponentError;

/// Sample layout inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferFormat {
    /// Channels interleaved frame by frame.
    #[default]
    Interleaved,
    /// One contiguous block per channel.
    NonInterleaved,
}

/// Stream parameters negotiated between components and buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Sample container format.
    pub frame_fmt: SampleFormat,
    /// Interleaving.
    pub buffer_fmt: BufferFormat,
    /// Channel count.
    pub channels: u16,
    /// Sample rate in Hz.
    pub rate: u32,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            frame_fmt: SampleFormat::S16Le,
            buffer_fmt: BufferFormat::Interleaved,
            channels: 2,
            rate: 48000,
        }
    }
}

impl StreamParams {
    /// Size of one frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * self.frame_fmt.sample_bytes()
    }
}

/// Selects which [`StreamParams`] fields an endpoint buffer dictates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamFlags(u8);

impl ParamFlags {
    /// No fields.
    pub const NONE: Self = Self(0);
    /// Sample container format.
    pub const FRAME_FMT: Self = Self(1 << 0);
    /// Interleaving.
    pub const BUFFER_FMT: Self = Self(1 << 1);
    /// Channel count.
    pub const CHANNELS: Self = Self(1 << 2);
    /// Sample rate.
    pub const RATE: Self = Self(1 << 3);
    /// Every field.
    pub const ALL: Self = Self(0b1111);

    /// Returns true if every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParamFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The component on one side of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Component id.
    pub comp: CompId,
    /// Component type.
    pub comp_type: CompType,
}

/// A ring buffer linking two components.
#[derive(Debug)]
pub struct CompBuffer {
    id: BufferId,
    stream: AudioStream,
    buffer_fmt: BufferFormat,
    params_configured: bool,
    producer: Option<Endpoint>,
    consumer: Option<Endpoint>,
    publishes: u64,
}

impl CompBuffer {
    /// Handle of this buffer in its arena.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// The sample stream.
    pub fn stream(&self) -> &AudioStream {
        &self.stream
    }

    /// Mutable access to the sample stream.
    pub fn stream_mut(&mut self) -> &mut AudioStream {
        &mut self.stream
    }

    /// Upstream component writing into this buffer.
    pub fn producer(&self) -> Option<Endpoint> {
        self.producer
    }

    /// Downstream component reading from this buffer.
    pub fn consumer(&self) -> Option<Endpoint> {
        self.consumer
    }

    /// Current stream parameters.
    pub fn params(&self) -> StreamParams {
        StreamParams {
            frame_fmt: self.stream.format(),
            buffer_fmt: self.buffer_fmt,
            channels: self.stream.channels(),
            rate: self.stream.rate(),
        }
    }

    /// Returns true once parameters were applied to this buffer.
    pub fn params_configured(&self) -> bool {
        self.params_configured
    }

    /// Applies stream parameters.
    ///
    /// Without `force`, a buffer that already carries negotiated parameters
    /// keeps them.
    pub fn set_params(&mut self, params: &StreamParams, force: bool) -> Result<(), ComponentError> {
        if self.params_configured && !force {
            return Ok(());
        }

        self.stream
            .set_params(params.frame_fmt, params.channels, params.rate)?;
        self.buffer_fmt = params.buffer_fmt;
        self.params_configured = true;
        Ok(())
    }

    /// Forgets negotiated parameters so the next negotiation applies again.
    pub fn reset_params(&mut self) {
        self.params_configured = false;
    }

    /// Opens an update bracket. The release is counted when the guard drops.
    pub fn lock(&mut self) -> BufferGuard<'_> {
        BufferGuard { buffer: self }
    }

    /// Number of completed update brackets.
    pub fn publishes(&self) -> u64 {
        self.publishes
    }
}

/// Acquire/release bracket around a buffer update.
///
/// Exclusion comes from the `&mut` borrow the guard holds: nothing else can
/// reach the buffer while it lives. Dropping the guard is the release and
/// bumps [`CompBuffer::publishes()`]; buffers are never shared across
/// contexts, so no record is republished.
#[derive(Debug)]
pub struct BufferGuard<'a> {
    buffer: &'a mut CompBuffer,
}

impl Deref for BufferGuard<'_> {
    type Target = CompBuffer;

    fn deref(&self) -> &CompBuffer {
        self.buffer
    }
}

impl DerefMut for BufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut CompBuffer {
        self.buffer
    }
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        self.buffer.publishes += 1;
    }
}

/// Streams borrowed for one copy call: sources shared, sinks exclusive.
///
/// Slot `i` corresponds to the `i`-th id passed to [`BufferArena::split_io()`].
#[derive(Debug)]
pub struct IoRefs<'a> {
    /// Streams read by the copy.
    pub sources: [Option<&'a AudioStream>; MUX_MAX_STREAMS],
    /// Streams written by the copy.
    pub sinks: [Option<&'a mut AudioStream>; MUX_MAX_STREAMS],
}

/// Owning store of every buffer in a pipeline, indexed by [`BufferId`].
#[derive(Debug, Default)]
pub struct BufferArena {
    slots: Vec<Option<CompBuffer>>,
}

impl BufferArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a buffer of `capacity` bytes with the given parameters.
    pub fn add(&mut self, capacity: usize, params: &StreamParams) -> Result<BufferId, ComponentError> {
        let stream = AudioStream::new(capacity, params.frame_fmt, params.channels, params.rate)?;
        let id = BufferId(self.slots.len());

        self.slots.push(Some(CompBuffer {
            id,
            stream,
            buffer_fmt: params.buffer_fmt,
            params_configured: false,
            producer: None,
            consumer: None,
            publishes: 0,
        }));

        tracing::debug!(buffer = %id, capacity, "buffer added");
        Ok(id)
    }

    /// Removes a buffer. Its id is never reused.
    pub fn remove(&mut self, id: BufferId) -> Result<CompBuffer, ComponentError> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(ComponentError::UnknownBuffer { id })
    }

    /// Looks up a buffer.
    pub fn get(&self, id: BufferId) -> Result<&CompBuffer, ComponentError> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(ComponentError::UnknownBuffer { id })
    }

    /// Looks up a buffer for mutation.
    pub fn get_mut(&mut self, id: BufferId) -> Result<&mut CompBuffer, ComponentError> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(ComponentError::UnknownBuffer { id })
    }

    /// Looks up a buffer's stream.
    pub fn stream(&self, id: BufferId) -> Result<&AudioStream, ComponentError> {
        self.get(id).map(CompBuffer::stream)
    }

    /// Looks up a buffer's stream for mutation.
    pub fn stream_mut(&mut self, id: BufferId) -> Result<&mut AudioStream, ComponentError> {
        self.get_mut(id).map(CompBuffer::stream_mut)
    }

    /// Records the component writing into `id`.
    pub fn set_producer(&mut self, id: BufferId, endpoint: Endpoint) -> Result<(), ComponentError> {
        self.get_mut(id)?.producer = Some(endpoint);
        Ok(())
    }

    /// Clears every producer and consumer endpoint naming `comp`.
    pub fn detach(&mut self, comp: CompId) {
        for buffer in self.slots.iter_mut().flatten() {
            if buffer.producer.is_some_and(|e| e.comp == comp) {
                buffer.producer = None;
            }
            if buffer.consumer.is_some_and(|e| e.comp == comp) {
                buffer.consumer = None;
            }
        }
    }

    /// Records the component reading from `id`.
    pub fn set_consumer(&mut self, id: BufferId, endpoint: Endpoint) -> Result<(), ComponentError> {
        self.get_mut(id)?.consumer = Some(endpoint);
        Ok(())
    }

    /// Number of live buffers.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Returns true if the arena holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows several streams at once: `sources` shared and `sinks` exclusive.
    ///
    /// Each id may appear only once across both lists.
    pub fn split_io(
        &mut self,
        sources: &[BufferId],
        sinks: &[BufferId],
    ) -> Result<IoRefs<'_>, ComponentError> {
        if sources.len() > MUX_MAX_STREAMS || sinks.len() > MUX_MAX_STREAMS {
            return Err(ComponentError::invalid_argument(format!(
                "at most {MUX_MAX_STREAMS} sources and sinks per copy"
            )));
        }
        for (idx, id) in sources.iter().chain(sinks).enumerate() {
            if sources.iter().chain(sinks).skip(idx + 1).any(|other| other == id) {
                return Err(ComponentError::invalid_argument(format!(
                    "{id} borrowed twice in one copy"
                )));
            }
        }

        let mut io = IoRefs {
            sources: [None; MUX_MAX_STREAMS],
            sinks: Default::default(),
        };

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let Some(buffer) = slot.as_mut() else {
                continue;
            };
            let id = BufferId(idx);

            if let Some(pos) = sinks.iter().position(|&s| s == id) {
                io.sinks[pos] = Some(&mut buffer.stream);
            } else if let Some(pos) = sources.iter().position(|&s| s == id) {
                io.sources[pos] = Some(&buffer.stream);
            }
        }

        let missing = sources
            .iter()
            .zip(io.sources.iter().map(Option::is_some))
            .chain(sinks.iter().zip(io.sinks.iter().map(Option::is_some)))
            .find(|(_, present)| !present);
        if let Some((&id, _)) = missing {
            return Err(ComponentError::UnknownBuffer { id });
        }

        Ok(io)
    }
}
