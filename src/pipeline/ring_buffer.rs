//! Ring buffer holding one stream of interleaved PCM samples.

use crate::config::MAX_CHANNELS;
use crate::format::{Sample, SampleFormat};
use crate::ComponentError;

/// Allocates a zeroed byte buffer, reporting allocation failure.
pub(crate) fn alloc_zeroed(bytes: usize) -> Result<Vec<u8>, ComponentError> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| ComponentError::OutOfMemory { bytes })?;
    data.resize(bytes, 0);
    Ok(data)
}

/// A fixed-capacity circular byte buffer of interleaved samples.
///
/// Cursors are byte offsets into the backing storage (`base` is offset 0,
/// `end` is [`capacity()`](Self::capacity)). Both always satisfy
/// `0 <= cursor < capacity`: an advance that lands on `end` wraps to `base`.
/// `avail` counts readable bytes and `free` is derived from it, so
/// `avail + free == capacity` holds after every operation.
///
/// The stream never moves its own cursors while copying. Components read and
/// write through positions derived from the cursors and then call
/// [`produce()`](Self::produce) / [`consume()`](Self::consume) with the
/// number of bytes actually moved.
#[derive(Debug, Clone)]
pub struct AudioStream {
    data: Vec<u8>,
    r_pos: usize,
    w_pos: usize,
    avail: usize,
    format: SampleFormat,
    channels: u16,
    rate: u32,
}

impl AudioStream {
    /// Creates an empty stream with `capacity` bytes of storage.
    ///
    /// The capacity must be a non-zero multiple of the sample size and the
    /// channel count must be within `1..=MAX_CHANNELS`.
    pub fn new(
        capacity: usize,
        format: SampleFormat,
        channels: u16,
        rate: u32,
    ) -> Result<Self, ComponentError> {
        validate_layout(capacity, format, channels)?;

        Ok(Self {
            data: alloc_zeroed(capacity)?,
            r_pos: 0,
            w_pos: 0,
            avail: 0,
            format,
            channels,
            rate,
        })
    }

    /// Total size of the buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes available for reading.
    pub fn avail(&self) -> usize {
        self.avail
    }

    /// Bytes available for writing.
    pub fn free(&self) -> usize {
        self.capacity() - self.avail
    }

    /// Read cursor as a byte offset.
    pub fn read_pos(&self) -> usize {
        self.r_pos
    }

    /// Write cursor as a byte offset.
    pub fn write_pos(&self) -> usize {
        self.w_pos
    }

    /// Frame format of the stored samples.
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Number of interleaved channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate in Hz.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Size of one sample in bytes.
    pub fn sample_bytes(&self) -> usize {
        self.format.sample_bytes()
    }

    /// Size of one frame (one sample per channel) in bytes.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * self.sample_bytes()
    }

    /// Whole frames available for reading.
    pub fn avail_frames(&self) -> usize {
        self.avail / self.frame_bytes()
    }

    /// Whole frames that can be written.
    pub fn free_frames(&self) -> usize {
        self.free() / self.frame_bytes()
    }

    /// Samples available for reading.
    pub fn avail_samples(&self) -> usize {
        self.avail / self.sample_bytes()
    }

    /// Samples that can be written.
    pub fn free_samples(&self) -> usize {
        self.free() / self.sample_bytes()
    }

    /// Bytes between `pos` and the end of the buffer.
    pub fn bytes_without_wrap(&self, pos: usize) -> usize {
        self.capacity() - pos
    }

    /// Frames addressable from `pos` before the buffer end.
    ///
    /// `pos` addresses one channel's sample inside a frame and advances by a
    /// full frame per step. When the bytes left after the whole frames still
    /// hold at least one sample, that partial frame is addressable too and
    /// is counted.
    pub fn frames_without_wrap(&self, pos: usize) -> usize {
        let bytes = self.bytes_without_wrap(pos);
        let frame_bytes = self.frame_bytes();
        bytes / frame_bytes + usize::from(bytes % frame_bytes >= self.sample_bytes())
    }

    /// Folds a position that ran past the end back to the start.
    ///
    /// Positions are never more than one capacity past the end.
    pub fn wrap(&self, pos: usize) -> usize {
        if pos >= self.capacity() {
            pos - self.capacity()
        } else {
            pos
        }
    }

    /// Position of channel `ch` in the frame under the read cursor.
    pub fn channel_read_pos(&self, ch: usize) -> usize {
        self.wrap(self.r_pos + ch * self.sample_bytes())
    }

    /// Position of channel `ch` in the frame under the write cursor.
    pub fn channel_write_pos(&self, ch: usize) -> usize {
        self.wrap(self.w_pos + ch * self.sample_bytes())
    }

    /// Marks `bytes` as written, advancing the write cursor.
    pub fn produce(&mut self, bytes: usize) -> Result<(), ComponentError> {
        if bytes > self.free() {
            return Err(ComponentError::BufferOverrun {
                requested: bytes,
                available: self.free(),
            });
        }

        self.w_pos = self.wrap(self.w_pos + bytes);
        self.avail += bytes;

        tracing::trace!(
            bytes,
            avail = self.avail,
            free = self.free(),
            w_pos = self.w_pos,
            "stream produce"
        );
        Ok(())
    }

    /// Marks `bytes` as read, advancing the read cursor.
    pub fn consume(&mut self, bytes: usize) -> Result<(), ComponentError> {
        if bytes > self.avail {
            return Err(ComponentError::BufferOverrun {
                requested: bytes,
                available: self.avail,
            });
        }

        self.r_pos = self.wrap(self.r_pos + bytes);
        self.avail -= bytes;

        tracing::trace!(
            bytes,
            avail = self.avail,
            free = self.free(),
            r_pos = self.r_pos,
            "stream consume"
        );
        Ok(())
    }

    /// Empties the stream and rewinds both cursors to the start.
    pub fn reset(&mut self) {
        self.r_pos = 0;
        self.w_pos = 0;
        self.avail = 0;
    }

    /// Clears the stored samples without moving the cursors.
    pub fn zero(&mut self) {
        self.data.fill(0);
    }

    /// Replaces the storage with `capacity` zeroed bytes and empties the stream.
    ///
    /// On failure the old storage and cursors are left untouched.
    pub fn resize(&mut self, capacity: usize) -> Result<(), ComponentError> {
        validate_layout(capacity, self.format, self.channels)?;

        let data = alloc_zeroed(capacity)?;
        self.data = data;
        self.reset();
        Ok(())
    }

    /// Changes the frame format, channel count and rate.
    pub fn set_params(
        &mut self,
        format: SampleFormat,
        channels: u16,
        rate: u32,
    ) -> Result<(), ComponentError> {
        validate_layout(self.capacity(), format, channels)?;

        self.format = format;
        self.channels = channels;
        self.rate = rate;
        Ok(())
    }

    /// Reads the `idx`-th sample after the read cursor.
    pub fn read_frag<S: Sample>(&self, idx: usize) -> S {
        let pos = (self.r_pos + idx * S::BYTES) % self.capacity();
        S::read_le(&self.data, pos)
    }

    /// Writes the `idx`-th sample after the write cursor.
    pub fn write_frag<S: Sample>(&mut self, idx: usize, sample: S) {
        let pos = (self.w_pos + idx * S::BYTES) % self.capacity();
        sample.write_le(&mut self.data, pos);
    }

    /// Appends interleaved samples and advances the write cursor.
    ///
    /// This is how an endpoint (host DMA, DAI) fills a stream.
    pub fn write_samples<S: Sample>(&mut self, samples: &[S]) -> Result<(), ComponentError> {
        self.check_width::<S>()?;

        let bytes = samples.len() * S::BYTES;
        if bytes > self.free() {
            return Err(ComponentError::BufferOverrun {
                requested: bytes,
                available: self.free(),
            });
        }

        for (idx, &sample) in samples.iter().enumerate() {
            self.write_frag(idx, sample);
        }
        self.produce(bytes)
    }

    /// Removes `count` interleaved samples and advances the read cursor.
    ///
    /// This is how an endpoint drains a stream.
    pub fn read_samples<S: Sample>(&mut self, count: usize) -> Result<Vec<S>, ComponentError> {
        self.check_width::<S>()?;

        let bytes = count * S::BYTES;
        if bytes > self.avail {
            return Err(ComponentError::BufferOverrun {
                requested: bytes,
                available: self.avail,
            });
        }

        let samples = (0..count).map(|idx| self.read_frag(idx)).collect();
        self.consume(bytes)?;
        Ok(samples)
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn check_width<S: Sample>(&self) -> Result<(), ComponentError> {
        if S::BYTES == self.sample_bytes() {
            Ok(())
        } else {
            Err(ComponentError::invalid_argument(format!(
                "{}-byte samples do not match stream format {}",
                S::BYTES,
                self.format
            )))
        }
    }
}

fn validate_layout(
    capacity: usize,
    format: SampleFormat,
    channels: u16,
) -> Result<(), ComponentError> {
    if channels == 0 || usize::from(channels) > MAX_CHANNELS {
        return Err(ComponentError::invalid_argument(format!(
            "channel count {channels} outside 1..={MAX_CHANNELS}"
        )));
    }
    if capacity == 0 || capacity % format.sample_bytes() != 0 {
        return Err(ComponentError::invalid_argument(format!(
            "capacity {capacity} is not a non-zero multiple of {} byte samples",
            format.sample_bytes()
        )));
    }
    Ok(())
}

/// Frame counts and byte totals for one source-to-sink copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyLimits {
    /// Frames that can move from source to sink.
    pub frames: usize,
    /// Source frame size in bytes.
    pub source_frame_bytes: usize,
    /// Sink frame size in bytes.
    pub sink_frame_bytes: usize,
    /// Bytes consumed from the source.
    pub source_bytes: usize,
    /// Bytes produced into the sink.
    pub sink_bytes: usize,
}

impl CopyLimits {
    /// Computes the limits for copying between two streams.
    pub fn between(source: &AudioStream, sink: &AudioStream) -> Self {
        let frames = avail_frames(source, sink);
        let source_frame_bytes = source.frame_bytes();
        let sink_frame_bytes = sink.frame_bytes();

        Self {
            frames,
            source_frame_bytes,
            sink_frame_bytes,
            source_bytes: frames * source_frame_bytes,
            sink_bytes: frames * sink_frame_bytes,
        }
    }
}

/// Frames readable from `source` that also fit into `sink`.
pub fn avail_frames(source: &AudioStream, sink: &AudioStream) -> usize {
    source.avail_frames().min(sink.free_frames())
}

/// Copies `samples` samples from the source read cursor to the sink write
/// cursor without advancing either cursor.
///
/// The copy is split at every buffer boundary it meets. Both streams must
/// use the same sample size. Returns the number of bytes copied.
pub fn copy_samples(
    source: &AudioStream,
    sink: &mut AudioStream,
    samples: usize,
) -> Result<usize, ComponentError> {
    if source.sample_bytes() != sink.sample_bytes() {
        return Err(ComponentError::invalid_argument(format!(
            "cannot copy {} samples into {} stream",
            source.format(),
            sink.format()
        )));
    }

    let bytes = samples * source.sample_bytes();
    if bytes > source.avail() || bytes > sink.free() {
        return Err(ComponentError::BufferOverrun {
            requested: bytes,
            available: source.avail().min(sink.free()),
        });
    }

    let mut src = source.read_pos();
    let mut dst = sink.write_pos();
    let mut remaining = bytes;

    while remaining > 0 {
        let chunk = remaining
            .min(source.bytes_without_wrap(src))
            .min(sink.bytes_without_wrap(dst));

        sink.data_mut()[dst..dst + chunk].copy_from_slice(&source.data()[src..src + chunk]);

        src = source.wrap(src + chunk);
        dst = sink.wrap(dst + chunk);
        remaining -= chunk;
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_s16(capacity: usize) -> AudioStream {
        AudioStream::new(capacity, SampleFormat::S16Le, 2, 48000).unwrap()
    }

    #[test]
    fn test_new_stream_is_empty() {
        let stream = stereo_s16(16);
        assert_eq!(stream.capacity(), 16);
        assert_eq!(stream.avail(), 0);
        assert_eq!(stream.free(), 16);
        assert_eq!(stream.frame_bytes(), 4);
        assert_eq!(stream.free_frames(), 4);
        assert_eq!(stream.free_samples(), 8);
    }

    #[test]
    fn test_new_rejects_bad_layout() {
        assert!(AudioStream::new(0, SampleFormat::S16Le, 2, 48000).is_err());
        assert!(AudioStream::new(7, SampleFormat::S16Le, 2, 48000).is_err());
        assert!(AudioStream::new(16, SampleFormat::S32Le, 0, 48000).is_err());
        assert!(AudioStream::new(16, SampleFormat::S32Le, 9, 48000).is_err());
    }

    #[test]
    fn test_avail_plus_free_is_capacity() {
        let mut stream = stereo_s16(20);

        for step in [4, 8, 4, 2, 6, 12, 2] {
            if stream.free() >= step {
                stream.produce(step).unwrap();
            }
            assert_eq!(stream.avail() + stream.free(), stream.capacity());
            assert!(stream.write_pos() < stream.capacity());

            if stream.avail() >= step / 2 {
                stream.consume(step / 2).unwrap();
            }
            assert_eq!(stream.avail() + stream.free(), stream.capacity());
            assert!(stream.read_pos() < stream.capacity());
        }
    }

    #[test]
    fn test_cursor_wraps_exactly_at_end() {
        let mut stream = stereo_s16(16);
        stream.produce(12).unwrap();
        assert_eq!(stream.write_pos(), 12);

        stream.consume(12).unwrap();
        stream.produce(4).unwrap();
        assert_eq!(stream.write_pos(), 0);

        stream.consume(4).unwrap();
        assert_eq!(stream.read_pos(), 0);
    }

    #[test]
    fn test_produce_overrun_is_rejected() {
        let mut stream = stereo_s16(8);
        stream.produce(6).unwrap();

        let err = stream.produce(4).unwrap_err();
        assert_eq!(
            err,
            ComponentError::BufferOverrun {
                requested: 4,
                available: 2
            }
        );
        assert_eq!(stream.avail(), 6);
    }

    #[test]
    fn test_consume_overrun_is_rejected() {
        let mut stream = stereo_s16(8);
        stream.produce(2).unwrap();
        assert!(stream.consume(4).is_err());
        assert_eq!(stream.avail(), 2);
    }

    #[test]
    fn test_frames_without_wrap_counts_partial_frame() {
        // 10 bytes of 2-channel 16-bit audio: the last frame is cut in half.
        let stream = stereo_s16(10);

        assert_eq!(stream.frames_without_wrap(0), 3);
        assert_eq!(stream.frames_without_wrap(2), 2);
        assert_eq!(stream.frames_without_wrap(4), 2);
        assert_eq!(stream.frames_without_wrap(6), 1);
        assert_eq!(stream.frames_without_wrap(8), 1);
    }

    #[test]
    fn test_frames_without_wrap_aligned() {
        let stream = stereo_s16(16);
        assert_eq!(stream.frames_without_wrap(0), 4);
        assert_eq!(stream.frames_without_wrap(12), 1);
        // Second channel of the last frame.
        assert_eq!(stream.frames_without_wrap(14), 1);
    }

    #[test]
    fn test_frag_access_wraps() {
        let mut stream = stereo_s16(8);
        stream.produce(6).unwrap();
        stream.consume(6).unwrap();

        stream.write_samples(&[1i16, 2, 3]).unwrap();
        assert_eq!(stream.read_frag::<i16>(0), 1);
        assert_eq!(stream.read_frag::<i16>(1), 2);
        assert_eq!(stream.read_frag::<i16>(2), 3);
        assert_eq!(stream.write_pos(), 4);
    }

    #[test]
    fn test_write_and_read_samples() {
        let mut stream = stereo_s16(16);
        stream.write_samples(&[10i16, 20, 11, 21]).unwrap();
        assert_eq!(stream.avail_frames(), 2);

        let samples = stream.read_samples::<i16>(4).unwrap();
        assert_eq!(samples, vec![10, 20, 11, 21]);
        assert_eq!(stream.avail(), 0);
    }

    #[test]
    fn test_sample_width_mismatch() {
        let mut stream = stereo_s16(16);
        assert!(matches!(
            stream.write_samples(&[1i32]),
            Err(ComponentError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_resize_empties_stream() {
        let mut stream = stereo_s16(8);
        stream.write_samples(&[1i16, 2]).unwrap();

        stream.resize(32).unwrap();
        assert_eq!(stream.capacity(), 32);
        assert_eq!(stream.avail(), 0);
        assert_eq!(stream.read_pos(), 0);
        assert_eq!(stream.write_pos(), 0);
    }

    #[test]
    fn test_resize_rejects_unaligned_size() {
        let mut stream = stereo_s16(8);
        assert!(stream.resize(9).is_err());
        assert_eq!(stream.capacity(), 8);
    }

    #[test]
    fn test_zero_keeps_cursors() {
        let mut stream = stereo_s16(8);
        stream.write_samples(&[5i16, 6]).unwrap();
        stream.zero();

        assert_eq!(stream.avail(), 4);
        assert_eq!(stream.read_frag::<i16>(0), 0);
    }

    #[test]
    fn test_copy_limits() {
        let mut source = stereo_s16(32);
        source.write_samples(&[0i16; 12]).unwrap();
        let sink = AudioStream::new(32, SampleFormat::S16Le, 4, 48000).unwrap();

        let limits = CopyLimits::between(&source, &sink);
        assert_eq!(limits.frames, 4);
        assert_eq!(limits.source_bytes, 16);
        assert_eq!(limits.sink_bytes, 32);
    }

    #[test]
    fn test_copy_samples_across_boundaries() {
        let mut source = stereo_s16(12);
        let mut sink = stereo_s16(8);

        // Move both cursors so that source and sink wrap at different points.
        source.produce(8).unwrap();
        source.consume(8).unwrap();
        sink.produce(2).unwrap();
        sink.consume(2).unwrap();

        source.write_samples(&[1i16, 2, 3]).unwrap();

        let bytes = copy_samples(&source, &mut sink, 3).unwrap();
        assert_eq!(bytes, 6);
        sink.produce(bytes).unwrap();

        assert_eq!(sink.read_samples::<i16>(3).unwrap(), vec![1, 2, 3]);
        // Source cursor untouched by the copy.
        assert_eq!(source.avail(), 6);
    }

    #[test]
    fn test_copy_samples_rejects_overrun() {
        let mut source = stereo_s16(8);
        source.write_samples(&[1i16, 2]).unwrap();
        let mut sink = stereo_s16(8);

        assert!(copy_samples(&source, &mut sink, 3).is_err());
    }
}
