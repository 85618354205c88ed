//! Routed copy between ring buffers.
//!
//! Copies run per routing entry with a working source and destination
//! position that advance by their stream's frame size. A run stops at the
//! first position that would cross a buffer end, every position past an end
//! is folded back, and the next run starts. The sample width is chosen once
//! per call from the sink format.

use crate::config::MAX_CHANNELS;
use crate::format::{Sample, SampleWidth};
use crate::pipeline::ring_buffer::AudioStream;
use crate::pipeline::routing::RoutingTable;
use crate::ComponentError;

#[derive(Debug, Clone, Copy)]
struct Lane {
    stream: usize,
    src: usize,
    dst: usize,
}

/// Copies `frames` frames from several sources into one sink through `table`.
///
/// Source slot `i` is the stream named by `RouteEntry::stream == i`. Entries
/// pointing at an empty slot or past a stream's channel count are skipped.
/// Cursors are not advanced.
pub fn mux_frames(
    table: &RoutingTable,
    sources: &[Option<&AudioStream>],
    sink: &mut AudioStream,
    frames: usize,
) -> Result<(), ComponentError> {
    check_streams(sources, sink, frames)?;

    match sink.format().copy_width() {
        Some(SampleWidth::Narrow) => route::<i16>(table, sources, sink, frames),
        Some(SampleWidth::Wide) => route::<i32>(table, sources, sink, frames),
        None => Err(ComponentError::UnsupportedFormat {
            format: sink.format(),
        }),
    }
}

/// Copies `frames` frames from one source into one sink through `table`.
///
/// Cursors are not advanced.
pub fn demux_frames(
    table: &RoutingTable,
    source: &AudioStream,
    sink: &mut AudioStream,
    frames: usize,
) -> Result<(), ComponentError> {
    mux_frames(table, &[Some(source)], sink, frames)
}

fn check_streams(
    sources: &[Option<&AudioStream>],
    sink: &AudioStream,
    frames: usize,
) -> Result<(), ComponentError> {
    if frames > sink.free_frames() {
        return Err(ComponentError::BufferOverrun {
            requested: frames * sink.frame_bytes(),
            available: sink.free(),
        });
    }

    for source in sources.iter().flatten() {
        if source.sample_bytes() != sink.sample_bytes() {
            return Err(ComponentError::UnsupportedFormat {
                format: sink.format(),
            });
        }
        if frames > source.avail_frames() {
            return Err(ComponentError::BufferOverrun {
                requested: frames * source.frame_bytes(),
                available: source.avail(),
            });
        }
    }

    Ok(())
}

fn route<S: Sample>(
    table: &RoutingTable,
    sources: &[Option<&AudioStream>],
    sink: &mut AudioStream,
    frames: usize,
) -> Result<(), ComponentError> {
    let mut lanes: [Option<Lane>; MAX_CHANNELS] = [None; MAX_CHANNELS];
    let sink_channels = usize::from(sink.channels());

    for entry in table.active() {
        let Some(source) = sources.get(entry.stream).copied().flatten() else {
            continue;
        };
        if entry.out_ch >= sink_channels || entry.in_ch >= usize::from(source.channels()) {
            continue;
        }

        lanes[entry.out_ch] = Some(Lane {
            stream: entry.stream,
            src: source.channel_read_pos(entry.in_ch),
            dst: sink.channel_write_pos(entry.out_ch),
        });
    }

    let sink_stride = sink.frame_bytes();
    let mut remaining = frames;

    while remaining > 0 {
        let mut run = remaining;
        for lane in lanes.iter().flatten() {
            let source = lane_source(sources, lane)?;
            run = run
                .min(source.frames_without_wrap(lane.src))
                .min(sink.frames_without_wrap(lane.dst));
        }
        if run == 0 {
            return Err(ComponentError::invalid_argument("routed copy made no progress"));
        }

        for lane in lanes.iter_mut().flatten() {
            let source = lane_source(sources, lane)?;
            let src_stride = source.frame_bytes();

            for _ in 0..run {
                let sample = S::read_le(source.data(), lane.src);
                sample.write_le(sink.data_mut(), lane.dst);
                lane.src += src_stride;
                lane.dst += sink_stride;
            }

            lane.src = source.wrap(lane.src);
            lane.dst = sink.wrap(lane.dst);
        }

        tracing::trace!(run, remaining, "routed copy run");
        remaining -= run;
    }

    Ok(())
}

fn lane_source<'a>(
    sources: &[Option<&'a AudioStream>],
    lane: &Lane,
) -> Result<&'a AudioStream, ComponentError> {
    sources
        .get(lane.stream)
        .copied()
        .flatten()
        .ok_or_else(|| ComponentError::invalid_argument(format!("no source stream {}", lane.stream)))
}
