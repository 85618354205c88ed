//! Stream parameter negotiation between a component and its buffers.

use crate::component::DevCore;
use crate::config::Direction;
use crate::pipeline::{BufferArena, CompBuffer, ParamFlags, StreamParams};
use crate::ComponentError;

/// Overwrites the fields of `params` selected by `flags` with the buffer's.
fn update_params(flags: ParamFlags, params: &mut StreamParams, buffer: &CompBuffer) {
    let current = buffer.params();

    if flags.contains(ParamFlags::FRAME_FMT) {
        params.frame_fmt = current.frame_fmt;
    }
    if flags.contains(ParamFlags::BUFFER_FMT) {
        params.buffer_fmt = current.buffer_fmt;
    }
    if flags.contains(ParamFlags::CHANNELS) {
        params.channels = current.channels;
    }
    if flags.contains(ParamFlags::RATE) {
        params.rate = current.rate;
    }
}

/// Applies stream parameters to a component's buffers.
///
/// An endpoint component (connected on one side only) takes the fields
/// named by `flags` from its single buffer, forces the result back onto
/// that buffer and derives its period from the buffer rate. Any other
/// component pushes the parameters onto every buffer in its processing
/// direction (sinks for playback, sources for capture) and derives its
/// period from the first sink.
pub fn verify_params(
    dev: &mut DevCore,
    buffers: &mut BufferArena,
    flags: ParamFlags,
    params: Option<&StreamParams>,
) -> Result<(), ComponentError> {
    let Some(params) = params else {
        tracing::error!(comp = %dev.id(), "no stream params");
        return Err(ComponentError::invalid_argument("no stream params"));
    };
    let mut negotiated = *params;

    let endpoint = dev.sources().is_empty() != dev.sinks().is_empty();

    if endpoint {
        let id = match dev.sources().first() {
            Some(&id) => id,
            None => dev.first_sink()?,
        };

        let mut buffer = buffers.get_mut(id)?.lock();
        update_params(flags, &mut negotiated, &buffer);
        buffer.set_params(&negotiated, true)?;
        dev.set_period_frames(buffer.stream().rate());
    } else {
        let list = match dev.direction() {
            Direction::Playback => dev.sinks().to_vec(),
            Direction::Capture => dev.sources().to_vec(),
        };

        for id in list {
            let mut buffer = buffers.get_mut(id)?.lock();
            update_params(flags, &mut negotiated, &buffer);
            buffer.set_params(&negotiated, true)?;
        }

        let sink = dev.first_sink()?;
        let rate = buffers.get_mut(sink)?.lock().stream().rate();
        dev.set_period_frames(rate);
    }

    tracing::debug!(
        comp = %dev.id(),
        format = %negotiated.frame_fmt,
        channels = negotiated.channels,
        rate = negotiated.rate,
        frames = dev.frames(),
        "params verified"
    );
    dev.set_params(negotiated);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompConfig;
    use crate::format::SampleFormat;
    use crate::id::{CompId, CompType};

    fn params(channels: u16, rate: u32) -> StreamParams {
        StreamParams {
            channels,
            rate,
            ..StreamParams::default()
        }
    }

    #[test]
    fn test_endpoint_takes_flagged_fields_from_buffer() {
        let mut buffers = BufferArena::new();
        let sink = buffers.add(64, &params(4, 16000)).unwrap();
        let mut dev = DevCore::new(&CompConfig::new(CompId::new(1), CompType::Mux));
        dev.add_sink(sink);

        verify_params(
            &mut dev,
            &mut buffers,
            ParamFlags::RATE,
            Some(&params(2, 48000)),
        )
        .unwrap();

        let buffer = buffers.get(sink).unwrap();
        assert_eq!(buffer.params().rate, 16000);
        assert_eq!(buffer.params().channels, 2);
        assert_eq!(dev.frames(), 16);
        assert_eq!(dev.params().map(|p| p.rate), Some(16000));
        assert_eq!(buffer.publishes(), 1);
    }

    #[test]
    fn test_playback_updates_all_sinks() {
        let mut buffers = BufferArena::new();
        let source = buffers.add(64, &params(2, 48000)).unwrap();
        let sink_a = buffers.add(64, &params(2, 48000)).unwrap();
        let sink_b = buffers.add(64, &params(2, 48000)).unwrap();

        let mut dev = DevCore::new(&CompConfig::new(CompId::new(2), CompType::Demux));
        dev.add_source(source);
        dev.add_sink(sink_a);
        dev.add_sink(sink_b);

        let requested = StreamParams {
            frame_fmt: SampleFormat::S32Le,
            ..params(4, 96000)
        };
        verify_params(&mut dev, &mut buffers, ParamFlags::NONE, Some(&requested)).unwrap();

        for id in [sink_a, sink_b] {
            assert_eq!(buffers.get(id).unwrap().params(), requested);
        }
        assert_eq!(buffers.get(source).unwrap().params().channels, 2);
        assert_eq!(dev.frames(), 96);
    }

    #[test]
    fn test_capture_updates_sources() {
        let mut buffers = BufferArena::new();
        let source = buffers.add(64, &params(2, 48000)).unwrap();
        let sink = buffers.add(64, &params(2, 48000)).unwrap();

        let config = CompConfig {
            direction: Direction::Capture,
            ..CompConfig::new(CompId::new(3), CompType::Mux)
        };
        let mut dev = DevCore::new(&config);
        dev.add_source(source);
        dev.add_sink(sink);

        verify_params(&mut dev, &mut buffers, ParamFlags::NONE, Some(&params(1, 8000))).unwrap();

        assert_eq!(buffers.get(source).unwrap().params().channels, 1);
        assert_eq!(buffers.get(sink).unwrap().params().channels, 2);
        assert_eq!(dev.frames(), 48);
    }

    #[test]
    fn test_missing_params() {
        let mut buffers = BufferArena::new();
        let mut dev = DevCore::new(&CompConfig::new(CompId::new(4), CompType::Mux));
        assert!(matches!(
            verify_params(&mut dev, &mut buffers, ParamFlags::NONE, None),
            Err(ComponentError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_unconnected_component() {
        let mut buffers = BufferArena::new();
        let mut dev = DevCore::new(&CompConfig::new(CompId::new(5), CompType::Mux));
        assert!(matches!(
            verify_params(&mut dev, &mut buffers, ParamFlags::NONE, Some(&params(2, 48000))),
            Err(ComponentError::MissingBuffer { .. })
        ));
    }
}
