//! Configuration types for components.

use crate::format::SampleFormat;
use crate::id::{BufferId, CompId, CompType};
use crate::ComponentError;

/// Maximum channels in any stream.
pub const MAX_CHANNELS: usize = 8;

/// Maximum streams a mux merges or a demux splits into.
pub const MUX_MAX_STREAMS: usize = 4;

/// Largest control-data chunk returned by a single read-back request.
pub const MAX_CONTROL_CHUNK: usize = 384;

/// Buffers grown at prepare hold this many processing blocks.
pub const PING_PONG_PERIODS: usize = 2;

/// Processing direction of the pipeline a component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Host to DAI; parameters propagate downstream.
    #[default]
    Playback,
    /// DAI to host; parameters propagate upstream.
    Capture,
}

/// Routing masks for one mux/demux stream.
///
/// `mask[out_ch]` is a bitset over input channels: bit `k` routes input
/// channel `k` to output channel `out_ch`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MuxStreamConfig {
    /// Pipeline the stream comes from (mux) or goes to (demux).
    pub pipeline_id: u32,
    /// Channel count of the stream.
    pub num_channels: u8,
    /// Per-output-channel input masks.
    pub mask: [u8; MAX_CHANNELS],
}

impl MuxStreamConfig {
    /// Creates a stream config with all masks cleared.
    pub fn new(pipeline_id: u32, num_channels: u8) -> Self {
        Self {
            pipeline_id,
            num_channels,
            mask: [0; MAX_CHANNELS],
        }
    }

    /// Routes input channel `in_ch` to output channel `out_ch`.
    ///
    /// # Panics
    ///
    /// Panics if either channel is `MAX_CHANNELS` or above. A mask holds
    /// one bit per input channel.
    #[must_use]
    pub fn route(mut self, in_ch: usize, out_ch: usize) -> Self {
        assert!(
            in_ch < MAX_CHANNELS && out_ch < MAX_CHANNELS,
            "route {in_ch} -> {out_ch} outside {MAX_CHANNELS} channels"
        );
        self.mask[out_ch] |= 1 << in_ch;
        self
    }
}

/// Routing configuration of a mux or demux component.
///
/// Stream `i` describes the `i`-th source buffer of a mux, or the `i`-th
/// sink buffer of a demux, in connection order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MuxConfig {
    /// One entry per routed stream.
    pub streams: Vec<MuxStreamConfig>,
}

impl MuxConfig {
    /// Checks stream and channel counts against the platform limits.
    pub fn validate(&self) -> Result<(), ComponentError> {
        if self.streams.is_empty() || self.streams.len() > MUX_MAX_STREAMS {
            return Err(ComponentError::invalid_config(format!(
                "mux stream count {} outside 1..={MUX_MAX_STREAMS}",
                self.streams.len()
            )));
        }

        for (idx, stream) in self.streams.iter().enumerate() {
            if usize::from(stream.num_channels) > MAX_CHANNELS {
                return Err(ComponentError::invalid_config(format!(
                    "stream {idx} has {} channels, max {MAX_CHANNELS}",
                    stream.num_channels
                )));
            }
        }

        Ok(())
    }
}

/// Block sizes of a processing module, in samples.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessConfig {
    /// Input block size consumed per tick.
    pub ibs: u32,
    /// Output block size that must fit in the sink before processing.
    pub obs: u32,
    /// Model blob installed at creation.
    pub initial_model: Option<Vec<u8>>,
}

/// Driver-specific part of a component descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DriverParams {
    /// The driver needs no extra data.
    #[default]
    None,
    /// Mux/demux routing.
    Mux(MuxConfig),
    /// Processing module block sizes.
    Process(ProcessConfig),
    /// Stage with a dedicated feedback buffer.
    Feedback {
        /// The buffer carrying feedback samples.
        feedback_buffer: BufferId,
    },
}

/// Descriptor used to create a component.
///
/// Use [`CompConfig::new()`] for sensible defaults and adjust the fields.
///
/// # Example
///
/// ```
/// use pcm_pipeline::{CompConfig, CompId, CompType};
///
/// let config = CompConfig {
///     periods_sink: 3,
///     ..CompConfig::new(CompId::new(4), CompType::Dsm)
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompConfig {
    /// Component id.
    pub id: CompId,
    /// Pipeline the component belongs to.
    pub pipeline_id: u32,
    /// Driver type.
    pub comp_type: CompType,
    /// Processing direction.
    pub direction: Direction,
    /// Scheduling period in microseconds.
    ///
    /// Default: 1000
    pub period_us: u32,
    /// Sink buffer size in periods.
    ///
    /// Default: 2
    pub periods_sink: u32,
    /// Source buffer size in periods.
    ///
    /// Default: 2
    pub periods_source: u32,
    /// Frame format the component processes.
    pub frame_fmt: SampleFormat,
    /// Driver-specific data.
    pub params: DriverParams,
}

impl CompConfig {
    /// Creates a descriptor with default timing.
    pub fn new(id: CompId, comp_type: CompType) -> Self {
        Self {
            id,
            pipeline_id: 0,
            comp_type,
            direction: Direction::default(),
            period_us: 1000,
            periods_sink: 2,
            periods_source: 2,
            frame_fmt: SampleFormat::default(),
            params: DriverParams::None,
        }
    }

    /// Sets the driver-specific data.
    #[must_use]
    pub fn with_params(mut self, params: DriverParams) -> Self {
        self.params = params;
        self
    }

    /// Rejects descriptors the engine cannot size buffers for.
    pub fn validate(&self) -> Result<(), ComponentError> {
        if self.period_us == 0 {
            return Err(ComponentError::invalid_config("period_us is zero"));
        }
        if self.periods_sink == 0 || self.periods_source == 0 {
            return Err(ComponentError::invalid_config(format!(
                "period multipliers must be non-zero (sink {}, source {})",
                self.periods_sink, self.periods_source
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comp_config_defaults() {
        let config = CompConfig::new(CompId::new(1), CompType::Mux);
        assert_eq!(config.period_us, 1000);
        assert_eq!(config.periods_sink, 2);
        assert_eq!(config.periods_source, 2);
        assert_eq!(config.frame_fmt, SampleFormat::S16Le);
        assert_eq!(config.direction, Direction::Playback);
        assert_eq!(config.params, DriverParams::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_comp_config_rejects_zero_periods() {
        let config = CompConfig {
            periods_sink: 0,
            ..CompConfig::new(CompId::new(1), CompType::Dsm)
        };
        assert!(matches!(
            config.validate(),
            Err(ComponentError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_comp_config_rejects_zero_period() {
        let config = CompConfig {
            period_us: 0,
            ..CompConfig::new(CompId::new(1), CompType::Dsm)
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stream_route_sets_mask_bits() {
        let stream = MuxStreamConfig::new(0, 2).route(0, 0).route(0, 2).route(1, 3);
        assert_eq!(stream.mask[0], 0b01);
        assert_eq!(stream.mask[2], 0b01);
        assert_eq!(stream.mask[3], 0b10);
        assert_eq!(stream.mask[1], 0);
    }

    #[test]
    #[should_panic(expected = "outside 8 channels")]
    fn test_stream_route_rejects_wide_output() {
        let _ = MuxStreamConfig::new(0, 2).route(0, MAX_CHANNELS);
    }

    #[test]
    #[should_panic(expected = "outside 8 channels")]
    fn test_stream_route_rejects_wide_input() {
        let _ = MuxStreamConfig::new(0, 2).route(MAX_CHANNELS, 0);
    }

    #[test]
    fn test_mux_config_limits() {
        assert!(MuxConfig::default().validate().is_err());

        let too_many = MuxConfig {
            streams: vec![MuxStreamConfig::new(0, 2); MUX_MAX_STREAMS + 1],
        };
        assert!(too_many.validate().is_err());

        let wide = MuxConfig {
            streams: vec![MuxStreamConfig::new(0, 9)],
        };
        assert!(wide.validate().is_err());

        let ok = MuxConfig {
            streams: vec![MuxStreamConfig::new(0, 2), MuxStreamConfig::new(1, 2)],
        };
        assert!(ok.validate().is_ok());
    }
}
