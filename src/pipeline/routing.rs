//! Channel routing tables for mux and demux components.
//!
//! A table maps each output channel to at most one (stream, input channel)
//! pair. Tables are built from the per-stream channel masks when a component
//! is prepared and are only read while copying.

use crate::config::{MuxConfig, MuxStreamConfig, MAX_CHANNELS};

/// One active binding of an output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    /// Index of the source stream in the component's source order.
    pub stream: usize,
    /// Channel read from that stream.
    pub in_ch: usize,
    /// Channel written in the sink.
    pub out_ch: usize,
}

/// Per-output-channel routing bindings.
///
/// When a mask routes several input channels to one output channel, the
/// binding installed last wins: streams are visited in order, then output
/// channels, then input channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingTable {
    entries: [Option<RouteEntry>; MAX_CHANNELS],
}

impl RoutingTable {
    /// Builds the single table of a mux: every stream feeds the one sink.
    pub fn for_mux(config: &MuxConfig) -> Self {
        let mut table = Self::default();
        for (idx, stream) in config.streams.iter().enumerate() {
            table.install(idx, stream);
        }
        table
    }

    /// Builds one table per demux sink stream.
    ///
    /// The source is the only stream, so every entry reads stream 0.
    pub fn for_demux(config: &MuxConfig) -> Vec<Self> {
        config
            .streams
            .iter()
            .map(|stream| {
                let mut table = Self::default();
                table.install(0, stream);
                table
            })
            .collect()
    }

    fn install(&mut self, stream_idx: usize, stream: &MuxStreamConfig) {
        for (out_ch, mask) in stream.mask.iter().enumerate() {
            for in_ch in 0..MAX_CHANNELS {
                if mask & (1 << in_ch) != 0 {
                    self.entries[out_ch] = Some(RouteEntry {
                        stream: stream_idx,
                        in_ch,
                        out_ch,
                    });
                }
            }
        }
    }

    /// Returns the binding of `out_ch`, if any.
    pub fn entry(&self, out_ch: usize) -> Option<RouteEntry> {
        self.entries.get(out_ch).copied().flatten()
    }

    /// Iterates over active bindings in output channel order.
    pub fn active(&self) -> impl Iterator<Item = RouteEntry> + '_ {
        self.entries.iter().flatten().copied()
    }

    /// Number of output channels with a binding.
    pub fn active_count(&self) -> usize {
        self.active().count()
    }
}
