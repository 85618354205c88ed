//! Channel mux and demux.

use crate::component::{Component, ComponentDriver, CopyOutcome, DevCore, Status};
use crate::config::{CompConfig, DriverParams, MuxConfig};
use crate::id::{BufferId, CompType};
use crate::pipeline::router::{demux_frames, mux_frames};
use crate::pipeline::{BufferArena, RoutingTable};
use crate::ComponentError;

use super::{abort_prepare, begin_prepare, stalled};

fn mux_config(config: &CompConfig) -> Result<MuxConfig, ComponentError> {
    let DriverParams::Mux(mux) = &config.params else {
        return Err(ComponentError::invalid_config(format!(
            "{} needs mux routing params",
            config.comp_type
        )));
    };
    mux.validate()?;
    Ok(mux.clone())
}

/// Checks that every sink has an integer copy path and the sample width of
/// every source. The error names the sink that cannot take the copy.
fn check_formats(
    buffers: &BufferArena,
    sources: &[BufferId],
    sinks: &[BufferId],
) -> Result<(), ComponentError> {
    for &sink_id in sinks {
        let sink = buffers.stream(sink_id)?;
        let format = sink.format();
        if format.copy_width().is_none() {
            return Err(ComponentError::UnsupportedFormat { format });
        }
        for &source_id in sources {
            if buffers.stream(source_id)?.sample_bytes() != sink.sample_bytes() {
                tracing::error!(source = %source_id, sink = %sink_id, %format, "sample width mismatch");
                return Err(ComponentError::UnsupportedFormat { format });
            }
        }
    }
    Ok(())
}

/// Driver for [`CompType::Mux`].
#[derive(Debug, Default)]
pub struct MuxDriver;

impl ComponentDriver for MuxDriver {
    fn comp_type(&self) -> CompType {
        CompType::Mux
    }

    fn name(&self) -> &'static str {
        "mux"
    }

    fn create(&self, config: &CompConfig) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(Mux {
            config: mux_config(config)?,
            table: RoutingTable::default(),
        }))
    }
}

struct Mux {
    config: MuxConfig,
    table: RoutingTable,
}

impl Component for Mux {
    fn prepare(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<Status, ComponentError> {
        if begin_prepare(dev)? == Status::PathStop {
            return Ok(Status::PathStop);
        }

        dev.first_sink()
            .and_then(|sink| check_formats(buffers, dev.sources(), &[sink]))
            .map_err(|e| abort_prepare(dev, e))?;

        self.table = RoutingTable::for_mux(&self.config);
        for entry in self.table.active() {
            tracing::debug!(
                comp = %dev.id(),
                out_ch = entry.out_ch,
                in_ch = entry.in_ch,
                stream = entry.stream,
                "mux route"
            );
        }
        Ok(Status::Ok)
    }

    fn copy(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<CopyOutcome, ComponentError> {
        let sink = dev.first_sink()?;
        let sources = dev.sources();
        if sources.is_empty() {
            return Ok(CopyOutcome::NoInput);
        }

        let io = buffers.split_io(sources, &[sink])?;
        let source_frames = io
            .sources
            .iter()
            .flatten()
            .map(|s| s.avail_frames())
            .min()
            .unwrap_or(0);
        let Some(sink_stream) = io.sinks.into_iter().next().flatten() else {
            return Err(ComponentError::UnknownBuffer { id: sink });
        };
        let frames = source_frames.min(sink_stream.free_frames());

        if frames == 0 {
            tracing::trace!(comp = %dev.id(), source_frames, "mux stalled");
            return Ok(stalled(source_frames));
        }

        mux_frames(&self.table, &io.sources[..sources.len()], sink_stream, frames)?;

        let sink_bytes = frames * sink_stream.frame_bytes();
        sink_stream.produce(sink_bytes)?;

        let mut source_bytes = 0;
        for (idx, &id) in sources.iter().enumerate() {
            let stream = buffers.stream_mut(id)?;
            let bytes = frames * stream.frame_bytes();
            stream.consume(bytes)?;
            if idx == 0 {
                source_bytes = bytes;
            }
        }

        tracing::trace!(comp = %dev.id(), frames, "mux copy");
        Ok(CopyOutcome::Processed {
            source_bytes,
            sink_bytes,
        })
    }
}

/// Driver for [`CompType::Demux`].
#[derive(Debug, Default)]
pub struct DemuxDriver;

impl ComponentDriver for DemuxDriver {
    fn comp_type(&self) -> CompType {
        CompType::Demux
    }

    fn name(&self) -> &'static str {
        "demux"
    }

    fn create(&self, config: &CompConfig) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(Demux {
            config: mux_config(config)?,
            tables: Vec::new(),
        }))
    }
}

struct Demux {
    config: MuxConfig,
    tables: Vec<RoutingTable>,
}

impl Component for Demux {
    fn prepare(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<Status, ComponentError> {
        if begin_prepare(dev)? == Status::PathStop {
            return Ok(Status::PathStop);
        }

        let tables = RoutingTable::for_demux(&self.config);
        let routed: Vec<BufferId> = dev.sinks().iter().copied().take(tables.len()).collect();
        dev.first_source()
            .and_then(|source| {
                if routed.is_empty() {
                    dev.first_sink()?;
                }
                check_formats(buffers, &[source], &routed)
            })
            .map_err(|e| abort_prepare(dev, e))?;

        self.tables = tables;
        tracing::debug!(comp = %dev.id(), tables = self.tables.len(), "demux routes built");
        Ok(Status::Ok)
    }

    fn copy(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<CopyOutcome, ComponentError> {
        let source = dev.first_source()?;
        let routed: Vec<BufferId> = dev.sinks().iter().copied().take(self.tables.len()).collect();
        if routed.is_empty() {
            return Ok(CopyOutcome::NoSpace);
        }

        let io = buffers.split_io(&[source], &routed)?;
        let Some(source_stream) = io.sources[0] else {
            return Err(ComponentError::UnknownBuffer { id: source });
        };
        let mut sinks = io.sinks;

        let source_frames = source_stream.avail_frames();
        let frames = sinks
            .iter()
            .flatten()
            .map(|s| s.free_frames())
            .fold(source_frames, usize::min);

        if frames == 0 {
            tracing::trace!(comp = %dev.id(), source_frames, "demux stalled");
            return Ok(stalled(source_frames));
        }

        // every sink is written before any cursor moves
        for (table, sink) in self.tables.iter().zip(sinks.iter_mut()) {
            if let Some(sink) = sink.as_deref_mut() {
                demux_frames(table, source_stream, sink, frames)?;
            }
        }

        let mut sink_bytes = 0;
        for (idx, sink) in sinks.iter_mut().enumerate() {
            let Some(sink) = sink.as_deref_mut() else {
                continue;
            };
            let bytes = frames * sink.frame_bytes();
            sink.produce(bytes)?;
            if idx == 0 {
                sink_bytes = bytes;
            }
        }

        let source_bytes = frames * source_stream.frame_bytes();
        buffers.stream_mut(source)?.consume(source_bytes)?;

        tracing::trace!(comp = %dev.id(), frames, "demux copy");
        Ok(CopyOutcome::Processed {
            source_bytes,
            sink_bytes,
        })
    }
}
