//! Speaker-model stage and its feedback splitter.
//!
//! `dsm-demux` sits on the capture side and copies the stream into its sink
//! and into a dedicated feedback buffer. `dsm` passes its stream source
//! through to its sink and consumes the feedback buffer at the same rate.

use crate::component::{Component, ComponentDriver, CopyOutcome, DevCore, Status, Transition, Trigger};
use crate::config::{CompConfig, DriverParams};
use crate::id::{BufferId, CompType};
use crate::pipeline::ring_buffer::{copy_samples, CopyLimits};
use crate::pipeline::BufferArena;
use crate::ComponentError;

use super::{abort_prepare, begin_prepare, stalled};

fn feedback_buffer(config: &CompConfig) -> Result<BufferId, ComponentError> {
    match config.params {
        DriverParams::Feedback { feedback_buffer } => Ok(feedback_buffer),
        _ => Err(ComponentError::invalid_config(format!(
            "{} needs a feedback buffer id",
            config.comp_type
        ))),
    }
}

/// Bytes in one period of the negotiated stream.
fn period_bytes(dev: &DevCore) -> Result<usize, ComponentError> {
    let frame_bytes = dev
        .params()
        .map(|p| p.frame_bytes())
        .ok_or_else(|| ComponentError::invalid_argument("stream params not set"))?;
    let bytes = dev.frames() as usize * frame_bytes;
    if bytes == 0 {
        return Err(ComponentError::invalid_argument("period_bytes = 0"));
    }
    Ok(bytes)
}

/// Splits `ids` into the feedback buffer and the first other buffer.
fn pick(
    dev: &DevCore,
    ids: &[BufferId],
    feedback: BufferId,
    role: &'static str,
) -> Result<(BufferId, BufferId), ComponentError> {
    let missing = |role| ComponentError::MissingBuffer {
        comp: dev.id(),
        role,
    };
    let stream = ids.iter().copied().find(|&id| id != feedback).ok_or(missing(role))?;
    if !ids.contains(&feedback) {
        return Err(missing("feedback"));
    }
    Ok((stream, feedback))
}

fn check_same_layout(buffers: &BufferArena, a: BufferId, b: BufferId) -> Result<(), ComponentError> {
    let (a, b) = (buffers.stream(a)?, buffers.stream(b)?);
    if a.format() != b.format() || a.channels() != b.channels() {
        return Err(ComponentError::invalid_config(format!(
            "passthrough between {} x{} and {} x{}",
            a.format(),
            a.channels(),
            b.format(),
            b.channels()
        )));
    }
    Ok(())
}

/// Driver for [`CompType::Dsm`].
#[derive(Debug, Default)]
pub struct DsmDriver;

impl ComponentDriver for DsmDriver {
    fn comp_type(&self) -> CompType {
        CompType::Dsm
    }

    fn name(&self) -> &'static str {
        "dsm"
    }

    fn create(&self, config: &CompConfig) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(Dsm {
            feedback_id: feedback_buffer(config)?,
            io: None,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct DsmIo {
    source: BufferId,
    sink: BufferId,
    feedback: BufferId,
}

struct Dsm {
    feedback_id: BufferId,
    io: Option<DsmIo>,
}

impl Dsm {
    fn setup(&mut self, dev: &DevCore, buffers: &mut BufferArena) -> Result<(), ComponentError> {
        let period_bytes = period_bytes(dev)?;
        let sink = dev.first_sink()?;

        let size = period_bytes
            .checked_mul(dev.config().periods_sink as usize)
            .ok_or(ComponentError::OutOfMemory { bytes: usize::MAX })?;
        let stream = buffers.stream_mut(sink)?;
        if size > stream.capacity() {
            stream.resize(size)?;
            tracing::debug!(comp = %dev.id(), buffer = %sink, size, "sink resized");
        }

        let (source, feedback) = pick(dev, dev.sources(), self.feedback_id, "source")?;
        check_same_layout(buffers, source, sink)?;

        self.io = Some(DsmIo {
            source,
            sink,
            feedback,
        });
        Ok(())
    }
}

impl Component for Dsm {
    fn prepare(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<Status, ComponentError> {
        if begin_prepare(dev)? == Status::PathStop {
            return Ok(Status::PathStop);
        }
        self.setup(dev, buffers).map_err(|e| abort_prepare(dev, e))?;
        Ok(Status::Ok)
    }

    fn trigger(
        &mut self,
        dev: &mut DevCore,
        buffers: &mut BufferArena,
        trigger: Trigger,
    ) -> Result<Transition, ComponentError> {
        let transition = dev.set_state(trigger)?;

        if matches!(trigger, Trigger::Start | Trigger::Release) {
            if let Some(io) = self.io {
                buffers.stream_mut(io.feedback)?.zero();
            }
        }
        Ok(transition)
    }

    fn copy(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<CopyOutcome, ComponentError> {
        let Some(io) = self.io else {
            return Err(ComponentError::MissingBuffer {
                comp: dev.id(),
                role: "source",
            });
        };

        let limits = {
            let refs = buffers.split_io(&[io.source], &[io.sink])?;
            let (Some(source), Some(sink)) = (refs.sources[0], refs.sinks.into_iter().next().flatten()) else {
                return Err(ComponentError::UnknownBuffer { id: io.source });
            };

            let limits = CopyLimits::between(source, sink);
            if limits.frames == 0 {
                return Ok(stalled(source.avail_frames()));
            }
            copy_samples(source, sink, limits.source_bytes / source.sample_bytes())?;
            limits
        };

        buffers.stream_mut(io.sink)?.produce(limits.sink_bytes)?;
        buffers.stream_mut(io.source)?.consume(limits.source_bytes)?;

        let feedback = buffers.stream_mut(io.feedback)?;
        if feedback.avail() < limits.source_bytes {
            tracing::trace!(comp = %dev.id(), avail = feedback.avail(), "not enough data in feedback buffer");
        } else {
            tracing::trace!(comp = %dev.id(), bytes = limits.source_bytes, "processing feedback");
            feedback.consume(limits.source_bytes)?;
        }

        Ok(CopyOutcome::Processed {
            source_bytes: limits.source_bytes,
            sink_bytes: limits.sink_bytes,
        })
    }
}

/// Driver for [`CompType::DsmDemux`].
#[derive(Debug, Default)]
pub struct DsmDemuxDriver;

impl ComponentDriver for DsmDemuxDriver {
    fn comp_type(&self) -> CompType {
        CompType::DsmDemux
    }

    fn name(&self) -> &'static str {
        "dsm-demux"
    }

    fn create(&self, config: &CompConfig) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(DsmDemux {
            feedback_id: feedback_buffer(config)?,
            io: None,
        }))
    }
}

struct DsmDemux {
    feedback_id: BufferId,
    io: Option<DsmIo>,
}

impl DsmDemux {
    fn setup(&mut self, dev: &DevCore, buffers: &BufferArena) -> Result<(), ComponentError> {
        period_bytes(dev)?;

        let (sink, feedback) = pick(dev, dev.sinks(), self.feedback_id, "sink")?;
        let source = dev.first_source()?;
        check_same_layout(buffers, source, sink)?;
        check_same_layout(buffers, source, feedback)?;

        self.io = Some(DsmIo {
            source,
            sink,
            feedback,
        });
        Ok(())
    }
}

impl Component for DsmDemux {
    fn prepare(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<Status, ComponentError> {
        if begin_prepare(dev)? == Status::PathStop {
            return Ok(Status::PathStop);
        }
        self.setup(dev, buffers).map_err(|e| abort_prepare(dev, e))?;
        Ok(Status::Ok)
    }

    fn copy(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<CopyOutcome, ComponentError> {
        let Some(io) = self.io else {
            return Err(ComponentError::MissingBuffer {
                comp: dev.id(),
                role: "source",
            });
        };

        let refs = buffers.split_io(&[io.source], &[io.sink, io.feedback])?;
        let [Some(sink), Some(feedback), ..] = refs.sinks else {
            return Err(ComponentError::UnknownBuffer { id: io.sink });
        };
        let Some(source) = refs.sources[0] else {
            return Err(ComponentError::UnknownBuffer { id: io.source });
        };

        let source_frames = source.avail_frames();
        let frames = source_frames.min(sink.free_frames()).min(feedback.free_frames());
        if frames == 0 {
            return Ok(stalled(source_frames));
        }

        let bytes = frames * source.frame_bytes();
        let samples = bytes / source.sample_bytes();
        copy_samples(source, sink, samples)?;
        copy_samples(source, feedback, samples)?;
        sink.produce(bytes)?;
        feedback.produce(bytes)?;

        buffers.stream_mut(io.source)?.consume(bytes)?;

        tracing::trace!(comp = %dev.id(), frames, "dsm-demux copy");
        Ok(CopyOutcome::Processed {
            source_bytes: bytes,
            sink_bytes: bytes,
        })
    }
}
