//! Generic block-processing module.
//!
//! Moves at most one input block per tick once the source holds two blocks
//! (ping-pong preload). Block sizes are counted in samples.

use crate::component::model::{ControlCmd, ModelHandler};
use crate::component::{Component, ComponentDriver, CopyOutcome, DevCore, Status};
use crate::config::{CompConfig, DriverParams, ProcessConfig, PING_PONG_PERIODS};
use crate::id::{BufferId, CompType};
use crate::pipeline::ring_buffer::copy_samples;
use crate::pipeline::BufferArena;
use crate::ComponentError;

use super::{abort_prepare, begin_prepare};

/// Driver for [`CompType::ProcessingModule`].
#[derive(Debug, Default)]
pub struct ProcessingDriver;

impl ComponentDriver for ProcessingDriver {
    fn comp_type(&self) -> CompType {
        CompType::ProcessingModule
    }

    fn name(&self) -> &'static str {
        "processing-module"
    }

    fn create(&self, config: &CompConfig) -> Result<Box<dyn Component>, ComponentError> {
        let DriverParams::Process(process) = &config.params else {
            return Err(ComponentError::invalid_config(
                "processing module needs block sizes",
            ));
        };
        if process.ibs == 0 || process.obs == 0 {
            return Err(ComponentError::invalid_config(format!(
                "block sizes must be non-zero (ibs {}, obs {})",
                process.ibs, process.obs
            )));
        }

        let mut model = ModelHandler::new();
        if let Some(initial) = &process.initial_model {
            model.alloc(initial.len(), Some(initial))?;
        }

        Ok(Box::new(Processing {
            blocks: process.clone(),
            preload: true,
            model,
        }))
    }
}

struct Processing {
    blocks: ProcessConfig,
    preload: bool,
    model: ModelHandler,
}

impl Processing {
    fn ibs(&self) -> usize {
        self.blocks.ibs as usize
    }

    fn obs(&self) -> usize {
        self.blocks.obs as usize
    }

    /// Grows `id` to hold two blocks of `block` samples when it is smaller.
    fn ensure_ping_pong(
        dev: &DevCore,
        buffers: &mut BufferArena,
        id: BufferId,
        block: usize,
    ) -> Result<(), ComponentError> {
        let stream = buffers.stream_mut(id)?;
        let required = block * stream.sample_bytes() * PING_PONG_PERIODS;

        if required > stream.capacity() {
            stream.resize(required)?;
            tracing::debug!(comp = %dev.id(), buffer = %id, size = required, "buffer resized");
        }
        Ok(())
    }

    fn setup(&mut self, dev: &DevCore, buffers: &mut BufferArena) -> Result<(), ComponentError> {
        let source = dev.first_source()?;
        let sink = dev.first_sink()?;

        Self::ensure_ping_pong(dev, buffers, source, self.ibs())?;
        Self::ensure_ping_pong(dev, buffers, sink, self.obs())?;

        self.preload = true;
        if self.model.apply_pending() {
            tracing::info!(comp = %dev.id(), crc = self.model.crc(), "new model applied");
        }
        Ok(())
    }
}

impl Component for Processing {
    fn prepare(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<Status, ComponentError> {
        if begin_prepare(dev)? == Status::PathStop {
            return Ok(Status::PathStop);
        }
        self.setup(dev, buffers).map_err(|e| abort_prepare(dev, e))?;
        Ok(Status::Ok)
    }

    fn copy(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<CopyOutcome, ComponentError> {
        let source_id = dev.first_source()?;
        let sink_id = dev.first_sink()?;

        let bytes = {
            let io = buffers.split_io(&[source_id], &[sink_id])?;
            let (Some(source), Some(sink)) = (io.sources[0], io.sinks.into_iter().next().flatten()) else {
                return Err(ComponentError::UnknownBuffer { id: source_id });
            };

            let isa = source.avail_samples();
            if self.preload && isa < self.ibs() * PING_PONG_PERIODS {
                tracing::trace!(comp = %dev.id(), isa, "preloading");
                return Ok(CopyOutcome::Preloading);
            }
            self.preload = false;

            let osa = sink.free_samples();
            if osa < self.obs() {
                tracing::trace!(comp = %dev.id(), osa, obs = self.obs(), "not enough output space");
                return Ok(CopyOutcome::NoSpace);
            }
            if isa < self.ibs() {
                tracing::trace!(comp = %dev.id(), isa, ibs = self.ibs(), "not enough input");
                return Ok(CopyOutcome::NoInput);
            }

            let samples = isa.min(osa).min(self.ibs());
            copy_samples(source, sink, samples)?
        };

        buffers.stream_mut(sink_id)?.produce(bytes)?;
        buffers.stream_mut(source_id)?.consume(bytes)?;

        tracing::trace!(comp = %dev.id(), bytes, "processed block");
        Ok(CopyOutcome::Processed {
            source_bytes: bytes,
            sink_bytes: bytes,
        })
    }

    fn reset(&mut self, dev: &mut DevCore, _buffers: &mut BufferArena) -> Result<(), ComponentError> {
        self.preload = true;
        dev.set_state(crate::component::Trigger::Reset).map(|_| ())
    }

    fn cmd(&mut self, dev: &mut DevCore, cmd: ControlCmd<'_>) -> Result<(), ComponentError> {
        match cmd {
            ControlCmd::SetData(fragment) => self.model.set_cmd(dev.state(), fragment),
            ControlCmd::GetData { fragment, max_size } => self.model.get_cmd(fragment, max_size),
        }
    }

    fn free(&mut self, dev: &mut DevCore) {
        self.model.free();
        tracing::info!(comp = %dev.id(), "processing module freed");
    }
}
