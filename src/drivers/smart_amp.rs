//! Smart amplifier stage.
//!
//! Fans each input channel out to `out / in` adjacent output channels and
//! drains the speaker feedback stream delivered by an upstream demux.

use crate::component::model::{ControlCmd, ModelHandler};
use crate::component::params::verify_params;
use crate::component::{Component, ComponentDriver, CopyOutcome, DevCore, Status, Transition, Trigger};
use crate::config::{CompConfig, DriverParams};
use crate::format::{Sample, SampleFormat, SampleWidth};
use crate::id::{BufferId, CompType};
use crate::pipeline::ring_buffer::{avail_frames, AudioStream};
use crate::pipeline::{BufferArena, ParamFlags, StreamParams};
use crate::ComponentError;

use super::{abort_prepare, begin_prepare, stalled};

/// Channel count forced onto the feedback stream.
const FEEDBACK_CHANNELS: u16 = 8;

/// Driver for [`CompType::SmartAmp`].
#[derive(Debug, Default)]
pub struct SmartAmpDriver;

impl ComponentDriver for SmartAmpDriver {
    fn comp_type(&self) -> CompType {
        CompType::SmartAmp
    }

    fn name(&self) -> &'static str {
        "smart-amp"
    }

    fn create(&self, config: &CompConfig) -> Result<Box<dyn Component>, ComponentError> {
        let mut model = ModelHandler::new();
        match &config.params {
            DriverParams::None => {}
            DriverParams::Process(process) => {
                if let Some(initial) = &process.initial_model {
                    model.alloc(initial.len(), Some(initial))?;
                }
            }
            other => {
                return Err(ComponentError::invalid_config(format!(
                    "smart-amp does not take {other:?}"
                )));
            }
        }

        Ok(Box::new(SmartAmp {
            in_channels: 2,
            out_channels: 4,
            source: None,
            sink: None,
            feedback: None,
            model,
        }))
    }
}

struct SmartAmp {
    in_channels: usize,
    out_channels: usize,
    source: Option<BufferId>,
    sink: Option<BufferId>,
    feedback: Option<BufferId>,
    model: ModelHandler,
}

impl SmartAmp {
    fn setup(&mut self, dev: &DevCore, buffers: &mut BufferArena) -> Result<(), ComponentError> {
        let mut source = None;
        let mut feedback = None;
        for &id in dev.sources() {
            let from_demux = buffers
                .get(id)?
                .producer()
                .is_some_and(|p| matches!(p.comp_type, CompType::Demux | CompType::DsmDemux));
            if from_demux {
                feedback = Some(id);
            } else {
                source = Some(id);
            }
        }

        let source = source.ok_or(ComponentError::MissingBuffer {
            comp: dev.id(),
            role: "source",
        })?;
        let sink = dev.first_sink()?;

        let in_channels = usize::from(buffers.stream(source)?.channels());
        let out_channels = usize::from(buffers.stream(sink)?.channels());
        if out_channels % in_channels != 0 {
            return Err(ComponentError::invalid_config(format!(
                "cannot spread {in_channels} channels over {out_channels}"
            )));
        }

        if let Some(id) = feedback {
            let mut buffer = buffers.get_mut(id)?.lock();
            let params = StreamParams {
                frame_fmt: SampleFormat::S32Le,
                channels: FEEDBACK_CHANNELS,
                ..buffer.params()
            };
            buffer.set_params(&params, true)?;
        }

        self.in_channels = in_channels;
        self.out_channels = out_channels;
        self.source = Some(source);
        self.sink = Some(sink);
        self.feedback = feedback;

        if self.model.apply_pending() {
            tracing::info!(comp = %dev.id(), crc = self.model.crc(), "new model applied");
        }
        Ok(())
    }

    fn spread<S: Sample>(&self, source: &AudioStream, sink: &mut AudioStream, frames: usize) {
        let scale = self.out_channels / self.in_channels;
        let mut out_idx = 0;

        for in_idx in 0..frames * self.in_channels {
            let sample = source.read_frag::<S>(in_idx);
            for _ in 0..scale {
                sink.write_frag(out_idx, sample);
                out_idx += 1;
            }
        }
    }
}

impl Component for SmartAmp {
    fn params(
        &mut self,
        dev: &mut DevCore,
        buffers: &mut BufferArena,
        params: &StreamParams,
    ) -> Result<(), ComponentError> {
        verify_params(dev, buffers, ParamFlags::CHANNELS, Some(params)).inspect_err(|e| {
            tracing::error!(comp = %dev.id(), error = %e, "pcm params verification failed");
        })
    }

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
            if let Some(feedback) = self.feedback {
                buffers.stream_mut(feedback)?.zero();
            }
        }
        Ok(transition)
    }

    fn copy(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<CopyOutcome, ComponentError> {
        let (Some(source_id), Some(sink_id)) = (self.source, self.sink) else {
            return Err(ComponentError::MissingBuffer {
                comp: dev.id(),
                role: "source",
            });
        };

        let (source_bytes, sink_bytes) = {
            let io = buffers.split_io(&[source_id], &[sink_id])?;
            let (Some(source), Some(sink)) = (io.sources[0], io.sinks.into_iter().next().flatten()) else {
                return Err(ComponentError::UnknownBuffer { id: source_id });
            };

            let frames = avail_frames(source, sink);
            if frames == 0 {
                return Ok(stalled(source.avail_frames()));
            }
            if source.sample_bytes() != sink.sample_bytes() {
                return Err(ComponentError::UnsupportedFormat {
                    format: sink.format(),
                });
            }

            match source.format().copy_width() {
                Some(SampleWidth::Narrow) => self.spread::<i16>(source, sink, frames),
                Some(SampleWidth::Wide) => self.spread::<i32>(source, sink, frames),
                None => {
                    tracing::error!(comp = %dev.id(), format = %source.format(), "not supported frame format");
                    return Err(ComponentError::UnsupportedFormat {
                        format: source.format(),
                    });
                }
            }

            (frames * source.frame_bytes(), frames * sink.frame_bytes())
        };

        buffers.stream_mut(sink_id)?.produce(sink_bytes)?;
        buffers.stream_mut(source_id)?.consume(source_bytes)?;

        if let Some(feedback) = self.feedback {
            let stream = buffers.stream_mut(feedback)?;
            let avail = stream.avail();
            tracing::trace!(comp = %dev.id(), bytes = avail, "processing feedback");
            stream.consume(avail)?;
        }

        Ok(CopyOutcome::Processed {
            source_bytes,
            sink_bytes,
        })
    }

    fn cmd(&mut self, dev: &mut DevCore, cmd: ControlCmd<'_>) -> Result<(), ComponentError> {
        match cmd {
            ControlCmd::SetData(fragment) => self.model.set_cmd(dev.state(), fragment),
            ControlCmd::GetData { fragment, max_size } => self.model.get_cmd(fragment, max_size),
        }
    }

    fn free(&mut self, dev: &mut DevCore) {
        self.model.free();
        tracing::info!(comp = %dev.id(), "smart-amp freed");
    }
}
