//! Shared fixtures for driver tests.

use crate::component::registry::DriverRegistry;
use crate::component::{ComponentDev, CopyOutcome, Trigger};
use crate::config::{CompConfig, DriverParams};
use crate::format::{Sample, SampleFormat};
use crate::id::{BufferId, CompId, CompType};
use crate::pipeline::{BufferArena, Endpoint, StreamParams};

/// One component wired to buffers it owns exclusively.
pub(crate) struct Rig {
    pub buffers: BufferArena,
    pub dev: ComponentDev,
}

impl Rig {
    pub fn new(comp_type: CompType, params: DriverParams) -> Self {
        Self::with_config(CompConfig::new(CompId::new(1), comp_type).with_params(params))
    }

    pub fn with_config(config: CompConfig) -> Self {
        let registry = DriverRegistry::new();
        super::register_builtin(&registry);
        Self {
            buffers: BufferArena::new(),
            dev: registry.comp_new(&config).unwrap(),
        }
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint {
            comp: self.dev.id(),
            comp_type: self.dev.core().comp_type(),
        }
    }

    fn add(&mut self, capacity: usize, format: SampleFormat, channels: u16) -> BufferId {
        let params = StreamParams {
            frame_fmt: format,
            channels,
            ..StreamParams::default()
        };
        self.buffers.add(capacity, &params).unwrap()
    }

    pub fn source(&mut self, capacity: usize, format: SampleFormat, channels: u16) -> BufferId {
        self.source_from(capacity, format, channels, CompType::Other(0))
    }

    pub fn source_from(
        &mut self,
        capacity: usize,
        format: SampleFormat,
        channels: u16,
        producer: CompType,
    ) -> BufferId {
        let id = self.add(capacity, format, channels);
        let endpoint = self.endpoint();
        self.buffers
            .set_producer(
                id,
                Endpoint {
                    comp: CompId::new(100),
                    comp_type: producer,
                },
            )
            .unwrap();
        self.buffers.set_consumer(id, endpoint).unwrap();
        self.dev.core_mut().add_source(id);
        id
    }

    pub fn sink(&mut self, capacity: usize, format: SampleFormat, channels: u16) -> BufferId {
        let id = self.add(capacity, format, channels);
        let endpoint = self.endpoint();
        self.buffers.set_producer(id, endpoint).unwrap();
        self.dev.core_mut().add_sink(id);
        id
    }

    pub fn params(&mut self, params: &StreamParams) {
        self.dev.params(&mut self.buffers, params).unwrap();
    }

    pub fn start(&mut self) {
        self.dev.prepare(&mut self.buffers).unwrap();
        self.dev.trigger(&mut self.buffers, Trigger::Start).unwrap();
    }

    pub fn copy(&mut self) -> CopyOutcome {
        self.dev.copy(&mut self.buffers).unwrap()
    }

    pub fn write<S: Sample>(&mut self, id: BufferId, samples: &[S]) {
        self.buffers.stream_mut(id).unwrap().write_samples(samples).unwrap();
    }

    pub fn read<S: Sample>(&mut self, id: BufferId, count: usize) -> Vec<S> {
        self.buffers.stream_mut(id).unwrap().read_samples(count).unwrap()
    }
}
