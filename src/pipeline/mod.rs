//! Stream storage, channel routing and the pipeline that ties components
//! to buffers.
//!
//! ```text
//!  host ──▶ [buf0] ──▶ comp1 ──▶ [buf1] ──▶ comp2 ──▶ [buf2] ──▶ DAI
//! ```
//!
//! - **Ring buffer**: byte ring with read/write cursors and wrap-safe copy
//! - **Buffer arena**: owns every buffer; components hold [`BufferId`]s
//! - **Routing**: per-output-channel tables built from mux masks
//! - **Router**: executes those tables across one or many streams
//!
//! [`Pipeline`] owns the arena and the devices, walks them on every tick and
//! services the IPC mailbox between ticks.

mod buffer;
pub mod ring_buffer;
pub mod router;
mod routing;

pub use buffer::{
    BufferArena, BufferFormat, BufferGuard, CompBuffer, Endpoint, IoRefs, ParamFlags, StreamParams,
};
pub use ring_buffer::{AudioStream, CopyLimits};
pub use routing::{RouteEntry, RoutingTable};

use crate::component::model::ControlCmd;
use crate::component::registry::DriverRegistry;
use crate::component::{ComponentDev, CopyOutcome, DeviceSnapshot, Transition, Trigger};
use crate::config::CompConfig;
use crate::event::{event_callback, ComponentEvent, EventCallback};
use crate::id::{BufferId, CompId};
use crate::ipc::{DspPort, IpcReply, IpcRequest};
use crate::shared::SharedReader;
use crate::ComponentError;

/// Components and the buffers connecting them.
///
/// Devices are walked in the order they were added, which is expected to
/// follow the data flow from host to DAI (or DAI to host for capture).
///
/// # Example
///
/// ```
/// use pcm_pipeline::{CompConfig, CompId, CompType, DriverParams, Pipeline, ProcessConfig};
/// use pcm_pipeline::{DriverRegistry, StreamParams, register_builtin};
///
/// static REGISTRY: DriverRegistry = DriverRegistry::new();
/// register_builtin(&REGISTRY);
///
/// let mut pipeline = Pipeline::with_registry(&REGISTRY);
/// let comp = pipeline
///     .add_component(&CompConfig::new(CompId::new(1), CompType::ProcessingModule)
///         .with_params(DriverParams::Process(ProcessConfig { ibs: 4, obs: 4, initial_model: None })))
///     .unwrap();
///
/// let params = StreamParams::default();
/// let input = pipeline.add_buffer(64, &params).unwrap();
/// let output = pipeline.add_buffer(64, &params).unwrap();
/// pipeline.connect(None, input, Some(comp)).unwrap();
/// pipeline.connect(Some(comp), output, None).unwrap();
///
/// pipeline.params(comp, &params).unwrap();
/// pipeline.prepare(comp).unwrap();
/// ```
pub struct Pipeline {
    registry: &'static DriverRegistry,
    buffers: BufferArena,
    devices: Vec<ComponentDev>,
    event_callback: Option<EventCallback>,
}

impl Pipeline {
    /// Creates an empty pipeline using the firmware-wide driver registry.
    pub fn new() -> Self {
        Self::with_registry(DriverRegistry::global())
    }

    /// Creates an empty pipeline using `registry` to look up drivers.
    pub fn with_registry(registry: &'static DriverRegistry) -> Self {
        Self {
            registry,
            buffers: BufferArena::new(),
            devices: Vec::new(),
            event_callback: None,
        }
    }

    /// Set a callback to receive lifecycle events.
    pub fn on_event<F>(&mut self, callback: F)
    where
        F: Fn(ComponentEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
    }

    /// Creates a component and appends it to the walk order.
    pub fn add_component(&mut self, config: &CompConfig) -> Result<CompId, ComponentError> {
        if self.position(config.id).is_some() {
            tracing::error!(comp = %config.id, "component id already in use");
            return Err(ComponentError::invalid_config(format!(
                "{} already exists",
                config.id
            )));
        }

        let dev = self.registry.comp_new(config)?;
        self.devices.push(dev);
        Ok(config.id)
    }

    /// Allocates a buffer of `capacity` bytes.
    pub fn add_buffer(
        &mut self,
        capacity: usize,
        params: &StreamParams,
    ) -> Result<BufferId, ComponentError> {
        self.buffers.add(capacity, params)
    }

    /// Links `buffer` between an upstream and a downstream component.
    ///
    /// `None` on either side leaves that end to the host or the DAI. The
    /// buffer becomes the next sink of `producer` and the next source of
    /// `consumer`.
    pub fn connect(
        &mut self,
        producer: Option<CompId>,
        buffer: BufferId,
        consumer: Option<CompId>,
    ) -> Result<(), ComponentError> {
        self.buffers.get(buffer)?;
        let producer_idx = producer.map(|id| self.index(id)).transpose()?;
        let consumer_idx = consumer.map(|id| self.index(id)).transpose()?;

        if let Some(idx) = producer_idx {
            let endpoint = endpoint_of(&self.devices[idx]);
            self.buffers.set_producer(buffer, endpoint)?;
            self.devices[idx].core_mut().add_sink(buffer);
        }
        if let Some(idx) = consumer_idx {
            let endpoint = endpoint_of(&self.devices[idx]);
            self.buffers.set_consumer(buffer, endpoint)?;
            self.devices[idx].core_mut().add_source(buffer);
        }

        tracing::debug!(%buffer, ?producer, ?consumer, "buffer connected");
        Ok(())
    }

    /// Unlinks a buffer from every component and releases it.
    pub fn remove_buffer(&mut self, buffer: BufferId) -> Result<(), ComponentError> {
        self.buffers.remove(buffer)?;
        for dev in &mut self.devices {
            dev.core_mut().remove_buffer(buffer);
        }
        Ok(())
    }

    /// Looks up a component.
    pub fn component(&self, id: CompId) -> Result<&ComponentDev, ComponentError> {
        self.index(id).map(|idx| &self.devices[idx])
    }

    /// Looks up a component for modification.
    pub fn component_mut(&mut self, id: CompId) -> Result<&mut ComponentDev, ComponentError> {
        let idx = self.index(id)?;
        Ok(&mut self.devices[idx])
    }

    /// Component ids in walk order.
    pub fn components(&self) -> impl Iterator<Item = CompId> + '_ {
        self.devices.iter().map(ComponentDev::id)
    }

    /// The buffer arena.
    pub fn buffers(&self) -> &BufferArena {
        &self.buffers
    }

    /// The buffer arena, for host-side reads and writes.
    pub fn buffers_mut(&mut self) -> &mut BufferArena {
        &mut self.buffers
    }

    /// Negotiates stream parameters for one component.
    pub fn params(&mut self, comp: CompId, params: &StreamParams) -> Result<(), ComponentError> {
        let idx = self.index(comp)?;
        self.devices[idx].params(&mut self.buffers, params)
    }

    /// Prepares one component.
    pub fn prepare(&mut self, comp: CompId) -> Result<Transition, ComponentError> {
        self.trigger(comp, Trigger::Prepare)
    }

    /// Applies a lifecycle trigger to one component.
    ///
    /// `Prepare` runs the driver's prepare and `Reset` its reset, so buffers
    /// are sized and per-stream state is dropped on the way.
    pub fn trigger(&mut self, comp: CompId, trigger: Trigger) -> Result<Transition, ComponentError> {
        let idx = self.index(comp)?;
        let dev = &mut self.devices[idx];
        let from = dev.state();

        let result = match trigger {
            Trigger::Prepare => dev.prepare(&mut self.buffers).map(|_| ()),
            Trigger::Reset => dev.reset(&mut self.buffers),
            _ => dev.trigger(&mut self.buffers, trigger).map(|_| ()),
        };
        let to = dev.state();

        if from != to {
            self.emit(ComponentEvent::StateChanged { comp, from, to });
        }
        if trigger == Trigger::Xrun && result.is_ok() {
            self.emit(ComponentEvent::Xrun { comp });
        }

        result.map(|()| {
            if from == to {
                Transition::AlreadySet
            } else {
                Transition::Changed { from, to }
            }
        })
    }

    /// Runs one tick of a single component.
    pub fn copy(&mut self, comp: CompId) -> Result<CopyOutcome, ComponentError> {
        let idx = self.index(comp)?;
        self.devices[idx].copy(&mut self.buffers)
    }

    /// Runs one tick of every component in walk order.
    ///
    /// A component whose copy fails is recovered with an `Xrun` trigger and
    /// left out of the returned outcomes; the walk continues with the next
    /// component.
    pub fn tick(&mut self) -> Vec<(CompId, CopyOutcome)> {
        let mut outcomes = Vec::with_capacity(self.devices.len());
        let mut failed = Vec::new();

        for dev in &mut self.devices {
            match dev.copy(&mut self.buffers) {
                Ok(outcome) => outcomes.push((dev.id(), outcome)),
                Err(e) => {
                    tracing::error!(comp = %dev.id(), error = %e, "copy failed");
                    failed.push(dev.id());
                }
            }
        }

        for comp in failed {
            if let Err(e) = self.trigger(comp, Trigger::Xrun) {
                tracing::error!(%comp, error = %e, "xrun recovery failed");
            }
        }

        outcomes
    }

    /// Resets one component to `Ready`.
    pub fn reset(&mut self, comp: CompId) -> Result<(), ComponentError> {
        self.trigger(comp, Trigger::Reset).map(|_| ())
    }

    /// Delivers a control command to one component.
    pub fn cmd(&mut self, comp: CompId, cmd: ControlCmd<'_>) -> Result<(), ComponentError> {
        let idx = self.index(comp)?;
        self.devices[idx].cmd(cmd)
    }

    /// Publishes a component for other contexts.
    pub fn make_shared(&mut self, comp: CompId) -> Result<SharedReader<DeviceSnapshot>, ComponentError> {
        let idx = self.index(comp)?;
        Ok(self.devices[idx].make_shared())
    }

    /// Removes a component and releases its driver resources.
    ///
    /// Buffers stay in the arena with the component's endpoints cleared; the
    /// component disappears from the walk.
    pub fn free(&mut self, comp: CompId) -> Result<(), ComponentError> {
        let idx = self.index(comp)?;
        let dev = self.devices.remove(idx);
        dev.free();
        self.buffers.detach(comp);
        tracing::info!(%comp, "component removed");
        Ok(())
    }

    /// Handles queued host requests while the reply ring has room.
    ///
    /// Returns the number of requests serviced.
    pub fn service_ipc(&mut self, port: &mut DspPort) -> usize {
        let mut serviced = 0;

        while port.can_reply() {
            let Some(request) = port.recv() else {
                break;
            };
            let reply = self.handle_request(request);
            if let Err(reply) = port.reply(reply) {
                tracing::error!(comp = %reply.comp, "reply ring full, reply dropped");
            }
            serviced += 1;
        }

        serviced
    }

    fn handle_request(&mut self, request: IpcRequest) -> IpcReply {
        let comp = request.comp();
        tracing::debug!(%comp, ?request, "ipc request");

        let result = match request {
            IpcRequest::Trigger { trigger, .. } => self.trigger(comp, trigger).map(|_| None),
            IpcRequest::SetData { fragment, .. } => {
                self.cmd(comp, ControlCmd::SetData(&fragment)).map(|()| None)
            }
            IpcRequest::GetData {
                mut fragment,
                max_size,
                ..
            } => self
                .cmd(
                    comp,
                    ControlCmd::GetData {
                        fragment: &mut fragment,
                        max_size,
                    },
                )
                .map(|()| Some(fragment)),
        };

        match result {
            Ok(fragment) => IpcReply {
                fragment,
                ..IpcReply::ok(comp)
            },
            Err(e) => {
                tracing::error!(%comp, error = %e, "ipc request failed");
                IpcReply::error(comp, e.code())
            }
        }
    }

    fn position(&self, id: CompId) -> Option<usize> {
        self.devices.iter().position(|dev| dev.id() == id)
    }

    fn index(&self, id: CompId) -> Result<usize, ComponentError> {
        self.position(id)
            .ok_or(ComponentError::UnknownComponent { id })
    }

    fn emit(&self, event: ComponentEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("devices", &self.devices)
            .field("buffers", &self.buffers.len())
            .field("event_callback", &self.event_callback.is_some())
            .finish_non_exhaustive()
    }
}

fn endpoint_of(dev: &ComponentDev) -> Endpoint {
    Endpoint {
        comp: dev.id(),
        comp_type: dev.core().comp_type(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::component::model::ControlFragment;
    use crate::component::CompState;
    use crate::config::{DriverParams, ProcessConfig};
    use crate::drivers::register_builtin;
    use crate::id::CompType;
    use crate::ipc::ipc_channel;
    use crate::ErrorCode;

    static REGISTRY: DriverRegistry = DriverRegistry::new();

    fn registry() -> &'static DriverRegistry {
        if REGISTRY.is_empty() {
            register_builtin(&REGISTRY);
        }
        &REGISTRY
    }

    fn process_config(id: u32) -> CompConfig {
        CompConfig::new(CompId::new(id), CompType::ProcessingModule).with_params(
            DriverParams::Process(ProcessConfig {
                ibs: 4,
                obs: 4,
                initial_model: None,
            }),
        )
    }

    /// host → buf0 → comp1 → buf1 → DAI
    fn single_stage() -> (Pipeline, CompId, BufferId, BufferId) {
        let mut pipeline = Pipeline::with_registry(registry());
        let comp = pipeline.add_component(&process_config(1)).unwrap();
        let params = StreamParams::default();
        let input = pipeline.add_buffer(64, &params).unwrap();
        let output = pipeline.add_buffer(64, &params).unwrap();
        pipeline.connect(None, input, Some(comp)).unwrap();
        pipeline.connect(Some(comp), output, None).unwrap();
        (pipeline, comp, input, output)
    }

    #[test]
    fn test_connect_builds_buffer_lists() {
        let (pipeline, comp, input, output) = single_stage();
        let dev = pipeline.component(comp).unwrap();
        assert_eq!(dev.core().sources(), &[input]);
        assert_eq!(dev.core().sinks(), &[output]);

        let out = pipeline.buffers().get(output).unwrap();
        assert_eq!(out.producer().unwrap().comp, comp);
        assert!(out.consumer().is_none());
    }

    #[test]
    fn test_unknown_component() {
        let (mut pipeline, _, _, _) = single_stage();
        assert_eq!(
            pipeline.trigger(CompId::new(99), Trigger::Start),
            Err(ComponentError::UnknownComponent { id: CompId::new(99) })
        );
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let (mut pipeline, _, _, _) = single_stage();
        assert!(matches!(
            pipeline.add_component(&process_config(1)),
            Err(ComponentError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_lifecycle_emits_events() {
        let (mut pipeline, comp, _, _) = single_stage();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        pipeline.on_event(move |e| sink.lock().unwrap().push(e));

        pipeline.params(comp, &StreamParams::default()).unwrap();
        pipeline.prepare(comp).unwrap();
        pipeline.trigger(comp, Trigger::Start).unwrap();
        assert_eq!(
            pipeline.trigger(comp, Trigger::Start).unwrap(),
            Transition::AlreadySet
        );
        pipeline.trigger(comp, Trigger::Xrun).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                ComponentEvent::StateChanged {
                    comp,
                    from: CompState::Ready,
                    to: CompState::Prepare
                },
                ComponentEvent::StateChanged {
                    comp,
                    from: CompState::Prepare,
                    to: CompState::Active
                },
                ComponentEvent::StateChanged {
                    comp,
                    from: CompState::Active,
                    to: CompState::Ready
                },
                ComponentEvent::Xrun { comp },
            ]
        );
    }

    #[test]
    fn test_remove_buffer_unlinks_devices() {
        let (mut pipeline, comp, input, _) = single_stage();
        pipeline.remove_buffer(input).unwrap();
        assert!(pipeline.component(comp).unwrap().core().sources().is_empty());
        assert!(pipeline.buffers().get(input).is_err());
    }

    #[test]
    fn test_free_removes_component() {
        let (mut pipeline, comp, input, output) = single_stage();
        pipeline.free(comp).unwrap();
        assert_eq!(pipeline.components().count(), 0);
        assert!(pipeline.component(comp).is_err());
        assert!(pipeline.buffers().get(input).unwrap().consumer().is_none());
        assert!(pipeline.buffers().get(output).unwrap().producer().is_none());
    }

    #[test]
    fn test_service_ipc_replies_in_order() {
        let (mut pipeline, comp, _, _) = single_stage();
        pipeline.params(comp, &StreamParams::default()).unwrap();
        let (mut host, mut dsp) = ipc_channel(4);

        host.send(IpcRequest::Trigger {
            comp,
            trigger: Trigger::Start,
        })
        .unwrap();
        host.send(IpcRequest::Trigger {
            comp,
            trigger: Trigger::Prepare,
        })
        .unwrap();
        host.send(IpcRequest::Trigger {
            comp: CompId::new(42),
            trigger: Trigger::Prepare,
        })
        .unwrap();

        assert_eq!(pipeline.service_ipc(&mut dsp), 3);
        assert_eq!(host.recv().unwrap().result, Err(ErrorCode::InvalidArgument));
        assert_eq!(host.recv().unwrap().result, Ok(()));
        assert_eq!(host.recv().unwrap().result, Err(ErrorCode::InvalidArgument));
        assert_eq!(pipeline.component(comp).unwrap().state(), CompState::Prepare);
    }

    #[test]
    fn test_service_ipc_model_round_trip() {
        let (mut pipeline, comp, _, _) = single_stage();
        let (mut host, mut dsp) = ipc_channel(8);
        let blob: Vec<u8> = (0..6).collect();

        for fragment in ControlFragment::split(&blob, 4) {
            host.send(IpcRequest::SetData { comp, fragment }).unwrap();
        }
        host.send(IpcRequest::GetData {
            comp,
            fragment: ControlFragment::read_request(0, 6, 0),
            max_size: 64,
        })
        .unwrap();

        assert_eq!(pipeline.service_ipc(&mut dsp), 3);
        assert_eq!(host.recv().unwrap().result, Ok(()));
        assert_eq!(host.recv().unwrap().result, Ok(()));
        let reply = host.recv().unwrap();
        assert_eq!(reply.result, Ok(()));
        assert_eq!(reply.fragment.unwrap().data.data, blob);
    }

    #[test]
    fn test_service_ipc_stops_when_reply_ring_full() {
        let (mut pipeline, comp, _, _) = single_stage();
        let (mut host, mut dsp) = ipc_channel(1);
        host.send(IpcRequest::Trigger {
            comp,
            trigger: Trigger::Reset,
        })
        .unwrap();

        assert_eq!(pipeline.service_ipc(&mut dsp), 1);
        host.send(IpcRequest::Trigger {
            comp,
            trigger: Trigger::Reset,
        })
        .unwrap();
        // previous reply not collected yet
        assert_eq!(pipeline.service_ipc(&mut dsp), 0);
        assert_eq!(dsp.pending(), 1);
    }

    #[test]
    fn test_tick_skips_idle_and_recovers_failures() {
        let (mut pipeline, comp, input, _) = single_stage();
        assert_eq!(pipeline.tick(), vec![(comp, CopyOutcome::Idle)]);

        pipeline.params(comp, &StreamParams::default()).unwrap();
        pipeline.prepare(comp).unwrap();
        pipeline.trigger(comp, Trigger::Start).unwrap();
        assert_eq!(pipeline.tick(), vec![(comp, CopyOutcome::Preloading)]);

        pipeline.remove_buffer(input).unwrap();
        assert!(pipeline.tick().is_empty());
        assert_eq!(pipeline.component(comp).unwrap().state(), CompState::Ready);
    }
}
