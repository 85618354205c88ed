//! Component lifecycle and the device model.
//!
//! A component is a driver-provided [`Component`] implementation bound to a
//! [`DevCore`] holding everything the engine tracks for it: identity, state,
//! buffer lists and period parameters. The pair is a [`ComponentDev`].
//!
//! ```text
//!              PREPARE            START
//!   READY ─────────────▶ PREPARE ───────▶ ACTIVE ◀──┐
//!     ▲                     ▲      STOP     │       │ RELEASE
//!     │ RESET / XRUN        └───────────────┤ PAUSE │
//!     └── (from any state)        STOP      ▼       │
//!                           ◀──────────── PAUSED ───┘
//! ```

pub mod model;
pub mod params;
pub mod registry;

use std::fmt;

use crate::config::{CompConfig, Direction};
use crate::id::{BufferId, CompId, CompType};
use crate::pipeline::{BufferArena, ParamFlags, StreamParams};
use crate::shared::{SharedReader, SharedRecord};
use crate::ComponentError;

use self::model::ControlCmd;

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompState {
    /// Created or reset; buffers may be undefined.
    #[default]
    Ready,
    /// Parameters applied and buffers sized.
    Prepare,
    /// Processing on every tick.
    Active,
    /// Temporarily not processing.
    Paused,
}

impl fmt::Display for CompState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Prepare => "prepare",
            Self::Active => "active",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Lifecycle command sent by the trigger dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Begin processing.
    Start,
    /// Stop processing and return to prepared.
    Stop,
    /// Suspend processing.
    Pause,
    /// Resume after a pause.
    Release,
    /// Return to ready from anywhere.
    Reset,
    /// Apply parameters and size buffers.
    Prepare,
    /// Under/overrun recovery; returns to ready.
    Xrun,
}

impl Trigger {
    /// State this trigger moves a component to.
    pub const fn target(self) -> CompState {
        match self {
            Self::Start | Self::Release => CompState::Active,
            Self::Stop | Self::Prepare => CompState::Prepare,
            Self::Pause => CompState::Paused,
            Self::Reset | Self::Xrun => CompState::Ready,
        }
    }
}

/// Result of a successful state change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state moved.
    Changed {
        /// State before the trigger.
        from: CompState,
        /// State after the trigger.
        to: CompState,
    },
    /// The component was already in the target state.
    AlreadySet,
}

/// Status of an operation that may halt work on its pipeline path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Continue with the next component.
    Ok,
    /// Nothing to do on this path; stop walking it.
    PathStop,
}

impl From<Transition> for Status {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Changed { .. } => Self::Ok,
            Transition::AlreadySet => Self::PathStop,
        }
    }
}

/// Computes the transition for `trigger` from `state`.
///
/// A trigger whose target equals the current state is [`Transition::AlreadySet`]
/// regardless of the table below. `Reset` and `Xrun` are accepted from any
/// state; every other trigger is only valid from its listed origins.
pub fn next_state(state: CompState, trigger: Trigger) -> Result<Transition, ComponentError> {
    let target = trigger.target();
    if state == target {
        return Ok(Transition::AlreadySet);
    }

    let allowed = match trigger {
        Trigger::Prepare => state == CompState::Ready,
        Trigger::Start => state == CompState::Prepare,
        Trigger::Release => state == CompState::Paused,
        Trigger::Pause => state == CompState::Active,
        Trigger::Stop => matches!(state, CompState::Active | CompState::Paused),
        Trigger::Reset | Trigger::Xrun => true,
    };

    if allowed {
        Ok(Transition::Changed {
            from: state,
            to: target,
        })
    } else {
        Err(ComponentError::InvalidTrigger { state, trigger })
    }
}

/// Result of one copy tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Data moved.
    Processed {
        /// Bytes consumed from the (first) source.
        source_bytes: usize,
        /// Bytes produced into the (first) sink.
        sink_bytes: usize,
    },
    /// Waiting for the source to reach its preload threshold.
    Preloading,
    /// Not enough input for a block.
    NoInput,
    /// Not enough room in the sink for a block.
    NoSpace,
    /// The component is not active.
    Idle,
}

/// Cross-context view of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    /// Component id.
    pub id: CompId,
    /// Component type.
    pub comp_type: CompType,
    /// Lifecycle state.
    pub state: CompState,
    /// Source buffers in connection order.
    pub sources: Vec<BufferId>,
    /// Sink buffers in connection order.
    pub sinks: Vec<BufferId>,
}

/// Engine-side state of a component.
#[derive(Debug)]
pub struct DevCore {
    id: CompId,
    comp_type: CompType,
    pipeline_id: u32,
    direction: Direction,
    state: CompState,
    sources: Vec<BufferId>,
    sinks: Vec<BufferId>,
    period_us: u32,
    frames: u32,
    params: Option<StreamParams>,
    config: CompConfig,
    shared: Option<SharedRecord<DeviceSnapshot>>,
}

impl DevCore {
    /// Creates the core of a fresh component with empty buffer lists.
    pub fn new(config: &CompConfig) -> Self {
        Self {
            id: config.id,
            comp_type: config.comp_type,
            pipeline_id: config.pipeline_id,
            direction: config.direction,
            state: CompState::Ready,
            sources: Vec::new(),
            sinks: Vec::new(),
            period_us: config.period_us,
            frames: 0,
            params: None,
            config: config.clone(),
            shared: None,
        }
    }

    /// Component id.
    pub fn id(&self) -> CompId {
        self.id
    }

    /// Component type.
    pub fn comp_type(&self) -> CompType {
        self.comp_type
    }

    /// Pipeline the component belongs to.
    pub fn pipeline_id(&self) -> u32 {
        self.pipeline_id
    }

    /// Processing direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CompState {
        self.state
    }

    /// Creation descriptor.
    pub fn config(&self) -> &CompConfig {
        &self.config
    }

    /// Source buffers in connection order.
    pub fn sources(&self) -> &[BufferId] {
        &self.sources
    }

    /// Sink buffers in connection order.
    pub fn sinks(&self) -> &[BufferId] {
        &self.sinks
    }

    /// First source buffer or a [`MissingBuffer`](ComponentError::MissingBuffer) error.
    pub fn first_source(&self) -> Result<BufferId, ComponentError> {
        self.sources.first().copied().ok_or(ComponentError::MissingBuffer {
            comp: self.id,
            role: "source",
        })
    }

    /// First sink buffer or a [`MissingBuffer`](ComponentError::MissingBuffer) error.
    pub fn first_sink(&self) -> Result<BufferId, ComponentError> {
        self.sinks.first().copied().ok_or(ComponentError::MissingBuffer {
            comp: self.id,
            role: "sink",
        })
    }

    /// Scheduling period in microseconds.
    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Frames processed per period.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Stream parameters from the last negotiation.
    pub fn params(&self) -> Option<&StreamParams> {
        self.params.as_ref()
    }

    pub(crate) fn set_params(&mut self, params: StreamParams) {
        self.params = Some(params);
    }

    /// Derives the period frame count from a sample rate.
    pub fn set_period_frames(&mut self, rate: u32) {
        let frames = u64::from(rate) * u64::from(self.period_us) / 1_000_000;
        self.frames = u32::try_from(frames).unwrap_or(u32::MAX);
    }

    /// Appends a source buffer.
    pub fn add_source(&mut self, id: BufferId) {
        self.sources.push(id);
        self.republish();
    }

    /// Appends a sink buffer.
    pub fn add_sink(&mut self, id: BufferId) {
        self.sinks.push(id);
        self.republish();
    }

    /// Removes a buffer from both lists.
    pub fn remove_buffer(&mut self, id: BufferId) {
        self.sources.retain(|&b| b != id);
        self.sinks.retain(|&b| b != id);
        self.republish();
    }

    /// Applies a lifecycle trigger.
    ///
    /// Invalid triggers are logged and leave the state unchanged. `Reset`
    /// from `Active` or `Paused` is logged as an error but still succeeds.
    pub fn set_state(&mut self, trigger: Trigger) -> Result<Transition, ComponentError> {
        let transition = match next_state(self.state, trigger) {
            Ok(transition) => transition,
            Err(e) => {
                tracing::error!(comp = %self.id, state = %self.state, ?trigger, "wrong state for trigger");
                return Err(e);
            }
        };

        match transition {
            Transition::AlreadySet => {
                tracing::info!(comp = %self.id, state = %self.state, "state already set");
            }
            Transition::Changed { from, to } => {
                if trigger == Trigger::Reset && matches!(from, CompState::Active | CompState::Paused) {
                    tracing::error!(comp = %self.id, state = %from, "reset while running");
                }
                self.state = to;
                tracing::debug!(comp = %self.id, %from, %to, ?trigger, "state changed");
                self.republish();
            }
        }

        Ok(transition)
    }

    /// Returns true once the device is visible across contexts.
    pub fn is_shared(&self) -> bool {
        self.shared.is_some()
    }

    /// Current view of the device.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id,
            comp_type: self.comp_type,
            state: self.state,
            sources: self.sources.clone(),
            sinks: self.sinks.clone(),
        }
    }

    /// Publishes the device for other contexts and keeps it published.
    ///
    /// Buffer lists are carried over unchanged. Calling it again only
    /// returns another reader.
    pub fn make_shared(&mut self) -> SharedReader<DeviceSnapshot> {
        if let Some(record) = &self.shared {
            return record.reader();
        }

        let record = SharedRecord::new(self.snapshot());
        let reader = record.reader();
        self.shared = Some(record);
        tracing::debug!(comp = %self.id, "device shared");
        reader
    }

    fn republish(&mut self) {
        let snapshot = match &self.shared {
            Some(_) => self.snapshot(),
            None => return,
        };
        if let Some(record) = &mut self.shared {
            record.update(|view| *view = snapshot);
            record.publish();
        }
    }
}

/// Operations a driver implements for one component instance.
///
/// Every operation receives the engine-side [`DevCore`] and the buffer arena
/// of the pipeline. Defaults cover the generic behavior; drivers override
/// what they need.
pub trait Component: Send {
    /// Negotiates stream parameters with the connected buffers.
    fn params(
        &mut self,
        dev: &mut DevCore,
        buffers: &mut BufferArena,
        params: &StreamParams,
    ) -> Result<(), ComponentError> {
        params::verify_params(dev, buffers, ParamFlags::NONE, Some(params))
    }

    /// Moves to `Prepare` and sizes buffers.
    fn prepare(
        &mut self,
        dev: &mut DevCore,
        buffers: &mut BufferArena,
    ) -> Result<Status, ComponentError>;

    /// Applies a lifecycle trigger.
    fn trigger(
        &mut self,
        dev: &mut DevCore,
        buffers: &mut BufferArena,
        trigger: Trigger,
    ) -> Result<Transition, ComponentError> {
        let _ = buffers;
        dev.set_state(trigger)
    }

    /// Processes one tick.
    fn copy(
        &mut self,
        dev: &mut DevCore,
        buffers: &mut BufferArena,
    ) -> Result<CopyOutcome, ComponentError>;

    /// Returns to `Ready` and drops per-stream state.
    fn reset(&mut self, dev: &mut DevCore, buffers: &mut BufferArena) -> Result<(), ComponentError> {
        let _ = buffers;
        dev.set_state(Trigger::Reset).map(|_| ())
    }

    /// Handles a control command.
    fn cmd(&mut self, dev: &mut DevCore, cmd: ControlCmd<'_>) -> Result<(), ComponentError> {
        let _ = cmd;
        Err(ComponentError::UnsupportedCommand {
            comp_type: dev.comp_type(),
        })
    }

    /// Releases driver resources before the component is dropped.
    fn free(&mut self, dev: &mut DevCore) {
        tracing::debug!(comp = %dev.id(), "component freed");
    }
}

/// Factory for one component type.
pub trait ComponentDriver: Send + Sync {
    /// Type served by this driver.
    fn comp_type(&self) -> CompType;

    /// Human-readable driver name.
    fn name(&self) -> &'static str;

    /// Creates the driver half of a new component.
    fn create(&self, config: &CompConfig) -> Result<Box<dyn Component>, ComponentError>;
}

/// A component instance: engine state plus driver operations.
pub struct ComponentDev {
    core: DevCore,
    ops: Box<dyn Component>,
}

impl fmt::Debug for ComponentDev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDev")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl ComponentDev {
    /// Binds a driver instance to a fresh core.
    pub fn new(core: DevCore, ops: Box<dyn Component>) -> Self {
        Self { core, ops }
    }

    /// Engine-side state.
    pub fn core(&self) -> &DevCore {
        &self.core
    }

    /// Mutable engine-side state.
    pub fn core_mut(&mut self) -> &mut DevCore {
        &mut self.core
    }

    /// Component id.
    pub fn id(&self) -> CompId {
        self.core.id()
    }

    /// Lifecycle state.
    pub fn state(&self) -> CompState {
        self.core.state()
    }

    /// Negotiates stream parameters.
    pub fn params(
        &mut self,
        buffers: &mut BufferArena,
        params: &StreamParams,
    ) -> Result<(), ComponentError> {
        self.ops.params(&mut self.core, buffers, params)
    }

    /// Prepares the component.
    pub fn prepare(&mut self, buffers: &mut BufferArena) -> Result<Status, ComponentError> {
        self.ops.prepare(&mut self.core, buffers)
    }

    /// Applies a lifecycle trigger.
    pub fn trigger(
        &mut self,
        buffers: &mut BufferArena,
        trigger: Trigger,
    ) -> Result<Transition, ComponentError> {
        self.ops.trigger(&mut self.core, buffers, trigger)
    }

    /// Runs one tick. Components that are not active report [`CopyOutcome::Idle`].
    pub fn copy(&mut self, buffers: &mut BufferArena) -> Result<CopyOutcome, ComponentError> {
        if self.core.state() != CompState::Active {
            return Ok(CopyOutcome::Idle);
        }
        self.ops.copy(&mut self.core, buffers)
    }

    /// Resets the component.
    pub fn reset(&mut self, buffers: &mut BufferArena) -> Result<(), ComponentError> {
        self.ops.reset(&mut self.core, buffers)
    }

    /// Handles a control command.
    pub fn cmd(&mut self, cmd: ControlCmd<'_>) -> Result<(), ComponentError> {
        self.ops.cmd(&mut self.core, cmd)
    }

    /// Publishes the device across contexts.
    pub fn make_shared(&mut self) -> SharedReader<DeviceSnapshot> {
        self.core.make_shared()
    }

    /// Releases driver resources and consumes the device.
    pub fn free(mut self) {
        self.ops.free(&mut self.core);
    }
}
