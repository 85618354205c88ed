//! # pcm-pipeline
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time PCM component engine for DSP firmware.
//!
//! `pcm-pipeline` moves interleaved PCM samples between ring buffers on every
//! processing tick. It provides the parts every audio component shares: the
//! lifecycle state machine, wrap-safe stream copies, mux/demux channel
//! routing and chunked delivery of large control blobs.
//!
//! ## Quick Start
//!
//! ```
//! use pcm_pipeline::{
//!     register_builtin, CompConfig, CompId, CompType, DriverParams, DriverRegistry, MuxConfig,
//!     MuxStreamConfig, Pipeline, StreamParams, Trigger,
//! };
//!
//! static REGISTRY: DriverRegistry = DriverRegistry::new();
//! register_builtin(&REGISTRY);
//!
//! // One stereo stream duplicated onto four channels
//! let routing = MuxConfig {
//!     streams: vec![MuxStreamConfig::new(0, 2).route(0, 0).route(1, 1).route(0, 2).route(1, 3)],
//! };
//! let mut pipeline = Pipeline::with_registry(&REGISTRY);
//! pipeline.on_event(|e| tracing::info!(?e, "component event"));
//!
//! let demux = pipeline
//!     .add_component(&CompConfig::new(CompId::new(1), CompType::Demux)
//!         .with_params(DriverParams::Mux(routing)))
//!     .unwrap();
//!
//! let stereo = StreamParams { channels: 2, ..StreamParams::default() };
//! let quad = StreamParams { channels: 4, ..StreamParams::default() };
//! let input = pipeline.add_buffer(64, &stereo).unwrap();
//! let output = pipeline.add_buffer(128, &quad).unwrap();
//! pipeline.connect(None, input, Some(demux)).unwrap();
//! pipeline.connect(Some(demux), output, None).unwrap();
//!
//! pipeline.prepare(demux).unwrap();
//! pipeline.trigger(demux, Trigger::Start).unwrap();
//!
//! pipeline.buffers_mut().stream_mut(input).unwrap()
//!     .write_samples::<i16>(&[10, 20, 11, 21]).unwrap();
//! pipeline.tick();
//!
//! let out = pipeline.buffers_mut().stream_mut(output).unwrap()
//!     .read_samples::<i16>(8).unwrap();
//! assert_eq!(out, vec![10, 20, 10, 20, 11, 21, 11, 21]);
//! ```
//!
//! ## Architecture
//!
//! Everything runs to completion inside a tick or an interrupt:
//!
//! - **Scheduler tick**: [`Pipeline::tick()`] walks the components and runs
//!   each driver's copy
//! - **Trigger dispatch**: lifecycle commands arrive through
//!   [`Pipeline::trigger()`] or the IPC mailbox
//! - **Interrupt context**: shares state through [`IrqLock`] critical
//!   sections (driver registry, [`Timer64`])
//!
//! No operation blocks. Backpressure is a neutral [`CopyOutcome`], never an
//! error, and is retried on the next tick.

#![warn(missing_docs)]
// Sample and cursor arithmetic converts between u32, usize and sample types on purpose
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod component;
mod config;
pub mod drivers;
mod error;
mod event;
pub mod format;
mod id;
mod ipc;
mod irq;
pub mod pipeline;
mod shared;
mod timer;

pub use component::model::{BlobPayload, ControlCmd, ControlFragment, ModelHandler, ABI_VERSION};
pub use component::params::verify_params;
pub use component::registry::DriverRegistry;
pub use component::{
    next_state, CompState, Component, ComponentDev, ComponentDriver, CopyOutcome, DevCore,
    DeviceSnapshot, Status, Transition, Trigger,
};
pub use config::{
    CompConfig, Direction, DriverParams, MuxConfig, MuxStreamConfig, ProcessConfig, MAX_CHANNELS,
    MAX_CONTROL_CHUNK, MUX_MAX_STREAMS, PING_PONG_PERIODS,
};
pub use drivers::register_builtin;
pub use error::{ComponentError, ErrorCode};
pub use event::{event_callback, ComponentEvent, EventCallback};
pub use format::{Sample, SampleFormat, SampleWidth};
pub use id::{BufferId, CompId, CompType};
pub use ipc::{ipc_channel, DspPort, HostPort, IpcReply, IpcRequest};
pub use irq::IrqLock;
pub use pipeline::{
    AudioStream, BufferArena, BufferFormat, CompBuffer, Endpoint, ParamFlags, Pipeline,
    RoutingTable, StreamParams,
};
pub use shared::{SharedReader, SharedRecord};
pub use timer::{CycleCounter, Timer64, TimerHandler, ROLLOVER_COMPARE};
