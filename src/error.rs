//! Error types for pcm-pipeline.
//!
//! Errors are split into two categories:
//! - **Failures** ([`ComponentError`]): the requested operation did not happen
//! - **Neutral results**: "already set" transitions and "not ready yet" copy
//!   results, returned as `Ok` values (see [`Transition`](crate::Transition)
//!   and [`CopyOutcome`](crate::CopyOutcome))

use std::fmt;

use crate::component::{CompState, Trigger};
use crate::format::SampleFormat;
use crate::id::{BufferId, CompId, CompType};

/// Failures returned by components, buffers, the registry and the timer.
///
/// Every failure is a synchronous return value. Nothing inside the engine
/// retries: backpressure is retried by the scheduler on a later tick and a
/// [`Busy`](ComponentError::Busy) control request is resent by the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    /// The trigger is not valid from the current state.
    #[error("trigger {trigger:?} not allowed in state {state:?}")]
    InvalidTrigger {
        /// State the component was in (and still is).
        state: CompState,
        /// Trigger that was rejected.
        trigger: Trigger,
    },

    /// No driver is registered for the component type.
    #[error("driver not found for component type {comp_type}")]
    DriverNotFound {
        /// The type that was looked up.
        comp_type: CompType,
    },

    /// The component configuration is malformed or out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with it.
        reason: String,
    },

    /// An argument was missing, malformed or out of range.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with it.
        reason: String,
    },

    /// The stream's sample format has no processing path.
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat {
        /// The rejected format.
        format: SampleFormat,
    },

    /// An allocation failed.
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory {
        /// Size of the failed allocation.
        bytes: usize,
    },

    /// A new control transfer started while another is still in progress.
    #[error("busy with previous control request")]
    Busy,

    /// A continuation fragment arrived with no transfer in progress.
    #[error("model data buffer not allocated")]
    ModelNotAllocated,

    /// The component id is not part of the pipeline.
    #[error("unknown component: {id}")]
    UnknownComponent {
        /// The missing id.
        id: CompId,
    },

    /// The buffer handle does not refer to a live buffer.
    #[error("unknown buffer: {id}")]
    UnknownBuffer {
        /// The stale handle.
        id: BufferId,
    },

    /// The component needs a buffer it is not connected to.
    #[error("{comp} has no {role} buffer")]
    MissingBuffer {
        /// Component that was missing the buffer.
        comp: CompId,
        /// Which buffer ("source", "sink", "feedback").
        role: &'static str,
    },

    /// A cursor advance asked for more bytes than the stream holds.
    #[error("buffer overrun: requested {requested} bytes, {available} available")]
    BufferOverrun {
        /// Bytes requested.
        requested: usize,
        /// Bytes that could be advanced.
        available: usize,
    },

    /// The driver does not implement the command.
    #[error("command not supported by {comp_type}")]
    UnsupportedCommand {
        /// Type of the component that rejected it.
        comp_type: CompType,
    },
}

impl ComponentError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Folds the error onto the status code reported to the host.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::OutOfMemory { .. } | Self::ModelNotAllocated => ErrorCode::OutOfMemory,
            Self::Busy => ErrorCode::Busy,
            _ => ErrorCode::InvalidArgument,
        }
    }
}

/// Status code carried in IPC replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed request, wrong state or unsupported format.
    InvalidArgument,
    /// An allocation failed.
    OutOfMemory,
    /// The component is busy with a previous request.
    Busy,
}

impl ErrorCode {
    /// Returns the negative errno value used on the wire.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => -22,
            Self::OutOfMemory => -12,
            Self::Busy => -16,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid-argument"),
            Self::OutOfMemory => f.write_str("out-of-memory"),
            Self::Busy => f.write_str("busy"),
        }
    }
}

impl From<&ComponentError> for ErrorCode {
    fn from(err: &ComponentError) -> Self {
        err.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_trigger_display() {
        let err = ComponentError::InvalidTrigger {
            state: CompState::Ready,
            trigger: Trigger::Start,
        };
        assert_eq!(err.to_string(), "trigger Start not allowed in state Ready");
    }

    #[test]
    fn test_driver_not_found_display() {
        let err = ComponentError::DriverNotFound {
            comp_type: CompType::Mux,
        };
        assert_eq!(err.to_string(), "driver not found for component type mux");
    }

    #[test]
    fn test_invalid_config_helper() {
        let err = ComponentError::invalid_config("zero periods");
        assert_eq!(err.to_string(), "invalid configuration: zero periods");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ComponentError::Busy.code(), ErrorCode::Busy);
        assert_eq!(
            ComponentError::OutOfMemory { bytes: 10 }.code(),
            ErrorCode::OutOfMemory
        );
        assert_eq!(ComponentError::ModelNotAllocated.code(), ErrorCode::OutOfMemory);
        assert_eq!(
            ComponentError::UnsupportedFormat {
                format: SampleFormat::Float
            }
            .code(),
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn test_errno_values() {
        assert_eq!(ErrorCode::InvalidArgument.errno(), -22);
        assert_eq!(ErrorCode::OutOfMemory.errno(), -12);
        assert_eq!(ErrorCode::Busy.errno(), -16);
        assert_eq!(ErrorCode::Busy.to_string(), "busy");
    }
}
