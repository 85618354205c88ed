//! Built-in component drivers.
//!
//! | Type | Driver | Copy |
//! |---|---|---|
//! | `mux` | [`MuxDriver`] | many sources → one sink through a routing table |
//! | `demux` | [`DemuxDriver`] | one source → many sinks, one table per sink |
//! | `dsm` | [`DsmDriver`] | passthrough, consumes a feedback source in step |
//! | `dsm-demux` | [`DsmDemuxDriver`] | passthrough into the sink and a feedback sink |
//! | `smart-amp` | [`SmartAmpDriver`] | channel duplication, drains feedback, model blob |
//! | `processing-module` | [`ProcessingDriver`] | block-based copy with preload, model blob |

mod dsm;
mod mux;
mod processing;
mod smart_amp;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

pub use dsm::{DsmDemuxDriver, DsmDriver};
pub use mux::{DemuxDriver, MuxDriver};
pub use processing::ProcessingDriver;
pub use smart_amp::SmartAmpDriver;

use crate::component::registry::DriverRegistry;
use crate::component::{CopyOutcome, DevCore, Status, Trigger};
use crate::ComponentError;

/// Registers every built-in driver.
pub fn register_builtin(registry: &DriverRegistry) {
    registry.register(Arc::new(MuxDriver));
    registry.register(Arc::new(DemuxDriver));
    registry.register(Arc::new(DsmDriver));
    registry.register(Arc::new(DsmDemuxDriver));
    registry.register(Arc::new(SmartAmpDriver));
    registry.register(Arc::new(ProcessingDriver));
}

/// Moves the device to `Prepare`; `PathStop` means it was already prepared.
fn begin_prepare(dev: &mut DevCore) -> Result<Status, ComponentError> {
    dev.set_state(Trigger::Prepare).map(Status::from)
}

/// Logs a failed prepare and returns the device to `Ready`.
fn abort_prepare(dev: &mut DevCore, err: ComponentError) -> ComponentError {
    tracing::error!(comp = %dev.id(), error = %err, "prepare failed");
    if let Err(e) = dev.set_state(Trigger::Reset) {
        tracing::error!(comp = %dev.id(), error = %e, "reset after failed prepare");
    }
    err
}

/// Neutral outcome for a tick that cannot move any frame.
fn stalled(source_frames: usize) -> CopyOutcome {
    if source_frames == 0 {
        CopyOutcome::NoInput
    } else {
        CopyOutcome::NoSpace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::CompType;

    #[test]
    fn test_register_builtin() {
        let registry = DriverRegistry::new();
        register_builtin(&registry);

        assert_eq!(registry.len(), 6);
        for comp_type in [
            CompType::Mux,
            CompType::Demux,
            CompType::Dsm,
            CompType::DsmDemux,
            CompType::SmartAmp,
            CompType::ProcessingModule,
        ] {
            let driver = registry.get(comp_type).unwrap();
            assert_eq!(driver.comp_type(), comp_type);
        }
    }

    #[test]
    fn test_stalled_reason() {
        assert_eq!(stalled(0), CopyOutcome::NoInput);
        assert_eq!(stalled(3), CopyOutcome::NoSpace);
    }
}
