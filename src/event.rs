//! Lifecycle events for monitoring components.
//!
//! Events are notifications about state changes the pipeline performed.
//! They are emitted after the change is complete and never influence it.

use std::sync::Arc;

use crate::component::CompState;
use crate::id::CompId;

/// Events emitted by a [`Pipeline`](crate::Pipeline).
///
/// # Example
///
/// ```
/// use pcm_pipeline::ComponentEvent;
///
/// fn handle_event(event: ComponentEvent) {
///     match event {
///         ComponentEvent::StateChanged { comp, from, to } => {
///             eprintln!("{comp}: {from} -> {to}");
///         }
///         ComponentEvent::Xrun { comp } => {
///             eprintln!("{comp}: xrun, back to ready");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentEvent {
    /// A trigger moved a component to a new state.
    StateChanged {
        /// Component that changed.
        comp: CompId,
        /// Previous state.
        from: CompState,
        /// New state.
        to: CompState,
    },

    /// A component was reset by an under/overrun.
    ///
    /// Emitted in addition to the `StateChanged` event of the reset.
    Xrun {
        /// Component that hit the xrun.
        comp: CompId,
    },
}

/// Callback type for receiving component events.
///
/// Register one with [`Pipeline::on_event()`](crate::Pipeline::on_event).
pub type EventCallback = Arc<dyn Fn(ComponentEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use pcm_pipeline::{event_callback, ComponentEvent};
///
/// let callback = event_callback(|event: ComponentEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(ComponentEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_event_debug() {
        let event = ComponentEvent::Xrun {
            comp: CompId::new(4),
        };
        let debug = format!("{event:?}");
        assert!(debug.contains("Xrun"));
        assert!(debug.contains('4'));
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(ComponentEvent::StateChanged {
            comp: CompId::new(1),
            from: CompState::Ready,
            to: CompState::Prepare,
        });
        assert!(called.load(Ordering::SeqCst));
    }
}
