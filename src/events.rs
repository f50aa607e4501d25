//! Typed session events.
//!
//! Subscribers are called synchronously on the dispatch thread, in the order
//! they subscribed. The session emits events only after constraint resolution
//! and recomputation have finished.

use crate::fitting::orchestrator::FitStatus;
use crate::history::RefreshGroup;
use std::fmt;

/// Something UI-facing changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Parameter values, flags or errors changed.
    ParametersChanged,
    /// Phases or atoms were added, removed or renamed.
    StructureChanged,
    /// The list of phase names changed.
    PhasesChanged,
    /// The simulated curve was recomputed.
    CalculatedDataChanged,
    ExperimentChanged,
    /// Undo/redo availability or labels changed.
    UndoRedoChanged,
    CalculatorChanged(String),
    MinimizerChanged { engine: String, method: String },
    ConstraintsChanged,
    FitStatusChanged(FitStatus),
    FitResultsChanged,
    /// A project was restored or reset.
    ProjectChanged,
}

impl Event {
    /// Events that announce a replayed undo/redo entry.
    pub fn for_refresh(group: RefreshGroup) -> Vec<Event> {
        match group {
            RefreshGroup::Structure => vec![
                Event::StructureChanged,
                Event::PhasesChanged,
                Event::ParametersChanged,
            ],
            RefreshGroup::Parameters => vec![Event::ParametersChanged],
            RefreshGroup::None => Vec::new(),
        }
    }
}

/// Identifies a subscription for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&Event) + Send>;

/// Ordered list of event handlers.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<(SubscriptionId, Handler)>,
    next_id: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(h, _)| *h != id);
        self.handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn emit(&mut self, event: &Event) {
        for (_, handler) in self.handlers.iter_mut() {
            handler(event);
        }
    }

    pub fn emit_all(&mut self, events: &[Event]) {
        for event in events {
            self.emit(event);
        }
    }
}
