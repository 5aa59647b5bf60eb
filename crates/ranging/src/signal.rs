//! Message types for the orchestrator queue.
//!
//! Platform collaborators call back on threads they own. Every callback is
//! turned into a [`WorkflowSignal`] and pushed onto one unbounded queue that a
//! single task drains, so workflow state is only ever touched from that task.

use crate::types::{
    BondStateChange, LinkEvent, RangingCapabilities, RangingRateTier, ScanEvent, SessionEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Commands issued by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    SetRateTier(RangingRateTier),
    Shutdown,
}

/// Everything the orchestrator reacts to. The `u64` tags are the generation
/// numbers agents hand out with each sink.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowSignal {
    Command(Command),
    Scan { scan: u64, event: ScanEvent },
    ScanDeadline { scan: u64 },
    Link { link: u64, event: LinkEvent },
    Bond(BondStateChange),
    Capabilities {
        listener: u64,
        capabilities: Option<RangingCapabilities>,
    },
    Session { session: u64, event: SessionEvent },
}

impl WorkflowSignal {
    /// Short label for logs
    pub fn operation(&self) -> &'static str {
        match self {
            WorkflowSignal::Command(Command::Start) => "start",
            WorkflowSignal::Command(Command::SetRateTier(_)) => "set_rate_tier",
            WorkflowSignal::Command(Command::Shutdown) => "shutdown",
            WorkflowSignal::Scan { .. } => "scan",
            WorkflowSignal::ScanDeadline { .. } => "scan_deadline",
            WorkflowSignal::Link { .. } => "link",
            WorkflowSignal::Bond(_) => "bond",
            WorkflowSignal::Capabilities { .. } => "capabilities",
            WorkflowSignal::Session { .. } => "session",
        }
    }
}

pub type SignalSender = mpsc::UnboundedSender<WorkflowSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<WorkflowSignal>;

/// Typed callback handed to a platform collaborator.
///
/// Emitting wraps the event into a [`WorkflowSignal`] and queues it; nothing
/// is executed on the caller's thread.
pub struct EventSink<T> {
    tx: SignalSender,
    wrap: Arc<dyn Fn(T) -> WorkflowSignal + Send + Sync>,
}

impl<T> EventSink<T> {
    pub fn new(tx: SignalSender, wrap: impl Fn(T) -> WorkflowSignal + Send + Sync + 'static) -> Self {
        Self {
            tx,
            wrap: Arc::new(wrap),
        }
    }

    /// Queue an event. Returns false once the orchestrator has gone away.
    pub fn emit(&self, event: T) -> bool {
        self.tx.send((self.wrap)(event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            wrap: Arc::clone(&self.wrap),
        }
    }
}

impl<T> std::fmt::Debug for EventSink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
