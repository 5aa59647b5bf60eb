// Pairing Watcher - filters the system bond broadcast down to the bonded edge of the target

use crate::signal::EventSink;
use crate::types::{BondState, BondStateChange, PeripheralHandle};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingEvent {
    Bonded,
}

#[derive(Default)]
pub struct PairingWatcher {
    forwarder: Option<(CancellationToken, JoinHandle<()>)>,
    /// Last bond state observed for the current target
    latch: Option<(PeripheralHandle, BondState)>,
}

impl PairingWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding the system bond broadcast into the orchestrator queue
    pub fn subscribe(
        &mut self,
        mut stream: broadcast::Receiver<BondStateChange>,
        events: EventSink<BondStateChange>,
    ) {
        self.unsubscribe();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    received = stream.recv() => match received {
                        Ok(change) => {
                            if !events.emit(change) {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Bond notifications lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("Bond notification forwarder stopped");
        });

        info!("Subscribed to bond state notifications");
        self.forwarder = Some((token, handle));
    }

    /// Stop forwarding. Safe to call when not subscribed.
    pub fn unsubscribe(&mut self) {
        if let Some((token, _handle)) = self.forwarder.take() {
            token.cancel();
            info!("Unsubscribed from bond state notifications");
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.forwarder.is_some()
    }

    /// Begin watching a new target; forgets anything seen for the previous one
    pub fn observe(&mut self, peripheral: &PeripheralHandle) {
        debug!(peripheral = %peripheral, "Watching bond state");
        self.latch = None;
    }

    pub fn clear(&mut self) {
        self.latch = None;
    }

    /// Filter one notification against the target as it is at delivery time.
    ///
    /// Fires only on the transition into `Bonded`. The previous state is our own
    /// last observation of this target when we have one, else the event's `old`.
    pub fn on_bond_change(
        &mut self,
        change: &BondStateChange,
        current: Option<&PeripheralHandle>,
    ) -> Option<PairingEvent> {
        let current = match current {
            Some(current) if *current == change.device => current,
            _ => {
                debug!(device = %change.device, "Ignoring bond change for non-target device");
                return None;
            }
        };

        let previous = match &self.latch {
            Some((device, state)) if device == current => *state,
            _ => change.old,
        };
        self.latch = Some((current.clone(), change.new));

        if change.new == BondState::Bonded && previous != BondState::Bonded {
            info!(device = %change.device, "Peripheral bonded");
            Some(PairingEvent::Bonded)
        } else {
            debug!(device = %change.device, old = ?change.old, new = ?change.new, "Bond state change");
            None
        }
    }
}

impl Drop for PairingWatcher {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
