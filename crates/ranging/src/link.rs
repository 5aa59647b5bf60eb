// Link Agent - owns the GATT link to the target peripheral and triggers pairing

use crate::config::PairingTriggerConfig;
use crate::permissions::{PermissionManager, PermissionScope};
use crate::platform::LinkService;
use crate::signal::{EventSink, SignalSender, WorkflowSignal};
use crate::types::{ConnectionId, LinkEvent, PeripheralHandle};
use crate::{RangingError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress reported by the link agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    PairingTriggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Opening,
    Connected,
}

#[derive(Debug)]
struct ActiveConnection {
    id: ConnectionId,
    peripheral: PeripheralHandle,
    generation: u64,
    phase: LinkPhase,
}

pub struct LinkAgent {
    service: Arc<dyn LinkService>,
    permissions: Arc<PermissionManager>,
    signals: SignalSender,
    trigger: PairingTriggerConfig,
    generation: u64,
    active: Option<ActiveConnection>,
}

impl LinkAgent {
    pub fn new(
        service: Arc<dyn LinkService>,
        permissions: Arc<PermissionManager>,
        signals: SignalSender,
        trigger: PairingTriggerConfig,
    ) -> Self {
        Self {
            service,
            permissions,
            signals,
            trigger,
            generation: 0,
            active: None,
        }
    }

    /// Open a link to `peripheral`. Any previous link is released first.
    pub async fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<()> {
        if let Some(previous) = &self.active {
            warn!(previous = %previous.peripheral, "Closing previous link before connecting");
            self.close().await;
        }

        self.permissions.authorize(PermissionScope::Connect).await?;

        self.generation += 1;
        let generation = self.generation;
        info!(peripheral = %peripheral, generation, "Connecting to peripheral");

        let events = EventSink::new(self.signals.clone(), move |event| WorkflowSignal::Link {
            link: generation,
            event,
        });
        let id = self
            .service
            .open_link(peripheral, events)
            .await
            .map_err(|e| match e {
                RangingError::ConnectFailure(_) | RangingError::PermissionDenied(_) => e,
                other => RangingError::ConnectFailure(other.to_string()),
            })?;

        self.active = Some(ActiveConnection {
            id,
            peripheral: peripheral.clone(),
            generation,
            phase: LinkPhase::Opening,
        });
        Ok(())
    }

    /// Handle a link callback.
    ///
    /// A disconnect or failed connection attempt releases the connection here,
    /// so a later [`close`](Self::close) has nothing left to do.
    pub async fn on_link_event(&mut self, link: u64, event: LinkEvent) -> Result<Option<LinkStatus>> {
        let Some(active) = self.active.as_mut().filter(|a| a.generation == link) else {
            debug!(link, ?event, "Ignoring event from stale link");
            return Ok(None);
        };

        match event {
            LinkEvent::Connected => {
                if active.phase == LinkPhase::Connected {
                    debug!(peripheral = %active.peripheral, "Duplicate connected event");
                    return Ok(None);
                }
                active.phase = LinkPhase::Connected;
                info!(peripheral = %active.peripheral, "GATT connected");
                Ok(Some(LinkStatus::Connected))
            }
            LinkEvent::ConnectFailed { status } => {
                warn!(peripheral = %active.peripheral, status, "GATT connection attempt failed");
                if let Some(failed) = self.active.take() {
                    if let Err(e) = self.service.close_link(failed.id).await {
                        warn!("Failed to release link after connect failure: {}", e);
                    }
                }
                Err(RangingError::ConnectFailure(format!("status {}", status)))
            }
            LinkEvent::Disconnected { status } => {
                warn!(peripheral = %active.peripheral, status, "GATT disconnected");
                if let Some(lost) = self.active.take() {
                    if let Err(e) = self.service.close_link(lost.id).await {
                        warn!("Failed to release lost link: {}", e);
                    }
                }
                Err(RangingError::LinkLost)
            }
        }
    }

    /// Discover attributes, locate the trigger characteristic and write the trigger value.
    ///
    /// When the service or characteristic is missing the link is left open.
    pub async fn discover_and_trigger(&mut self) -> Result<LinkStatus> {
        let id = match &self.active {
            Some(active) if active.phase == LinkPhase::Connected => active.id,
            _ => return Err(RangingError::LinkLost),
        };

        info!("Discovering services");
        let tree = self
            .service
            .discover_attributes(id)
            .await
            .map_err(|e| match e {
                RangingError::ServiceDiscoveryFailure(_) => e,
                other => RangingError::ServiceDiscoveryFailure(other.to_string()),
            })?;

        if !tree.has_characteristic(self.trigger.service_uuid, self.trigger.characteristic_uuid) {
            warn!(
                service = %self.trigger.service_uuid,
                characteristic = %self.trigger.characteristic_uuid,
                found_service = tree.service(self.trigger.service_uuid).is_some(),
                "Pairing trigger characteristic not found"
            );
            return Err(RangingError::ServiceNotFound);
        }

        info!("Triggering pairing");
        self.service
            .write_attribute(
                id,
                self.trigger.service_uuid,
                self.trigger.characteristic_uuid,
                &self.trigger.value,
            )
            .await
            .map_err(|e| match e {
                RangingError::WriteFailure(_) => e,
                other => RangingError::WriteFailure(other.to_string()),
            })?;

        Ok(LinkStatus::PairingTriggered)
    }

    /// Release the link. No-op when nothing is open.
    pub async fn close(&mut self) {
        if let Some(active) = self.active.take() {
            info!(peripheral = %active.peripheral, "Closing GATT link");
            if let Err(e) = self.service.close_link(active.id).await {
                warn!("Failed to close GATT link: {}", e);
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.active.as_ref().map(|a| &a.peripheral)
    }
}
