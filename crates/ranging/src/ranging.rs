// Ranging Agent - capability check, session configuration and the session lifecycle

use crate::permissions::{PermissionManager, PermissionScope};
use crate::platform::RangingService;
use crate::preference::RangingParams;
use crate::signal::{EventSink, SignalSender, WorkflowSignal};
use crate::types::{
    DistanceSample, ListenerId, PeripheralHandle, RangingCapabilities, RangingRateTier,
    RangingTechnology, SessionEvent, SessionId,
};
use crate::{RangingError, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress reported by the ranging agent
#[derive(Debug, Clone, PartialEq)]
pub enum RangingStatus {
    /// Session created and start requested. Adding the device is best-effort;
    /// its failure is carried here and does not prevent the start call.
    StartRequested { add_device_error: Option<String> },
    Opened,
    Started(RangingTechnology),
    Stopped(RangingTechnology),
    Distance(DistanceSample),
}

#[derive(Debug)]
struct Registration {
    id: ListenerId,
    generation: u64,
    peripheral: PeripheralHandle,
    tier: RangingRateTier,
}

#[derive(Debug)]
struct ActiveSession {
    id: SessionId,
    generation: u64,
    peripheral: PeripheralHandle,
}

pub struct RangingAgent {
    service: Arc<dyn RangingService>,
    permissions: Arc<PermissionManager>,
    signals: SignalSender,
    params: RangingParams,
    listener_generation: u64,
    session_generation: u64,
    registration: Option<Registration>,
    session: Option<ActiveSession>,
}

impl RangingAgent {
    pub fn new(
        service: Arc<dyn RangingService>,
        permissions: Arc<PermissionManager>,
        signals: SignalSender,
        params: RangingParams,
    ) -> Self {
        Self {
            service,
            permissions,
            signals,
            params,
            listener_generation: 0,
            session_generation: 0,
            registration: None,
            session: None,
        }
    }

    /// Host pre-flight check, done before anything touches the radio
    pub async fn ensure_host_support(&self) -> Result<()> {
        if self.service.channel_sounding_supported().await? {
            Ok(())
        } else {
            warn!("Host has no BLE channel sounding support");
            Err(RangingError::ChannelSoundingUnavailable)
        }
    }

    /// Begin a session against `peripheral`: registers for the capability report,
    /// which drives the rest in [`on_capabilities`](Self::on_capabilities).
    pub async fn start_session(
        &mut self,
        peripheral: &PeripheralHandle,
        tier: RangingRateTier,
    ) -> Result<()> {
        self.stop_session().await;
        self.permissions.authorize(PermissionScope::Ranging).await?;

        self.listener_generation += 1;
        let generation = self.listener_generation;
        info!(peripheral = %peripheral, %tier, "Querying ranging capabilities");

        let events = EventSink::new(self.signals.clone(), move |capabilities| {
            WorkflowSignal::Capabilities {
                listener: generation,
                capabilities,
            }
        });
        let id = self
            .service
            .register_capabilities(events)
            .await
            .map_err(|e| {
                warn!("Capability registration failed: {}", e);
                RangingError::RangingUnsupported("RangingManager unavailable".to_string())
            })?;

        self.registration = Some(Registration {
            id,
            generation,
            peripheral: peripheral.clone(),
            tier,
        });
        Ok(())
    }

    /// Handle a capability report: validate, build the preference, create and start the session
    pub async fn on_capabilities(
        &mut self,
        listener: u64,
        capabilities: Option<RangingCapabilities>,
    ) -> Result<Option<RangingStatus>> {
        let (peripheral, tier) = match &self.registration {
            Some(r) if r.generation == listener => (r.peripheral.clone(), r.tier),
            _ => {
                debug!(listener, "Ignoring capabilities for stale registration");
                return Ok(None);
            }
        };
        if self.session.is_some() {
            debug!("Capability update while a session is live");
            return Ok(None);
        }

        if let Err(e) = self.check_capabilities(capabilities.as_ref()) {
            warn!("{}", e);
            self.stop_session().await;
            return Err(e);
        }
        if let Err(e) = self.permissions.authorize(PermissionScope::Ranging).await {
            self.stop_session().await;
            return Err(e);
        }

        let preference = self.params.build_preference(&peripheral, tier);

        self.session_generation += 1;
        let generation = self.session_generation;
        let events = EventSink::new(self.signals.clone(), move |event| WorkflowSignal::Session {
            session: generation,
            event,
        });
        let id = match self.service.create_session(events).await {
            Ok(id) => id,
            Err(e) => {
                self.stop_session().await;
                return Err(RangingError::SessionCreateFailure(e.to_string()));
            }
        };
        self.session = Some(ActiveSession {
            id,
            generation,
            peripheral: peripheral.clone(),
        });

        let add_device_error = match self.service.add_device(id, &preference.config).await {
            Ok(()) => None,
            Err(e) => {
                warn!(peripheral = %peripheral, "Add device failed: {}", e);
                Some(e.to_string())
            }
        };

        // start is attempted even when adding the device failed
        info!(peripheral = %peripheral, %tier, "Starting ranging session as initiator");
        if let Err(e) = self.service.start(id, &preference).await {
            self.stop_session().await;
            return Err(RangingError::SessionOpenFailure(e.to_string()));
        }

        Ok(Some(RangingStatus::StartRequested { add_device_error }))
    }

    fn check_capabilities(&self, capabilities: Option<&RangingCapabilities>) -> Result<()> {
        let capabilities = capabilities.ok_or_else(|| {
            RangingError::RangingUnsupported("RangingManager unavailable".to_string())
        })?;
        let cs = capabilities
            .channel_sounding
            .as_ref()
            .ok_or_else(|| RangingError::RangingUnsupported("CS not supported".to_string()))?;

        if !cs.supported_security_levels.contains(&self.params.security_level) {
            return Err(RangingError::RangingUnsupported(
                "CS security level not supported".to_string(),
            ));
        }
        Ok(())
    }

    /// Handle a session callback
    pub async fn on_session_event(
        &mut self,
        session: u64,
        event: SessionEvent,
    ) -> Result<Option<RangingStatus>> {
        let peripheral = match &self.session {
            Some(s) if s.generation == session => s.peripheral.clone(),
            _ => {
                debug!(session, ?event, "Ignoring event from stale session");
                return Ok(None);
            }
        };

        match event {
            SessionEvent::Opened => {
                info!(peripheral = %peripheral, "Ranging session opened");
                Ok(Some(RangingStatus::Opened))
            }
            SessionEvent::OpenFailed(reason) => {
                warn!(peripheral = %peripheral, reason, "Ranging session failed to open");
                // never opened, so there is nothing to close
                self.session = None;
                self.unregister().await;
                Err(RangingError::SessionOpenFailure(reason.to_string()))
            }
            SessionEvent::Started { technology, .. } => {
                info!(peripheral = %peripheral, %technology, "Ranging started");
                Ok(Some(RangingStatus::Started(technology)))
            }
            SessionEvent::Stopped { technology, .. } => {
                info!(peripheral = %peripheral, %technology, "Ranging stopped");
                Ok(Some(RangingStatus::Stopped(technology)))
            }
            SessionEvent::Closed(reason) => {
                warn!(peripheral = %peripheral, reason, "Ranging session closed by platform");
                self.session = None;
                self.unregister().await;
                Err(RangingError::SessionClosedUnexpectedly(reason))
            }
            SessionEvent::Results { peer, distance } => {
                if peer != peripheral.ranging_device_id() {
                    debug!(%peer, "Ignoring result for another ranging device");
                    return Ok(None);
                }
                match distance {
                    Some(meters) if meters.is_finite() => {
                        Ok(Some(RangingStatus::Distance(DistanceSample {
                            peripheral,
                            meters,
                            at: Utc::now(),
                        })))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    /// Close the live session and drop the capability registration. Idempotent.
    pub async fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!(peripheral = %session.peripheral, "Closing ranging session");
            if let Err(e) = self.service.close(session.id).await {
                warn!("Failed to close ranging session: {}", e);
            }
        }
        self.unregister().await;
    }

    async fn unregister(&mut self) {
        if let Some(registration) = self.registration.take() {
            if let Err(e) = self.service.unregister_capabilities(registration.id).await {
                warn!("Failed to unregister capability listener: {}", e);
            }
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }
}
