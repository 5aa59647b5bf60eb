// Discovery Agent - radio scan with first-match selection and a scan deadline

use crate::permissions::{PermissionManager, PermissionScope};
use crate::platform::RadioScanner;
use crate::signal::{EventSink, SignalSender, WorkflowSignal};
use crate::types::{PeripheralHandle, ScanEvent, ScanFilterCriteria, ScanSettings};
use crate::{RangingError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ActiveScan {
    generation: u64,
    filter: ScanFilterCriteria,
    deadline: JoinHandle<()>,
}

/// Drives one scan at a time and reports at most one peripheral per scan
pub struct DiscoveryAgent {
    scanner: Arc<dyn RadioScanner>,
    permissions: Arc<PermissionManager>,
    signals: SignalSender,
    generation: u64,
    active: Option<ActiveScan>,
}

impl DiscoveryAgent {
    pub fn new(
        scanner: Arc<dyn RadioScanner>,
        permissions: Arc<PermissionManager>,
        signals: SignalSender,
    ) -> Self {
        Self {
            scanner,
            permissions,
            signals,
            generation: 0,
            active: None,
        }
    }

    /// Start a scan and arm its deadline. A scan already in progress is stopped first.
    pub async fn start(&mut self, filter: ScanFilterCriteria, timeout: Duration) -> Result<()> {
        self.stop().await;

        if !self.scanner.radio_enabled().await? {
            return Err(RangingError::RadioDisabled);
        }
        self.permissions.authorize(PermissionScope::Scan).await?;

        self.generation += 1;
        let generation = self.generation;
        info!(
            generation,
            service = %filter.service_uuid,
            timeout_secs = timeout.as_secs(),
            "Starting BLE scan"
        );

        let events = EventSink::new(self.signals.clone(), move |event| WorkflowSignal::Scan {
            scan: generation,
            event,
        });
        self.scanner
            .start_scan(&filter, &ScanSettings::default(), events)
            .await?;

        let signals = self.signals.clone();
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = signals.send(WorkflowSignal::ScanDeadline { scan: generation });
        });

        self.active = Some(ActiveScan {
            generation,
            filter,
            deadline,
        });
        Ok(())
    }

    /// Handle a scan callback. Returns the peripheral on the first match; the
    /// scan is stopped before returning so later results are never seen.
    pub async fn on_scan_event(
        &mut self,
        scan: u64,
        event: ScanEvent,
    ) -> Result<Option<PeripheralHandle>> {
        let filter_matches = match (&self.active, &event) {
            (Some(active), ScanEvent::Advertisement(adv)) if active.generation == scan => {
                active.filter.matches(adv)
            }
            (Some(active), ScanEvent::Failed(_)) if active.generation == scan => true,
            _ => {
                debug!(scan, "Ignoring event from inactive scan");
                return Ok(None);
            }
        };

        match event {
            ScanEvent::Advertisement(adv) => {
                if !filter_matches {
                    debug!(peripheral = %adv.peripheral, "Advertisement does not match filter");
                    return Ok(None);
                }

                info!(
                    peripheral = %adv.peripheral,
                    name = ?adv.local_name,
                    rssi = ?adv.rssi,
                    "Found matching peripheral"
                );
                self.stop().await;
                Ok(Some(adv.peripheral))
            }
            ScanEvent::Failed(code) => {
                warn!(code, "BLE scan failed");
                self.stop().await;
                Err(RangingError::ScanFailure(code))
            }
        }
    }

    /// Handle the scan deadline. A no-op once the scan has matched or stopped.
    pub async fn on_deadline(&mut self, scan: u64) -> Result<()> {
        match &self.active {
            Some(active) if active.generation == scan => {
                info!(scan, "Scan deadline reached without a match");
                self.stop().await;
                Err(RangingError::ScanTimeout)
            }
            _ => {
                debug!(scan, "Ignoring deadline of finished scan");
                Ok(())
            }
        }
    }

    /// Stop the active scan, if any. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.deadline.abort();
            info!(generation = active.generation, "Stopping BLE scan");
            if let Err(e) = self.scanner.stop_scan().await {
                warn!("Failed to stop BLE scan: {}", e);
            }
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for DiscoveryAgent {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.deadline.abort();
        }
    }
}
