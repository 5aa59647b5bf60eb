//! Workflow orchestrator.
//!
//! Sequences discovery → link → pairing → ranging on a single task. Every
//! agent callback arrives as a [`WorkflowSignal`] on one queue and is handled
//! to completion before the next one is looked at, so the workflow state has
//! exactly one writer.
//!
//! ```text
//! Idle ─start→ Scanning ─found→ Connecting ─linkConnected→ LinkConnected
//!      → DiscoveringServices ─pairingTriggered→ Pairing ─bonded→ Paired
//!      → RangingStarting ─started→ RangingActive
//! any failure → Error(kind) | Disconnected → teardown → Idle
//! ```
//!
//! A bonded notification that arrives before the pairing trigger was written
//! is held and acted on once the workflow reaches `Pairing`.

use crate::config::WorkflowConfig;
use crate::discovery::DiscoveryAgent;
use crate::error::ErrorContext;
use crate::link::{LinkAgent, LinkStatus};
use crate::pairing::PairingWatcher;
use crate::platform::Platform;
use crate::ranging::{RangingAgent, RangingStatus};
use crate::signal::{Command, EventSink, SignalReceiver, SignalSender, WorkflowSignal};
use crate::types::{
    BondStateChange, ConnectionState, DistanceSample, LinkEvent, PeripheralHandle,
    RangingCapabilities, RangingRateTier, ScanEvent, SessionEvent, NO_DISTANCE,
};
use crate::{RangingError, Result};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Ordered output for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowUpdate {
    State(ConnectionState),
    Status(String),
    Distance(DistanceSample),
    /// A command was refused without affecting the workflow
    Rejected(RangingError),
}

/// Latest value of the three observable signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayState {
    pub status: String,
    pub connection: String,
    pub distance: String,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            status: "Idle".to_string(),
            connection: ConnectionState::Idle.to_string(),
            distance: NO_DISTANCE.to_string(),
        }
    }
}

/// Orchestrator-owned workflow state
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub phase: ConnectionState,
    pub target: Option<PeripheralHandle>,
    pub rate: RangingRateTier,
}

/// Command side of the workflow, cheap to clone
#[derive(Clone)]
pub struct WorkflowHandle {
    commands: SignalSender,
    display: watch::Receiver<DisplayState>,
}

impl WorkflowHandle {
    pub fn start_workflow(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn set_rate_tier(&self, tier: RangingRateTier) -> Result<()> {
        self.send(Command::SetRateTier(tier))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn display(&self) -> watch::Receiver<DisplayState> {
        self.display.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(WorkflowSignal::Command(command))
            .map_err(|_| RangingError::Platform("workflow has shut down".to_string()))
    }
}

pub struct Orchestrator {
    config: WorkflowConfig,
    state: WorkflowState,
    discovery: DiscoveryAgent,
    link: LinkAgent,
    pairing: PairingWatcher,
    ranging: RangingAgent,
    bonds: broadcast::Sender<BondStateChange>,
    signals: SignalSender,
    queue: SignalReceiver,
    updates: mpsc::UnboundedSender<WorkflowUpdate>,
    updates_rx: Option<mpsc::UnboundedReceiver<WorkflowUpdate>>,
    display: watch::Sender<DisplayState>,
    /// Target bonded before the workflow reached `Pairing`
    bond_pending: bool,
}

impl Orchestrator {
    pub fn new(platform: Platform, config: WorkflowConfig) -> (Self, WorkflowHandle) {
        let (signals, queue) = mpsc::unbounded_channel();
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (display, display_rx) = watch::channel(DisplayState::default());

        let discovery = DiscoveryAgent::new(
            platform.scanner,
            platform.permissions.clone(),
            signals.clone(),
        );
        let link = LinkAgent::new(
            platform.links,
            platform.permissions.clone(),
            signals.clone(),
            config.pairing.clone(),
        );
        let ranging = RangingAgent::new(
            platform.ranging,
            platform.permissions,
            signals.clone(),
            config.ranging,
        );

        let handle = WorkflowHandle {
            commands: signals.clone(),
            display: display_rx,
        };

        let orchestrator = Self {
            state: WorkflowState {
                phase: ConnectionState::Idle,
                target: None,
                rate: config.initial_rate,
            },
            config,
            discovery,
            link,
            pairing: PairingWatcher::new(),
            ranging,
            bonds: platform.bonds,
            signals,
            queue,
            updates,
            updates_rx: Some(updates_rx),
            display,
            bond_pending: false,
        };

        (orchestrator, handle)
    }

    /// Ordered update stream. Can be taken once.
    pub fn take_updates(&mut self) -> Option<mpsc::UnboundedReceiver<WorkflowUpdate>> {
        self.updates_rx.take()
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Attach the pairing watcher to the system bond broadcast
    pub fn subscribe_bonds(&mut self) {
        let events = EventSink::new(self.signals.clone(), WorkflowSignal::Bond);
        self.pairing.subscribe(self.bonds.subscribe(), events);
    }

    /// Run until a shutdown command arrives, then tear everything down
    pub async fn run(mut self) {
        info!("Ranging workflow started");
        self.subscribe_bonds();

        while let Some(signal) = self.queue.recv().await {
            if signal == WorkflowSignal::Command(Command::Shutdown) {
                break;
            }
            self.process(signal).await;
        }

        self.shutdown().await;
        info!("Ranging workflow stopped");
    }

    /// Wait for and handle one signal
    pub async fn step(&mut self) -> bool {
        match self.queue.recv().await {
            Some(signal) => {
                self.process(signal).await;
                true
            }
            None => false,
        }
    }

    /// Handle every signal already queued, without waiting
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(signal) = self.queue.try_recv() {
            self.process(signal).await;
            handled += 1;
        }
        handled
    }

    /// Full teardown plus detaching from the bond broadcast
    pub async fn shutdown(&mut self) {
        self.teardown(true).await;
        self.pairing.unsubscribe();
        self.transition(ConnectionState::Idle);
    }

    pub async fn process(&mut self, signal: WorkflowSignal) {
        let operation = signal.operation();
        let outcome = match signal {
            WorkflowSignal::Command(Command::Start) => self.on_start().await,
            WorkflowSignal::Command(Command::SetRateTier(tier)) => self.on_set_rate(tier).await,
            WorkflowSignal::Command(Command::Shutdown) => {
                self.shutdown().await;
                Ok(())
            }
            WorkflowSignal::Scan { scan, event } => self.on_scan(scan, event).await,
            WorkflowSignal::ScanDeadline { scan } => self.on_scan_deadline(scan).await,
            WorkflowSignal::Link { link, event } => self.on_link(link, event).await,
            WorkflowSignal::Bond(change) => self.on_bond(change).await,
            WorkflowSignal::Capabilities {
                listener,
                capabilities,
            } => self.on_capabilities(listener, capabilities).await,
            WorkflowSignal::Session { session, event } => {
                self.on_session(session, event).await
            }
        };

        if let Err(e) = outcome {
            self.fail(e, operation).await;
        }
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.state.phase != ConnectionState::Idle {
            info!(state = %self.state.phase, "Restarting workflow");
        }
        self.teardown(true).await;
        self.ranging.ensure_host_support().await?;

        self.display.send_modify(|d| d.distance = NO_DISTANCE.to_string());
        self.transition(ConnectionState::Scanning);
        self.status("Scanning for ranging peripheral...");

        self.discovery
            .start(self.config.scan.filter.clone(), self.config.scan.timeout)
            .await
    }

    async fn on_scan(&mut self, scan: u64, event: ScanEvent) -> Result<()> {
        let Some(peripheral) = self.discovery.on_scan_event(scan, event).await? else {
            return Ok(());
        };
        if let Some(target) = &self.state.target {
            debug!(target = %target, ignored = %peripheral, "Target already selected");
            return Ok(());
        }

        self.state.target = Some(peripheral.clone());
        self.pairing.observe(&peripheral);
        self.transition(ConnectionState::Connecting);
        self.status(format!("Found: {}. Connecting...", peripheral));

        self.link.connect(&peripheral).await
    }

    async fn on_scan_deadline(&mut self, scan: u64) -> Result<()> {
        if self.state.target.is_some() {
            debug!(scan, "Scan deadline after target was selected");
            return Ok(());
        }
        self.discovery.on_deadline(scan).await
    }

    async fn on_link(&mut self, link: u64, event: LinkEvent) -> Result<()> {
        if self.state.target.is_none() {
            // only a link kept after a failed run can still report here
            if let Err(e) = self.link.on_link_event(link, event).await {
                debug!("Retained link ended: {}", e);
            }
            return Ok(());
        }

        match self.link.on_link_event(link, event).await? {
            Some(LinkStatus::Connected) => {
                self.transition(ConnectionState::LinkConnected);
                self.status("GATT connected. Discovering services...");
                self.transition(ConnectionState::DiscoveringServices);

                if self.link.discover_and_trigger().await? == LinkStatus::PairingTriggered {
                    self.transition(ConnectionState::Pairing);
                    self.status("Triggering pairing...");

                    if std::mem::take(&mut self.bond_pending) {
                        if let Some(peripheral) = self.state.target.clone() {
                            info!(peripheral = %peripheral, "Target bonded earlier");
                            self.begin_ranging(&peripheral).await?;
                        }
                    }
                }
                Ok(())
            }
            Some(LinkStatus::PairingTriggered) | None => Ok(()),
        }
    }

    async fn on_bond(&mut self, change: BondStateChange) -> Result<()> {
        let current = self.state.target.clone();
        if self.pairing.on_bond_change(&change, current.as_ref()).is_none() {
            return Ok(());
        }
        let Some(peripheral) = current else {
            return Ok(());
        };
        if self.state.phase.awaiting_bond() {
            return self.begin_ranging(&peripheral).await;
        }
        if self.state.phase.pairing_started() {
            debug!(state = %self.state.phase, "Bonded after ranging was started");
        } else {
            debug!(state = %self.state.phase, "Bonded before pairing was triggered");
            self.bond_pending = true;
        }
        Ok(())
    }

    async fn begin_ranging(&mut self, peripheral: &PeripheralHandle) -> Result<()> {
        self.transition(ConnectionState::Paired);
        self.status("Paired. Starting ranging...");

        self.ranging.start_session(peripheral, self.state.rate).await?;
        self.transition(ConnectionState::RangingStarting);
        Ok(())
    }

    async fn on_capabilities(
        &mut self,
        listener: u64,
        capabilities: Option<RangingCapabilities>,
    ) -> Result<()> {
        if let Some(status) = self.ranging.on_capabilities(listener, capabilities).await? {
            self.apply_ranging_status(status);
        }
        Ok(())
    }

    async fn on_session(&mut self, session: u64, event: SessionEvent) -> Result<()> {
        if let Some(status) = self.ranging.on_session_event(session, event).await? {
            self.apply_ranging_status(status);
        }
        Ok(())
    }

    fn apply_ranging_status(&mut self, status: RangingStatus) {
        match status {
            RangingStatus::StartRequested { add_device_error } => match add_device_error {
                Some(reason) => self.status(format!("Add device failed: {}", reason)),
                None => self.status("Opening ranging session..."),
            },
            RangingStatus::Opened => self.status("Ranging session opened"),
            RangingStatus::Started(_) => {
                self.transition(ConnectionState::RangingActive);
                self.status("Ranging started");
            }
            RangingStatus::Stopped(_) => self.status("Ranging stopped"),
            RangingStatus::Distance(sample) => {
                let text = sample.display();
                self.display.send_modify(|d| d.distance = text);
                let _ = self.updates.send(WorkflowUpdate::Distance(sample));
            }
        }
    }

    /// Switch the rate tier; restarts a live session against the same target.
    /// The tier is kept for the next session even when there is no target.
    async fn on_set_rate(&mut self, tier: RangingRateTier) -> Result<()> {
        if tier == self.state.rate {
            debug!(%tier, "Rate tier unchanged");
            return Ok(());
        }
        self.state.rate = tier;

        let Some(peripheral) = self.state.target.clone() else {
            let rejection = RangingError::NoTarget;
            warn!(%tier, "Rate change rejected: no target");
            self.status(rejection.user_message());
            let _ = self.updates.send(WorkflowUpdate::Rejected(rejection));
            return Ok(());
        };

        if !self.state.phase.ranging() {
            self.status(format!("Update rate set to {}", tier));
            return Ok(());
        }

        info!(peripheral = %peripheral, %tier, "Restarting ranging with new rate");
        self.status("Restarting ranging with new rate...");
        self.ranging.stop_session().await;
        self.ranging.start_session(&peripheral, tier).await?;
        self.transition(ConnectionState::RangingStarting);
        Ok(())
    }

    /// Terminal failure of the current run: report, tear down, return to Idle.
    /// A link that is up stays open after a missing control point or missing
    /// ranging support; the next start or shutdown closes it.
    async fn fail(&mut self, error: RangingError, operation: &str) {
        let mut context = ErrorContext::new()
            .with_state(self.state.phase)
            .with_operation(operation);
        if let Some(target) = &self.state.target {
            context = context.with_peripheral(target.to_string());
        }
        error.log_with_context(&context);

        let failed = if error == RangingError::LinkLost && self.state.phase.pairing_started() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Error(error.kind())
        };
        self.transition(failed);
        self.status(error.user_message());

        self.teardown(!error.retains_link()).await;
        self.transition(ConnectionState::Idle);
    }

    /// Release everything this run holds: scan, then session → connection → handle
    async fn teardown(&mut self, close_link: bool) {
        self.discovery.stop().await;
        self.ranging.stop_session().await;
        if close_link {
            self.link.close().await;
        } else if let Some(peripheral) = self.link.peripheral() {
            info!(peripheral = %peripheral, "Leaving GATT link open");
        }
        if let Some(target) = self.state.target.take() {
            debug!(peripheral = %target, "Cleared target");
        }
        self.pairing.clear();
        self.bond_pending = false;
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state.phase == next {
            return;
        }
        debug!(from = %self.state.phase, to = %next, "State transition");
        self.state.phase = next;

        let label = next.to_string();
        self.display.send_modify(|d| d.connection = label);
        let _ = self.updates.send(WorkflowUpdate::State(next));
    }

    fn status(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(status = %message);

        let _ = self.updates.send(WorkflowUpdate::Status(message.clone()));
        self.display.send_modify(|d| d.status = message);
    }
}
