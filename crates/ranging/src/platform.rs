// Platform abstraction layer for the ranging workflow
// Contracts for the radio, link, bonding and ranging collaborators

use crate::permissions::PermissionManager;
use crate::preference::{RangingPreference, RawInitiatorConfig};
use crate::signal::EventSink;
use crate::types::{
    AttributeTree, BondStateChange, ConnectionId, LinkEvent, ListenerId, PeripheralHandle,
    RangingCapabilities, ScanEvent, ScanFilterCriteria, ScanSettings, SessionEvent, SessionId,
};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Radio scan service
#[async_trait]
pub trait RadioScanner: Send + Sync {
    /// Whether the radio is powered and usable
    async fn radio_enabled(&self) -> Result<bool> {
        Ok(true)
    }

    /// Start scanning; results and runtime failures are delivered through `events`
    async fn start_scan(
        &self,
        filter: &ScanFilterCriteria,
        settings: &ScanSettings,
        events: EventSink<ScanEvent>,
    ) -> Result<()>;

    /// Stop the scan started by `start_scan`
    async fn stop_scan(&self) -> Result<()>;
}

/// Link (GATT client) service
#[async_trait]
pub trait LinkService: Send + Sync {
    /// Request a link. Connection state changes arrive through `events`.
    async fn open_link(
        &self,
        peripheral: &PeripheralHandle,
        events: EventSink<LinkEvent>,
    ) -> Result<ConnectionId>;

    /// Discover services and characteristics on an established link
    async fn discover_attributes(&self, connection: ConnectionId) -> Result<AttributeTree>;

    /// Write a characteristic value and wait for the acknowledgement
    async fn write_attribute(
        &self,
        connection: ConnectionId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Release the link
    async fn close_link(&self, connection: ConnectionId) -> Result<()>;
}

/// Ranging service
#[async_trait]
pub trait RangingService: Send + Sync {
    /// Whether the host has BLE channel sounding at all
    async fn channel_sounding_supported(&self) -> Result<bool> {
        Ok(true)
    }

    /// Register for capability reports. `None` means ranging is unavailable.
    async fn register_capabilities(
        &self,
        events: EventSink<Option<RangingCapabilities>>,
    ) -> Result<ListenerId>;

    async fn unregister_capabilities(&self, listener: ListenerId) -> Result<()>;

    /// Create a session whose lifecycle and results arrive through `events`
    async fn create_session(&self, events: EventSink<SessionEvent>) -> Result<SessionId>;

    async fn add_device(&self, session: SessionId, config: &RawInitiatorConfig) -> Result<()>;

    async fn start(&self, session: SessionId, preference: &RangingPreference) -> Result<()>;

    async fn close(&self, session: SessionId) -> Result<()>;
}

/// The full set of collaborators the orchestrator is wired to
#[derive(Clone)]
pub struct Platform {
    pub scanner: Arc<dyn RadioScanner>,
    pub links: Arc<dyn LinkService>,
    pub ranging: Arc<dyn RangingService>,
    /// System-wide, unfiltered bond state broadcast
    pub bonds: broadcast::Sender<BondStateChange>,
    pub permissions: Arc<PermissionManager>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("bond_subscribers", &self.bonds.receiver_count())
            .field("permissions", &self.permissions)
            .finish()
    }
}
