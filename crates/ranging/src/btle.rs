// btleplug backed radio and link services
// Central-role scanning and GATT access; desktop stacks expose no channel sounding

use crate::platform::{LinkService, RadioScanner, RangingService};
use crate::preference::{RangingPreference, RawInitiatorConfig};
use crate::signal::EventSink;
use crate::types::{
    Advertisement, AttributeTree, BondState, BondStateChange, ConnectionId, GattService,
    LinkEvent, ListenerId, PeripheralHandle, RangingCapabilities, ScanEvent, ScanFilterCriteria,
    ScanSettings, SessionEvent, SessionId,
};
use crate::{RangingError, Result};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reported when the adapter event stream ends while a scan is running
pub const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

/// Reported when a connection attempt fails after the link was requested
pub const GATT_ERROR: i32 = 133;

struct OpenLink {
    peripheral: Peripheral,
    handle: PeripheralHandle,
    watcher: JoinHandle<()>,
}

/// Radio scanner and link service on top of the first system adapter
pub struct BtleRadio {
    adapter: Arc<RwLock<Option<Adapter>>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    links: Mutex<HashMap<ConnectionId, OpenLink>>,
    next_link: AtomicU64,
    bonds: Option<broadcast::Sender<BondStateChange>>,
}

impl BtleRadio {
    pub fn new() -> Self {
        Self {
            adapter: Arc::new(RwLock::new(None)),
            scan_task: Mutex::new(None),
            links: Mutex::new(HashMap::new()),
            next_link: AtomicU64::new(1),
            bonds: None,
        }
    }

    /// Publish a bonded notification when a trigger write is acknowledged.
    ///
    /// btleplug has no bond events; the control point only acknowledges
    /// writes on an encrypted link, so an acknowledged write means bonded.
    pub fn with_bond_notifications(mut self, bonds: broadcast::Sender<BondStateChange>) -> Self {
        self.bonds = Some(bonds);
        self
    }

    async fn adapter(&self) -> Result<Adapter> {
        if let Some(adapter) = self.adapter.read().await.as_ref() {
            return Ok(adapter.clone());
        }

        let mut adapter_lock = self.adapter.write().await;
        if let Some(adapter) = adapter_lock.as_ref() {
            return Ok(adapter.clone());
        }

        debug!("Creating BLE manager and adapter");
        let manager = Manager::new()
            .await
            .map_err(|e| RangingError::Platform(format!("Failed to create BLE manager: {}", e)))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| RangingError::Platform(format!("Failed to get BLE adapters: {}", e)))?
            .into_iter()
            .next()
            .ok_or(RangingError::RadioDisabled)?;

        info!("BLE adapter initialized: {:?}", adapter.adapter_info().await);
        *adapter_lock = Some(adapter.clone());
        Ok(adapter)
    }

    async fn find_peripheral(adapter: &Adapter, target: &PeripheralHandle) -> Result<Peripheral> {
        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| RangingError::Platform(format!("Failed to get peripherals: {}", e)))?;

        peripherals
            .into_iter()
            .find(|p| PeripheralHandle::parse(&p.address().to_string()).ok().as_ref() == Some(target))
            .ok_or_else(|| RangingError::ConnectFailure(format!("{} not in range", target)))
    }

    async fn advertisement(peripheral: &Peripheral) -> Option<Advertisement> {
        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => return None,
            Err(e) => {
                debug!("Failed to get peripheral properties: {}", e);
                return None;
            }
        };

        let handle = match PeripheralHandle::parse(&properties.address.to_string()) {
            Ok(handle) => handle,
            Err(e) => {
                debug!("Skipping advertisement: {}", e);
                return None;
            }
        };

        Some(Advertisement {
            peripheral: handle,
            local_name: properties.local_name,
            rssi: properties.rssi,
            services: properties.services,
        })
    }

    async fn link(&self, connection: ConnectionId) -> Result<Peripheral> {
        self.links
            .lock()
            .await
            .get(&connection)
            .map(|l| l.peripheral.clone())
            .ok_or(RangingError::LinkLost)
    }
}

impl Default for BtleRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioScanner for BtleRadio {
    async fn radio_enabled(&self) -> Result<bool> {
        match self.adapter().await {
            Ok(_) => Ok(true),
            Err(RangingError::RadioDisabled) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn start_scan(
        &self,
        filter: &ScanFilterCriteria,
        settings: &ScanSettings,
        events: EventSink<ScanEvent>,
    ) -> Result<()> {
        let adapter = self.adapter().await?;
        let mut stream = adapter
            .events()
            .await
            .map_err(|e| RangingError::Platform(format!("Failed to get adapter events: {}", e)))?;

        debug!(mode = ?settings.mode, "Scan settings");
        adapter
            .start_scan(ScanFilter {
                services: vec![filter.service_uuid],
            })
            .await
            .map_err(|e| RangingError::Platform(format!("Failed to start BLE scan: {}", e)))?;

        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                if let Some(advertisement) = Self::advertisement(&peripheral).await {
                    if !events.emit(ScanEvent::Advertisement(advertisement)) {
                        return;
                    }
                }
            }
            error!("Adapter event stream ended during scan");
            events.emit(ScanEvent::Failed(SCAN_FAILED_INTERNAL_ERROR));
        });

        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }

        let adapter = self.adapter().await?;
        adapter
            .stop_scan()
            .await
            .map_err(|e| RangingError::Platform(format!("Failed to stop BLE scan: {}", e)))
    }
}

#[async_trait]
impl LinkService for BtleRadio {
    async fn open_link(
        &self,
        peripheral: &PeripheralHandle,
        events: EventSink<LinkEvent>,
    ) -> Result<ConnectionId> {
        let adapter = self.adapter().await?;
        let device = Self::find_peripheral(&adapter, peripheral).await?;
        let mut stream = adapter
            .events()
            .await
            .map_err(|e| RangingError::Platform(format!("Failed to get adapter events: {}", e)))?;

        let connection = ConnectionId(self.next_link.fetch_add(1, Ordering::Relaxed));
        let link = device.clone();
        let watcher = tokio::spawn(async move {
            if let Err(e) = link.connect().await {
                warn!("Connection attempt failed: {}", e);
                events.emit(LinkEvent::ConnectFailed { status: GATT_ERROR });
                return;
            }
            if !events.emit(LinkEvent::Connected) {
                return;
            }

            let id = link.id();
            while let Some(event) = stream.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        events.emit(LinkEvent::Disconnected { status: 0 });
                        return;
                    }
                }
            }
        });

        self.links.lock().await.insert(
            connection,
            OpenLink {
                peripheral: device,
                handle: peripheral.clone(),
                watcher,
            },
        );
        Ok(connection)
    }

    async fn discover_attributes(&self, connection: ConnectionId) -> Result<AttributeTree> {
        let peripheral = self.link(connection).await?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| RangingError::ServiceDiscoveryFailure(e.to_string()))?;

        let services = peripheral
            .services()
            .into_iter()
            .map(|service| GattService {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect();
        Ok(AttributeTree { services })
    }

    async fn write_attribute(
        &self,
        connection: ConnectionId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let peripheral = self.link(connection).await?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or(RangingError::ServiceNotFound)?;

        peripheral
            .write(&target, value, WriteType::WithResponse)
            .await
            .map_err(|e| RangingError::WriteFailure(e.to_string()))?;

        if let Some(bonds) = &self.bonds {
            if let Some(link) = self.links.lock().await.get(&connection) {
                let _ = bonds.send(BondStateChange {
                    device: link.handle.clone(),
                    old: BondState::Bonding,
                    new: BondState::Bonded,
                });
            }
        }
        Ok(())
    }

    async fn close_link(&self, connection: ConnectionId) -> Result<()> {
        let Some(link) = self.links.lock().await.remove(&connection) else {
            return Ok(());
        };
        link.watcher.abort();

        let connected = link.peripheral.is_connected().await.unwrap_or(false);
        if connected {
            link.peripheral
                .disconnect()
                .await
                .map_err(|e| RangingError::Platform(format!("Disconnect failed: {}", e)))?;
        }
        Ok(())
    }
}

/// Ranging service for hosts without channel sounding. The host check fails
/// and every capability query reports ranging as unavailable.
#[derive(Debug, Default)]
pub struct UnavailableRanging {
    next_listener: AtomicU64,
}

impl UnavailableRanging {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RangingService for UnavailableRanging {
    async fn channel_sounding_supported(&self) -> Result<bool> {
        Ok(false)
    }

    async fn register_capabilities(
        &self,
        events: EventSink<Option<RangingCapabilities>>,
    ) -> Result<ListenerId> {
        events.emit(None);
        Ok(ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed)))
    }

    async fn unregister_capabilities(&self, _listener: ListenerId) -> Result<()> {
        Ok(())
    }

    async fn create_session(&self, _events: EventSink<SessionEvent>) -> Result<SessionId> {
        Err(RangingError::Platform("ranging not available".to_string()))
    }

    async fn add_device(&self, _session: SessionId, _config: &RawInitiatorConfig) -> Result<()> {
        Err(RangingError::Platform("ranging not available".to_string()))
    }

    async fn start(&self, _session: SessionId, _preference: &RangingPreference) -> Result<()> {
        Err(RangingError::Platform("ranging not available".to_string()))
    }

    async fn close(&self, _session: SessionId) -> Result<()> {
        Ok(())
    }
}
