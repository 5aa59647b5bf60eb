// Shared mock platform for ranging workflow tests
#![allow(dead_code)]

use async_trait::async_trait;
use ranging::{
    AttributeTree, BondState, BondStateChange, ConnectionId, CsCapabilities, EventSink,
    GattService, LinkEvent, LinkService, ListenerId, PeripheralHandle, PermissionManager,
    Platform, RadioScanner, RangingCapabilities, RangingError, RangingPreference, RangingService,
    RawInitiatorConfig, Result, ScanEvent, ScanFilterCriteria, ScanSettings, SessionEvent,
    SessionId, Advertisement, RAS_CONTROL_POINT_UUID, RAS_SERVICE_UUID,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const TARGET: &str = "AA:BB:CC:DD:EE:01";
pub const OTHER: &str = "AA:BB:CC:DD:EE:02";

pub fn target() -> PeripheralHandle {
    PeripheralHandle::parse(TARGET).unwrap()
}

pub fn other() -> PeripheralHandle {
    PeripheralHandle::parse(OTHER).unwrap()
}

/// Advertisement carrying the ranging service
pub fn ras_advertisement(address: &str) -> ScanEvent {
    ScanEvent::Advertisement(Advertisement {
        peripheral: PeripheralHandle::parse(address).unwrap(),
        local_name: Some("CS Reflector".to_string()),
        rssi: Some(-55),
        services: vec![RAS_SERVICE_UUID],
    })
}

/// Advertisement without the ranging service
pub fn plain_advertisement(address: &str) -> ScanEvent {
    ScanEvent::Advertisement(Advertisement {
        peripheral: PeripheralHandle::parse(address).unwrap(),
        local_name: Some("Headphones".to_string()),
        rssi: Some(-70),
        services: vec![Uuid::from_u128(0x0000180F_0000_1000_8000_00805F9B34FB)],
    })
}

pub fn bonded(device: &PeripheralHandle) -> BondStateChange {
    BondStateChange {
        device: device.clone(),
        old: BondState::Bonding,
        new: BondState::Bonded,
    }
}

pub fn ras_tree() -> AttributeTree {
    AttributeTree {
        services: vec![GattService {
            uuid: RAS_SERVICE_UUID,
            characteristics: vec![RAS_CONTROL_POINT_UUID],
        }],
    }
}

pub fn cs_capable() -> RangingCapabilities {
    RangingCapabilities {
        channel_sounding: Some(CsCapabilities {
            supported_security_levels: vec![1, 2],
        }),
    }
}

#[derive(Default)]
pub struct MockScanner {
    pub disabled: AtomicBool,
    pub fail_start: Mutex<Option<RangingError>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    sink: Mutex<Option<EventSink<ScanEvent>>>,
}

impl MockScanner {
    /// Deliver a scan callback through the most recent scan's sink
    pub fn emit(&self, event: ScanEvent) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RadioScanner for MockScanner {
    async fn radio_enabled(&self) -> Result<bool> {
        Ok(!self.disabled.load(Ordering::SeqCst))
    }

    async fn start_scan(
        &self,
        _filter: &ScanFilterCriteria,
        _settings: &ScanSettings,
        events: EventSink<ScanEvent>,
    ) -> Result<()> {
        if let Some(e) = self.fail_start.lock().unwrap().clone() {
            return Err(e);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockLinks {
    pub tree: Mutex<AttributeTree>,
    pub fail_open: Mutex<Option<RangingError>>,
    pub fail_write: Mutex<Option<RangingError>>,
    pub opens: AtomicUsize,
    pub discovers: AtomicUsize,
    pub closes: AtomicUsize,
    pub writes: Mutex<Vec<(Uuid, Uuid, Vec<u8>)>>,
    pub opened: Mutex<Vec<PeripheralHandle>>,
    next_id: AtomicU64,
    sink: Mutex<Option<EventSink<LinkEvent>>>,
}

impl Default for MockLinks {
    fn default() -> Self {
        Self {
            tree: Mutex::new(ras_tree()),
            fail_open: Mutex::new(None),
            fail_write: Mutex::new(None),
            opens: AtomicUsize::new(0),
            discovers: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sink: Mutex::new(None),
        }
    }
}

impl MockLinks {
    /// Deliver a link callback through the most recent link's sink
    pub fn emit(&self, event: LinkEvent) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait]
impl LinkService for MockLinks {
    async fn open_link(
        &self,
        peripheral: &PeripheralHandle,
        events: EventSink<LinkEvent>,
    ) -> Result<ConnectionId> {
        if let Some(e) = self.fail_open.lock().unwrap().clone() {
            return Err(e);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.opened.lock().unwrap().push(peripheral.clone());
        *self.sink.lock().unwrap() = Some(events);
        Ok(ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn discover_attributes(&self, _connection: ConnectionId) -> Result<AttributeTree> {
        self.discovers.fetch_add(1, Ordering::SeqCst);
        Ok(self.tree.lock().unwrap().clone())
    }

    async fn write_attribute(
        &self,
        _connection: ConnectionId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        if let Some(e) = self.fail_write.lock().unwrap().clone() {
            return Err(e);
        }
        self.writes
            .lock()
            .unwrap()
            .push((service, characteristic, value.to_vec()));
        Ok(())
    }

    async fn close_link(&self, _connection: ConnectionId) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockRanging {
    /// Host check answers "no channel sounding"
    pub host_unsupported: AtomicBool,
    /// Reported to every capability registration as soon as it is made
    pub capabilities: Mutex<Option<RangingCapabilities>>,
    pub fail_create: Mutex<Option<RangingError>>,
    pub fail_add: Mutex<Option<RangingError>>,
    pub fail_start: Mutex<Option<RangingError>>,
    pub registers: AtomicUsize,
    pub unregisters: AtomicUsize,
    pub creates: AtomicUsize,
    pub adds: AtomicUsize,
    pub starts: AtomicUsize,
    pub closes: AtomicUsize,
    pub preferences: Mutex<Vec<RangingPreference>>,
    next_id: AtomicU64,
    capability_sink: Mutex<Option<EventSink<Option<RangingCapabilities>>>>,
    session_sink: Mutex<Option<EventSink<SessionEvent>>>,
}

impl Default for MockRanging {
    fn default() -> Self {
        Self {
            host_unsupported: AtomicBool::new(false),
            capabilities: Mutex::new(Some(cs_capable())),
            fail_create: Mutex::new(None),
            fail_add: Mutex::new(None),
            fail_start: Mutex::new(None),
            registers: AtomicUsize::new(0),
            unregisters: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            adds: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            preferences: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capability_sink: Mutex::new(None),
            session_sink: Mutex::new(None),
        }
    }
}

impl MockRanging {
    /// Deliver a session callback through the most recent session's sink
    pub fn emit(&self, event: SessionEvent) -> bool {
        match self.session_sink.lock().unwrap().as_ref() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// Re-deliver a capability report through the most recent registration
    pub fn report_capabilities(&self, capabilities: Option<RangingCapabilities>) -> bool {
        match self.capability_sink.lock().unwrap().as_ref() {
            Some(sink) => sink.emit(capabilities),
            None => false,
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn last_preference(&self) -> Option<RangingPreference> {
        self.preferences.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl RangingService for MockRanging {
    async fn channel_sounding_supported(&self) -> Result<bool> {
        Ok(!self.host_unsupported.load(Ordering::SeqCst))
    }

    async fn register_capabilities(
        &self,
        events: EventSink<Option<RangingCapabilities>>,
    ) -> Result<ListenerId> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        events.emit(self.capabilities.lock().unwrap().clone());
        *self.capability_sink.lock().unwrap() = Some(events);
        Ok(ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn unregister_capabilities(&self, _listener: ListenerId) -> Result<()> {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_session(&self, events: EventSink<SessionEvent>) -> Result<SessionId> {
        if let Some(e) = self.fail_create.lock().unwrap().clone() {
            return Err(e);
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        *self.session_sink.lock().unwrap() = Some(events);
        Ok(SessionId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn add_device(&self, _session: SessionId, _config: &RawInitiatorConfig) -> Result<()> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        match self.fail_add.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn start(&self, _session: SessionId, preference: &RangingPreference) -> Result<()> {
        if let Some(e) = self.fail_start.lock().unwrap().clone() {
            return Err(e);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.preferences.lock().unwrap().push(preference.clone());
        Ok(())
    }

    async fn close(&self, _session: SessionId) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock collaborators plus the bond broadcast, wired as a [`Platform`]
pub struct Harness {
    pub scanner: Arc<MockScanner>,
    pub links: Arc<MockLinks>,
    pub ranging: Arc<MockRanging>,
    pub bonds: broadcast::Sender<BondStateChange>,
    pub permissions: Arc<PermissionManager>,
}

impl Harness {
    /// Every permission granted
    pub fn new() -> Self {
        Self::with_permissions(PermissionManager::granted())
    }

    pub fn with_permissions(permissions: PermissionManager) -> Self {
        let (bonds, _) = broadcast::channel(16);
        Self {
            scanner: Arc::new(MockScanner::default()),
            links: Arc::new(MockLinks::default()),
            ranging: Arc::new(MockRanging::default()),
            bonds,
            permissions: Arc::new(permissions),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform {
            scanner: self.scanner.clone(),
            links: self.links.clone(),
            ranging: self.ranging.clone(),
            bonds: self.bonds.clone(),
            permissions: self.permissions.clone(),
        }
    }
}
