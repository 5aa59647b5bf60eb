use crate::error::{FailureKind, RangingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a discovered peripheral: its normalized 48-bit device address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeripheralHandle(String);

impl PeripheralHandle {
    /// Parse a `AA:BB:CC:DD:EE:FF` address. `-` separators and lower-case
    /// digits are accepted and normalized.
    pub fn parse(address: &str) -> Result<Self> {
        let octets: Vec<&str> = address.split(|c| c == ':' || c == '-').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));

        if !valid {
            return Err(RangingError::InvalidAddress(address.to_string()));
        }

        Ok(Self(octets.join(":").to_ascii_uppercase()))
    }

    pub fn address(&self) -> &str {
        &self.0
    }

    /// Stable name-based id used to refer to this peripheral inside a ranging session
    pub fn ranging_device_id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, self.0.as_bytes())
    }
}

impl std::fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PeripheralHandle {
    type Err = RangingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Workflow phase. Owned by the orchestrator, reported one way to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    LinkConnected,
    DiscoveringServices,
    Pairing,
    Paired,
    RangingStarting,
    RangingActive,
    Error(FailureKind),
    Disconnected,
}

impl ConnectionState {
    /// Whether the pairing handshake has been initiated in this run
    pub fn pairing_started(&self) -> bool {
        matches!(
            self,
            ConnectionState::Pairing
                | ConnectionState::Paired
                | ConnectionState::RangingStarting
                | ConnectionState::RangingActive
        )
    }

    /// States in which a bonded notification may advance the workflow
    pub fn awaiting_bond(&self) -> bool {
        matches!(
            self,
            ConnectionState::LinkConnected
                | ConnectionState::DiscoveringServices
                | ConnectionState::Pairing
        )
    }

    pub fn ranging(&self) -> bool {
        matches!(
            self,
            ConnectionState::RangingStarting | ConnectionState::RangingActive
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Scanning => write!(f, "Scanning"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::LinkConnected => write!(f, "GATT connected"),
            ConnectionState::DiscoveringServices => write!(f, "Discovering services"),
            ConnectionState::Pairing => write!(f, "Pairing"),
            ConnectionState::Paired => write!(f, "Paired"),
            ConnectionState::RangingStarting => write!(f, "Ranging starting"),
            ConnectionState::RangingActive => write!(f, "Ranging started"),
            ConnectionState::Error(kind) => write!(f, "Error: {}", kind),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Requested frequency class for ranging updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RangingRateTier {
    #[default]
    Normal,
    Frequent,
    Infrequent,
}

impl std::fmt::Display for RangingRateTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangingRateTier::Normal => write!(f, "normal"),
            RangingRateTier::Frequent => write!(f, "frequent"),
            RangingRateTier::Infrequent => write!(f, "infrequent"),
        }
    }
}

impl std::str::FromStr for RangingRateTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(RangingRateTier::Normal),
            "frequent" => Ok(RangingRateTier::Frequent),
            "infrequent" => Ok(RangingRateTier::Infrequent),
            other => Err(format!("unknown rate tier: {}", other)),
        }
    }
}

/// A single distance measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceSample {
    pub peripheral: PeripheralHandle,
    pub meters: f64,
    pub at: DateTime<Utc>,
}

impl DistanceSample {
    pub fn display(&self) -> String {
        format!("{:.2} m", self.meters)
    }
}

/// Placeholder shown before the first sample of a run
pub const NO_DISTANCE: &str = "-- m";

/// Scan filter applied to advertisements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilterCriteria {
    pub service_uuid: Uuid,
    pub name_prefix: Option<String>,
}

impl ScanFilterCriteria {
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        if !advertisement.services.contains(&self.service_uuid) {
            return false;
        }

        match &self.name_prefix {
            Some(prefix) => advertisement
                .local_name
                .as_deref()
                .map(|name| name.starts_with(prefix.as_str()))
                .unwrap_or(false),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            mode: ScanMode::LowLatency,
        }
    }
}

/// One advertisement seen during a scan
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub peripheral: PeripheralHandle,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
}

/// Scan callbacks delivered by a [`crate::platform::RadioScanner`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Advertisement(Advertisement),
    Failed(i32),
}

/// Platform handle for an opened link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Link callbacks delivered by a [`crate::platform::LinkService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    /// The connection attempt itself failed; the link never came up
    ConnectFailed { status: i32 },
    Disconnected { status: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Result of attribute discovery on a link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeTree {
    pub services: Vec<GattService>,
}

impl AttributeTree {
    pub fn service(&self, uuid: Uuid) -> Option<&GattService> {
        self.services.iter().find(|s| s.uuid == uuid)
    }

    pub fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.service(service)
            .map(|s| s.characteristics.contains(&characteristic))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

/// System-wide bond state notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondStateChange {
    pub device: PeripheralHandle,
    pub old: BondState,
    pub new: BondState,
}

/// Platform handle for a capability listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Platform handle for a ranging session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsCapabilities {
    pub supported_security_levels: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangingCapabilities {
    pub channel_sounding: Option<CsCapabilities>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangingTechnology {
    Uwb,
    BleChannelSounding,
    BleRssi,
    WifiNan,
    Other(i32),
}

impl std::fmt::Display for RangingTechnology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangingTechnology::Uwb => write!(f, "UWB"),
            RangingTechnology::BleChannelSounding => write!(f, "BLE CS"),
            RangingTechnology::BleRssi => write!(f, "BLE RSSI"),
            RangingTechnology::WifiNan => write!(f, "Wi-Fi NAN"),
            RangingTechnology::Other(code) => write!(f, "technology {}", code),
        }
    }
}

/// Ranging session callbacks delivered by a [`crate::platform::RangingService`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened,
    OpenFailed(i32),
    Started {
        peer: Uuid,
        technology: RangingTechnology,
    },
    Stopped {
        peer: Uuid,
        technology: RangingTechnology,
    },
    Closed(i32),
    Results {
        peer: Uuid,
        distance: Option<f64>,
    },
}
