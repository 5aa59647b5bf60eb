// Ranging session configuration
// Binds a peripheral and a rate tier to the fixed channel-sounding parameters

use crate::types::{PeripheralHandle, RangingRateTier};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lowest channel-sounding security level; the one every session requests
pub const CS_SECURITY_LEVEL_ONE: u8 = 1;

/// Default cap on measurements per session
pub const DEFAULT_MEASUREMENT_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationType {
    Unknown,
    Indoor,
    Outdoor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SightType {
    Unknown,
    LineOfSight,
    NonLineOfSight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsRangingParams {
    pub address: String,
    pub update_rate: RangingRateTier,
    pub security_level: u8,
    pub location_type: LocationType,
    pub sight_type: SightType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRangingDevice {
    pub device_id: Uuid,
    pub cs_params: CsRangingParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInitiatorConfig {
    pub devices: Vec<RawRangingDevice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub measurement_limit: u32,
    pub angle_of_arrival: bool,
    /// Motion-assisted (sensor fusion) filtering of results
    pub sensor_fusion: bool,
}

/// Everything a ranging service needs to open and start a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangingPreference {
    pub role: DeviceRole,
    pub config: RawInitiatorConfig,
    pub session: SessionConfig,
}

/// Fixed per-deployment ranging parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangingParams {
    pub security_level: u8,
    pub location_type: LocationType,
    pub sight_type: SightType,
    pub measurement_limit: u32,
    pub angle_of_arrival: bool,
    pub sensor_fusion: bool,
}

impl Default for RangingParams {
    fn default() -> Self {
        Self {
            security_level: CS_SECURITY_LEVEL_ONE,
            location_type: LocationType::Unknown,
            sight_type: SightType::Unknown,
            measurement_limit: DEFAULT_MEASUREMENT_LIMIT,
            angle_of_arrival: true,
            sensor_fusion: true,
        }
    }
}

impl RangingParams {
    /// Build an initiator preference for one peripheral
    pub fn build_preference(
        &self,
        peripheral: &PeripheralHandle,
        tier: RangingRateTier,
    ) -> RangingPreference {
        let device = RawRangingDevice {
            device_id: peripheral.ranging_device_id(),
            cs_params: CsRangingParams {
                address: peripheral.address().to_string(),
                update_rate: tier,
                security_level: self.security_level,
                location_type: self.location_type,
                sight_type: self.sight_type,
            },
        };

        RangingPreference {
            role: DeviceRole::Initiator,
            config: RawInitiatorConfig {
                devices: vec![device],
            },
            session: SessionConfig {
                measurement_limit: self.measurement_limit,
                angle_of_arrival: self.angle_of_arrival,
                sensor_fusion: self.sensor_fusion,
            },
        }
    }
}
