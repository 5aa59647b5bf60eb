use crate::preference::RangingParams;
use crate::types::{RangingRateTier, ScanFilterCriteria};
use std::env;
use std::time::Duration;
use uuid::Uuid;

/// Bluetooth Ranging Service
pub const RAS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000185B_0000_1000_8000_00805F9B34FB);

/// RAS control point; writing it on an unbonded link makes the peripheral request pairing
pub const RAS_CONTROL_POINT_UUID: Uuid = Uuid::from_u128(0x00002C17_0000_1000_8000_00805F9B34FB);

pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    pub scan: ScanConfig,
    pub pairing: PairingTriggerConfig,
    pub ranging: RangingParams,
    pub initial_rate: RangingRateTier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub filter: ScanFilterCriteria,
    pub timeout: Duration,
}

/// Characteristic written once to initiate pairing
#[derive(Debug, Clone, PartialEq)]
pub struct PairingTriggerConfig {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub value: Vec<u8>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig {
                filter: ScanFilterCriteria {
                    service_uuid: RAS_SERVICE_UUID,
                    name_prefix: None,
                },
                timeout: Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS),
            },
            pairing: PairingTriggerConfig {
                service_uuid: RAS_SERVICE_UUID,
                characteristic_uuid: RAS_CONTROL_POINT_UUID,
                value: vec![0x00],
            },
            ranging: RangingParams::default(),
            initial_rate: RangingRateTier::Normal,
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        let service_uuid = match env::var("RANGING_SERVICE_UUID") {
            Ok(value) => Uuid::parse_str(&value)?,
            Err(_) => RAS_SERVICE_UUID,
        };
        let characteristic_uuid = match env::var("RANGING_CONTROL_POINT_UUID") {
            Ok(value) => Uuid::parse_str(&value)?,
            Err(_) => RAS_CONTROL_POINT_UUID,
        };
        let initial_rate = match env::var("RANGING_UPDATE_RATE") {
            Ok(value) => value.parse().map_err(anyhow::Error::msg)?,
            Err(_) => defaults.initial_rate,
        };

        Ok(WorkflowConfig {
            scan: ScanConfig {
                filter: ScanFilterCriteria {
                    service_uuid,
                    name_prefix: env::var("RANGING_DEVICE_NAME_PREFIX")
                        .ok()
                        .filter(|p| !p.is_empty()),
                },
                timeout: Duration::from_secs(
                    env::var("RANGING_SCAN_TIMEOUT_SECS")
                        .unwrap_or_else(|_| DEFAULT_SCAN_TIMEOUT_SECS.to_string())
                        .parse()?,
                ),
            },
            pairing: PairingTriggerConfig {
                service_uuid,
                characteristic_uuid,
                value: defaults.pairing.value,
            },
            ranging: RangingParams {
                security_level: env::var("RANGING_SECURITY_LEVEL")
                    .unwrap_or_else(|_| defaults.ranging.security_level.to_string())
                    .parse()?,
                measurement_limit: env::var("RANGING_MEASUREMENT_LIMIT")
                    .unwrap_or_else(|_| defaults.ranging.measurement_limit.to_string())
                    .parse()?,
                sensor_fusion: env::var("RANGING_SENSOR_FUSION")
                    .unwrap_or_else(|_| defaults.ranging.sensor_fusion.to_string())
                    .parse()?,
                ..defaults.ranging
            },
            initial_rate,
        })
    }
}
