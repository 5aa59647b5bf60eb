pub mod types;
pub mod error;
pub mod permissions;
pub mod signal;
pub mod preference;
pub mod config;
pub mod platform;
pub mod discovery;
pub mod link;
pub mod pairing;
pub mod ranging;
pub mod orchestrator;
pub mod btle;

pub use types::*;
pub use error::{ErrorContext, FailureKind, RangingError, Result};
pub use permissions::{PermissionManager, PermissionScope, PermissionStatus};
pub use signal::{Command, EventSink, WorkflowSignal};
pub use preference::{RangingParams, RangingPreference, RawInitiatorConfig};
pub use config::{WorkflowConfig, RAS_CONTROL_POINT_UUID, RAS_SERVICE_UUID};
pub use platform::{LinkService, Platform, RadioScanner, RangingService};
pub use discovery::DiscoveryAgent;
pub use link::{LinkAgent, LinkStatus};
pub use pairing::{PairingEvent, PairingWatcher};
pub use ranging::{RangingAgent, RangingStatus};
pub use orchestrator::{DisplayState, Orchestrator, WorkflowHandle, WorkflowState, WorkflowUpdate};
pub use btle::{BtleRadio, UnavailableRanging};
