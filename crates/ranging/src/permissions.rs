// Permission handling for the ranging workflow
// Single authorization gate consulted before every privileged radio operation

use crate::{RangingError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Privileged operation classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionScope {
    /// Radio scanning
    Scan,
    /// Link connections and attribute access
    Connect,
    /// Ranging sessions
    Ranging,
}

impl PermissionScope {
    pub const ALL: [PermissionScope; 3] = [
        PermissionScope::Scan,
        PermissionScope::Connect,
        PermissionScope::Ranging,
    ];
}

impl std::fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionScope::Scan => write!(f, "BLUETOOTH_SCAN"),
            PermissionScope::Connect => write!(f, "BLUETOOTH_CONNECT"),
            PermissionScope::Ranging => write!(f, "RANGING"),
        }
    }
}

/// Permission status for a specific scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Permission has been granted
    Granted,
    /// Permission has been denied by the user
    Denied,
    /// Permission has not been requested yet
    NotRequested,
    /// Permission is not applicable on this platform
    NotApplicable,
}

/// Tracks the grant state of every scope and gates privileged calls
#[derive(Debug)]
pub struct PermissionManager {
    statuses: Arc<RwLock<HashMap<PermissionScope, PermissionStatus>>>,
}

impl PermissionManager {
    /// Create a new PermissionManager with nothing requested
    pub fn new() -> Self {
        let statuses = PermissionScope::ALL
            .iter()
            .map(|scope| (*scope, PermissionStatus::NotRequested))
            .collect();

        Self {
            statuses: Arc::new(RwLock::new(statuses)),
        }
    }

    /// Create a PermissionManager with every scope already granted
    pub fn granted() -> Self {
        let statuses = PermissionScope::ALL
            .iter()
            .map(|scope| (*scope, PermissionStatus::Granted))
            .collect();

        Self {
            statuses: Arc::new(RwLock::new(statuses)),
        }
    }

    /// Request permission for a scope
    pub async fn request_permission(&self, scope: PermissionScope) -> Result<PermissionStatus> {
        info!("Requesting {} permission", scope);

        let current_status = self.check_permission(scope).await;
        if current_status != PermissionStatus::NotRequested {
            debug!("{} permission already requested: {:?}", scope, current_status);
            return Ok(current_status);
        }

        let status = self.platform_request_permission(scope).await?;
        self.statuses.write().await.insert(scope, status);

        info!("{} permission status: {:?}", scope, status);
        Ok(status)
    }

    /// Request every scope the workflow needs
    pub async fn request_all(&self) -> Result<()> {
        for scope in PermissionScope::ALL {
            self.request_permission(scope).await?;
        }
        Ok(())
    }

    /// Current status for a scope
    pub async fn check_permission(&self, scope: PermissionScope) -> PermissionStatus {
        self.statuses
            .read()
            .await
            .get(&scope)
            .copied()
            .unwrap_or(PermissionStatus::NotRequested)
    }

    /// Whether every scope is granted
    pub async fn has_required_permissions(&self) -> bool {
        let statuses = self.statuses.read().await;
        PermissionScope::ALL
            .iter()
            .all(|scope| statuses.get(scope) == Some(&PermissionStatus::Granted))
    }

    /// The authorization gate: fails fast with a uniform `PermissionDenied`
    pub async fn authorize(&self, scope: PermissionScope) -> Result<()> {
        match self.check_permission(scope).await {
            PermissionStatus::Granted => Ok(()),
            status => {
                warn!("{} permission not available: {:?}", scope, status);
                Err(RangingError::PermissionDenied(scope))
            }
        }
    }

    /// Manually set permission status, used by hosts that own the permission UI
    pub async fn set_permission(&self, scope: PermissionScope, status: PermissionStatus) {
        self.statuses.write().await.insert(scope, status);
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    async fn platform_request_permission(&self, scope: PermissionScope) -> Result<PermissionStatus> {
        // Desktop platforms: no runtime permission prompt
        debug!("Desktop platform: {} permission not required", scope);
        Ok(PermissionStatus::Granted)
    }

    #[cfg(any(target_os = "ios", target_os = "android"))]
    async fn platform_request_permission(&self, scope: PermissionScope) -> Result<PermissionStatus> {
        // Mobile hosts drive the system prompt themselves and report back via set_permission
        debug!("Mobile platform: {} permission must be granted by the host", scope);
        Ok(PermissionStatus::NotRequested)
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permission_manager_creation() {
        let manager = PermissionManager::new();

        for scope in PermissionScope::ALL {
            assert_eq!(manager.check_permission(scope).await, PermissionStatus::NotRequested);
        }
        assert!(!manager.has_required_permissions().await);
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    #[tokio::test]
    async fn test_request_all_on_desktop() {
        let manager = PermissionManager::new();

        manager.request_all().await.unwrap();

        assert!(manager.has_required_permissions().await);
        assert!(manager.authorize(PermissionScope::Ranging).await.is_ok());
    }

    #[tokio::test]
    async fn test_authorize_denied() {
        let manager = PermissionManager::granted();
        manager
            .set_permission(PermissionScope::Scan, PermissionStatus::Denied)
            .await;

        let result = manager.authorize(PermissionScope::Scan).await;
        assert_eq!(result, Err(RangingError::PermissionDenied(PermissionScope::Scan)));
        assert!(manager.authorize(PermissionScope::Connect).await.is_ok());
        assert!(!manager.has_required_permissions().await);
    }

    #[tokio::test]
    async fn test_authorize_not_requested() {
        let manager = PermissionManager::new();

        let result = manager.authorize(PermissionScope::Connect).await;
        assert!(matches!(result, Err(RangingError::PermissionDenied(PermissionScope::Connect))));
    }

    #[tokio::test]
    async fn test_request_does_not_override_denial() {
        let manager = PermissionManager::new();
        manager
            .set_permission(PermissionScope::Ranging, PermissionStatus::Denied)
            .await;

        let status = manager.request_permission(PermissionScope::Ranging).await.unwrap();
        assert_eq!(status, PermissionStatus::Denied);
    }

    #[test]
    fn test_denied_message_names_scope() {
        let error = RangingError::PermissionDenied(PermissionScope::Ranging);
        assert_eq!(error.user_message(), "Missing RANGING permission");
    }
}
