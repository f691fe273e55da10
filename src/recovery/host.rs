use crate::recovery::types::{Alert, AlertLevel};
use crate::resources::ProcessMemory;
use crate::session::SessionState;
use async_trait::async_trait;
use tracing::{error, info, warn};

/// The environment the engine runs inside.
///
/// Every method has a working default so hosts override only what they
/// actually support.
#[async_trait]
pub trait RecoveryHost: Send + Sync {
    /// Bounded round-trip used to check the host still responds
    async fn probe(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Deliver an alert to whoever watches the host
    async fn notify(&self, alert: &Alert) {
        match alert.level {
            AlertLevel::Info => info!("{}", alert.message),
            AlertLevel::Warning => warn!("{}", alert.message),
            AlertLevel::Critical => error!("{}", alert.message),
        }
    }

    async fn stop_session(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start_session(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Restart without waiting for in-flight work
    async fn force_restart(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn capture_state(&self) -> SessionState {
        SessionState::new()
    }

    async fn apply_state(&self, _state: SessionState) -> anyhow::Result<()> {
        Ok(())
    }

    async fn clear_caches(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Resident memory in bytes, when the platform can report it
    fn memory_usage(&self) -> Option<u64> {
        ProcessMemory::sample()
            .ok()
            .map(|memory| memory.resident_bytes)
    }
}

/// Host with no session of its own
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl RecoveryHost for NoopHost {}
