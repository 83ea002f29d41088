//! Host telemetry seam
//!
//! Collection itself is a collaborator concern; the control channel only
//! needs an opaque snapshot to attach unchanged to each heartbeat frame.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

/// Opaque telemetry value attached to a `status_update` frame
pub type Snapshot = serde_json::Value;

#[async_trait]
pub trait StatusCollector: Send + Sync {
    async fn collect_status(&self) -> Result<Snapshot>;
}

/// Built-in collector reporting process-level vitals
pub struct HostStatusCollector {
    started: Instant,
}

impl HostStatusCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for HostStatusCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusCollector for HostStatusCollector {
    async fn collect_status(&self) -> Result<Snapshot> {
        Ok(json!({
            "agentVersion": env!("CARGO_PKG_VERSION"),
            "uptimeMs": self.started.elapsed().as_millis() as u64,
            "pid": std::process::id(),
        }))
    }
}
