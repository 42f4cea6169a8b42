//! Helpers shared by unit tests

use std::sync::Arc;
use std::time::Duration;

use rxctl_protocol::ModuleKind;
use rxctl_sim::SimHandle;

use crate::config::ValidationConfig;
use crate::module::{ModuleBase, ModuleContext};
use crate::transport::Transport;

/// Validation policy with a short retry interval
pub fn fast_validation() -> ValidationConfig {
    ValidationConfig {
        interval_ms: 5,
        ..ValidationConfig::default()
    }
}

/// Transport connected to a running simulator
pub async fn transport_for(sim: &SimHandle) -> Arc<Transport> {
    let transport = Transport::connect("127.0.0.1", sim.addr().port(), Duration::from_millis(200))
        .await
        .unwrap();
    Arc::new(transport)
}

/// Module context with the simulator's default wideband ratio
pub async fn context_for(sim: &SimHandle) -> ModuleContext {
    ModuleContext {
        transport: transport_for(sim).await,
        validation: fast_validation(),
        flush_retries: 2,
        wideband_ratio: 0.8,
    }
}

/// Module base for `id` on a running simulator
pub async fn base_for(sim: &SimHandle, id: &str, kind: ModuleKind) -> ModuleBase {
    context_for(sim).await.base(id.parse().unwrap(), kind)
}
