//! Process-wide convenience accessor for top-level wiring.
//!
//! Prefer passing an explicit `Arc<BridgeRuntime>`. This exists for entry
//! points that have nowhere to keep one.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::manager::BridgeConfig;
use crate::runtime::BridgeRuntime;

static RUNTIME: Mutex<Option<Arc<BridgeRuntime>>> = parking_lot::const_mutex(None);

/// Shared runtime, created from the global settings on first use.
pub fn get_or_create() -> Arc<BridgeRuntime> {
    get_or_create_with(|| BridgeConfig::from_settings(&clive_settings::get_settings().bridge))
}

/// Shared runtime, created with `config()` on first use. `config` is not
/// called when an instance already exists.
pub fn get_or_create_with(config: impl FnOnce() -> BridgeConfig) -> Arc<BridgeRuntime> {
    let mut guard = RUNTIME.lock();
    if let Some(rt) = guard.as_ref() {
        return Arc::clone(rt);
    }
    let rt = Arc::new(BridgeRuntime::new(config()));
    *guard = Some(Arc::clone(&rt));
    rt
}

/// Current instance, if one was created.
pub fn current() -> Option<Arc<BridgeRuntime>> {
    RUNTIME.lock().clone()
}

/// Dispose and forget the shared instance. Synchronous; errors are logged
/// at debug and swallowed. The next [`get_or_create`] builds a new one.
pub fn reset() {
    let Some(rt) = RUNTIME.lock().take() else {
        return;
    };
    if let Err(e) = rt.dispose_now() {
        debug!(error = %e, "bridge runtime reset");
    }
}
