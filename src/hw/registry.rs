//! Process-wide backend registry.
//!
//! The host-memory backend is always registered; platform backends register
//! themselves (or are registered by the embedding application) before stages
//! are configured.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::sync::Arc;

use super::host::HostBackend;
use super::HwBackend;

/// Probe order for `"auto"` resolution, most preferred first.
const AUTO_ORDER: &[&str] = &["vaapi"];

lazy_static! {
    static ref BACKENDS: RwLock<Vec<Arc<dyn HwBackend>>> = {
        let builtin: Arc<dyn HwBackend> = Arc::new(HostBackend::new());
        RwLock::new(vec![builtin])
    };
}

/// Register a backend, replacing any previous registration with the same name.
pub fn register_backend(backend: Arc<dyn HwBackend>) {
    let mut backends = BACKENDS.write();
    backends.retain(|b| b.name() != backend.name());
    backends.push(backend);
}

/// Resolve a backend by its exact name.
pub fn resolve(name: &str) -> Option<Arc<dyn HwBackend>> {
    BACKENDS.read().iter().find(|b| b.name() == name).cloned()
}

/// Resolve the preferred available hardware backend, or `None` when the
/// platform has none. Non-hardware backends are never chosen automatically.
pub fn resolve_auto() -> Option<Arc<dyn HwBackend>> {
    let backends = BACKENDS.read();
    for name in AUTO_ORDER {
        if let Some(backend) = backends
            .iter()
            .find(|b| b.name() == *name && b.is_hardware() && b.probe())
        {
            return Some(backend.clone());
        }
    }
    backends
        .iter()
        .find(|b| b.is_hardware() && b.probe())
        .cloned()
}
