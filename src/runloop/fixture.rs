use super::ListenerContext;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use std::sync::{Arc, Mutex, PoisonError};

static SHARED_LISTENER: Mutex<Option<Arc<ListenerContext>>> = Mutex::new(None);

/// Process-wide listener context, created on first use with `config`.
///
/// The context is never torn down; later calls return the same instance and
/// ignore their configuration.
pub fn shared_listener_with(config: &HarnessConfig) -> Result<Arc<ListenerContext>> {
    let mut slot = SHARED_LISTENER
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(listener) = slot.as_ref() {
        return Ok(Arc::clone(listener));
    }

    let listener = Arc::new(ListenerContext::spawn(config)?);
    *slot = Some(Arc::clone(&listener));
    Ok(listener)
}

/// Process-wide listener context configured by [`HarnessConfig::load`]
pub fn shared_listener() -> Result<Arc<ListenerContext>> {
    let config = HarnessConfig::load().map_err(|e| HarnessError::Config(format!("{:#}", e)))?;
    shared_listener_with(&config)
}
