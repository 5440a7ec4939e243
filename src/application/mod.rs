pub mod bootstrap;
pub mod commands;
pub mod focus_timer;
pub mod oauth;
pub mod session;
pub mod sync_engine;

use crate::domain::models::ApplicationState;
use crate::infrastructure::error::InfraError;
use std::sync::{Arc, Mutex, MutexGuard};

/// The single in-process copy of the user's state, shared by commands and the timer.
pub type SharedState = Arc<Mutex<ApplicationState>>;

pub fn lock_state(state: &SharedState) -> Result<MutexGuard<'_, ApplicationState>, InfraError> {
    state
        .lock()
        .map_err(|error| InfraError::Internal(format!("application state lock poisoned: {error}")))
}
