use std::sync::{Arc, Mutex, MutexGuard};

use meter_app::{AppError, Engine, Result};

/// Shared handle to the single engine instance. Handlers lock, run one
/// synchronous engine call, and release; nothing is held across awaits.
#[derive(Clone)]
pub struct AppContext {
    engine: Arc<Mutex<Engine>>,
}

impl AppContext {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn engine(&self) -> Result<MutexGuard<'_, Engine>> {
        self.engine
            .lock()
            .map_err(|_| AppError::Message("engine lock poisoned".to_string()))
    }
}
