//! Named actions with per-task overrides

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::action::Action;
use crate::handlers::ErrorHandler;

/// An action plus a name, and optional overrides of the group's error
/// handler and timeout
#[derive(Clone)]
pub struct Task {
    pub(crate) name: String,
    pub(crate) action: Arc<dyn Action>,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) timeout: Option<Duration>,
}

impl Task {
    pub fn new(name: impl Into<String>, action: impl Action + 'static) -> Self {
        Self {
            name: name.into(),
            action: Arc::new(action),
            on_error: None,
            timeout: None,
        }
    }

    /// Use `handler` instead of the group's handler
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    /// Use `timeout` instead of the group's timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("on_error", &self.on_error.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
