use super::Handler;
use crate::error::QueueError;
use crate::job_queue::{AuthMethod, OperationType};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup table from `(OperationType, AuthMethod)` to handler.
///
/// Built once at startup and shared read-only by every worker.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(OperationType, AuthMethod), Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same pair.
    pub fn register(
        &mut self,
        operation_type: OperationType,
        auth_method: AuthMethod,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        self.handlers.insert((operation_type, auth_method), handler);
        self
    }

    pub fn with(
        mut self,
        operation_type: OperationType,
        auth_method: AuthMethod,
        handler: Arc<dyn Handler>,
    ) -> Self {
        self.register(operation_type, auth_method, handler);
        self
    }

    pub fn resolve(
        &self,
        operation_type: OperationType,
        auth_method: AuthMethod,
    ) -> Result<Arc<dyn Handler>, QueueError> {
        if let Some(handler) = self.handlers.get(&(operation_type, auth_method)) {
            return Ok(handler.clone());
        }
        if self.supports(operation_type) {
            Err(QueueError::UnsupportedAuthMethod {
                operation_type,
                auth_method: auth_method.to_string(),
            })
        } else {
            Err(QueueError::UnknownOperationType(operation_type.to_string()))
        }
    }

    /// Returns true if at least one strategy is registered for the type.
    pub fn supports(&self, operation_type: OperationType) -> bool {
        self.handlers.keys().any(|(t, _)| *t == operation_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
