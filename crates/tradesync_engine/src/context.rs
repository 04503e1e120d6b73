//! Diagnostic context attached to failures.

use crate::operation::now_millis;

/// Describes where and for whom a failure happened.
///
/// Created per failure and carried by [`crate::RetryError`] and
/// [`crate::SyncError::Failed`]; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Name of the unit of work (e.g. `"queue_operation"`).
    pub operation_name: String,
    /// Component that ran the work.
    pub component: Option<String>,
    /// User on whose behalf the work ran.
    pub user_id: Option<String>,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Client identification string.
    pub client_info: String,
}

impl ErrorContext {
    /// Creates a context stamped with the current time.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            component: None,
            user_id: None,
            timestamp: now_millis(),
            client_info: default_client_info(),
        }
    }

    /// Sets the component.
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Sets the user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Overrides the client info.
    pub fn with_client_info(mut self, client_info: impl Into<String>) -> Self {
        self.client_info = client_info.into();
        self
    }
}

/// `"<crate>/<version> (<os>/<arch>)"`.
pub fn default_client_info() -> String {
    format!(
        "{}/{} ({}/{})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builder() {
        let ctx = ErrorContext::new("force_sync")
            .with_component("journal")
            .with_user_id("user-7");

        assert_eq!(ctx.operation_name, "force_sync");
        assert_eq!(ctx.component.as_deref(), Some("journal"));
        assert_eq!(ctx.user_id.as_deref(), Some("user-7"));
        assert!(ctx.timestamp > 0);
        assert!(ctx.client_info.starts_with("tradesync_engine/"));
    }
}
