//! Operation context for correlating framework work across tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context for one framework operation (a bootstrap run, a start-level walk).
///
/// Work for one operation hops between tokio workers, so the span carries a
/// correlation id rather than relying on thread identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Unique operation identifier.
    pub operation_id: Uuid,
    /// Parent operation, if this was spawned from another.
    pub parent_id: Option<Uuid>,
    /// When the operation started.
    pub started_at: DateTime<Utc>,
    /// Component that started the operation.
    pub source: String,
    /// Operation name.
    pub operation: Option<String>,
}

impl OperationContext {
    /// Create a new context.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            parent_id: None,
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
        }
    }

    /// Create a child context.
    #[must_use]
    pub fn child(&self, source: impl Into<String>) -> Self {
        Self {
            parent_id: Some(self.operation_id),
            ..Self::new(source)
        }
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Milliseconds since the operation started.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// Create a tracing span for this context.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "operation",
            operation_id = %self.operation_id,
            parent_id = self.parent_id.map(|id| id.to_string()),
            source = %self.source,
            operation = self.operation.as_deref(),
        )
    }

    /// Short identifier for log lines.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.operation_id.simple().to_string().chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_links_parent() {
        let parent = OperationContext::new("bootstrap").with_operation("install");
        let child = parent.child("resolver");
        assert_eq!(child.parent_id, Some(parent.operation_id));
        assert_ne!(child.operation_id, parent.operation_id);
        assert!(child.operation.is_none());
    }

    #[test]
    fn test_short_id_and_elapsed() {
        let ctx = OperationContext::new("start-level");
        assert_eq!(ctx.short_id().len(), 8);
        assert!(ctx.elapsed_ms() >= 0);
    }
}
