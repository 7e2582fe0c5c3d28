//! Structured task failure details.

use std::collections::BTreeMap;

use super::values::PropertyValue;

/// Failure payload attached to `TaskFailed`, `SubOrchestrationInstanceFailed`
/// and `ExecutionCompleted(Failed)` history events. Recursively nested via
/// `inner_failure`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskFailureDetails {
    pub error_type: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub inner_failure: Option<Box<TaskFailureDetails>>,
    pub is_non_retriable: bool,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl TaskFailureDetails {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            ..Default::default()
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_inner(mut self, inner: TaskFailureDetails) -> Self {
        self.inner_failure = Some(Box::new(inner));
        self
    }

    pub fn non_retriable(mut self) -> Self {
        self.is_non_retriable = true;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Depth of the inner-failure chain, this failure included.
    pub fn chain_depth(&self) -> usize {
        1 + self.inner_failure.as_ref().map_or(0, |f| f.chain_depth())
    }
}

impl std::fmt::Display for TaskFailureDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.error_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let details = TaskFailureDetails::new("TimeoutError", "deadline exceeded")
            .with_stack_trace("at worker.rs:42")
            .with_inner(TaskFailureDetails::new("IoError", "connection reset"))
            .non_retriable()
            .with_property("attempt", PropertyValue::Number(3.0));

        assert_eq!(details.error_type, "TimeoutError");
        assert!(details.is_non_retriable);
        assert_eq!(details.chain_depth(), 2);
        assert_eq!(
            details.inner_failure.as_ref().unwrap().error_message,
            "connection reset"
        );
    }

    #[test]
    fn test_display() {
        let details = TaskFailureDetails::new("ValueError", "bad input");
        assert_eq!(details.to_string(), "ValueError: bad input");
    }
}
