//! Orchestration instance identity.

use uuid::Uuid;

/// Identity of one orchestration execution.
///
/// `instance_id` is stable across executions of the same logical
/// orchestration; a continue-as-new produces a new `execution_id` under the
/// same `instance_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationInstance {
    pub instance_id: String,
    pub execution_id: String,
}

impl OrchestrationInstance {
    pub fn new(instance_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            execution_id: execution_id.into(),
        }
    }

    /// A brand-new execution of the given instance with a generated
    /// execution id.
    pub fn started(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            execution_id: Uuid::new_v4().to_string(),
        }
    }

    /// The follow-on execution of this instance (continue-as-new): same
    /// instance id, fresh execution id.
    pub fn next_execution(&self) -> Self {
        Self {
            instance_id: self.instance_id.clone(),
            execution_id: Uuid::new_v4().to_string(),
        }
    }
}

impl std::fmt::Display for OrchestrationInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.instance_id, self.execution_id)
    }
}
