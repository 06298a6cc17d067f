//! Actions — persisted lifecycle records for durable work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed action lifecycle.
///
/// Legal transitions: `pending → active`, `active → completed`,
/// `active → failed`, `active → cancelled`, `pending → cancelled`, and
/// `failed → pending` through explicit retry only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Cancelled)
    }

    /// Whether `self → to` is on the lifecycle graph. Same-state updates
    /// are permitted so progress writes don't need a special path.
    pub fn can_transition(self, to: ActionStatus) -> bool {
        use ActionStatus::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Cancelled)
                | (Failed, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Active => "active",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Cancelled => "cancelled",
        }
    }

    /// Lifecycle event suffix emitted when an action enters this status.
    /// `Pending` has no entry event (creation emits `Action.created`).
    pub fn event_suffix(self) -> Option<&'static str> {
        match self {
            ActionStatus::Pending => None,
            ActionStatus::Active => Some("started"),
            ActionStatus::Completed => Some("completed"),
            ActionStatus::Failed => Some("failed"),
            ActionStatus::Cancelled => Some("cancelled"),
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted lifecycle record for a durable promise or a bulk run.
///
/// `action`/`act`/`activity` is the verb triple — base form, third person,
/// gerund (`create`/`creates`/`creating`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub actor: String,
    pub action: String,
    pub act: String,
    pub activity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_data: Option<Value>,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Free-form working state (e.g. a bulk run's processed id set).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Numeric mirror of the priority tier (9/7/5/1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_total: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input to `create_action`. Either `action` (a base verb) or
/// `action_type` (a dotted name like `Customer.forEach`, whose last
/// segment supplies the verb) must be present.
#[derive(Debug, Clone, Default)]
pub struct ActionInput {
    pub action: Option<String>,
    pub action_type: Option<String>,
    pub actor: Option<String>,
    pub object: Option<String>,
    pub object_data: Option<Value>,
    pub data: Option<Value>,
    pub meta: Option<Value>,
    pub total: Option<u64>,
    pub priority: Option<u8>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl ActionInput {
    pub fn verb(action: impl Into<String>) -> Self {
        Self { action: Some(action.into()), ..Self::default() }
    }

    pub fn of_type(action_type: impl Into<String>) -> Self {
        Self { action_type: Some(action_type.into()), ..Self::default() }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn object_data(mut self, data: Value) -> Self {
        self.object_data = Some(data);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Partial update applied by `update_action`. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct ActionUpdate {
    pub status: Option<ActionStatus>,
    pub progress: Option<u64>,
    pub total: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub data: Option<Value>,
    pub meta: Option<Value>,
    pub batch: Option<String>,
    pub batch_index: Option<usize>,
    pub batch_total: Option<usize>,
}

impl ActionUpdate {
    pub fn status(status: ActionStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn progress(mut self, progress: u64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_graph() {
        use ActionStatus::*;
        assert!(Pending.can_transition(Active));
        assert!(Pending.can_transition(Cancelled));
        assert!(Active.can_transition(Completed));
        assert!(Active.can_transition(Failed));
        assert!(Active.can_transition(Cancelled));
        assert!(Failed.can_transition(Pending));

        assert!(!Pending.can_transition(Completed));
        assert!(!Completed.can_transition(Active));
        assert!(!Cancelled.can_transition(Pending));
        assert!(!Failed.can_transition(Active));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ActionStatus::Pending.is_terminal());
        assert!(!ActionStatus::Active.is_terminal());
        assert!(ActionStatus::Completed.is_terminal());
        assert!(ActionStatus::Failed.is_terminal());
        assert!(ActionStatus::Cancelled.is_terminal());
    }
}
