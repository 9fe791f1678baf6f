use serde::{Deserialize, Serialize};
use sqlx::Type;
use ts_rs::TS;

/// Lifecycle of an agent or workflow execution.
///
/// ```text
/// PENDING ──► RUNNING ──► COMPLETED
///    │           ├──────► FAILED
///    └───────────┴──────► CANCELLED
/// ```
/// COMPLETED, FAILED and CANCELLED are terminal.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[sqlx(type_name = "execution_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 5] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Running,
        ExecutionStatus::Completed,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// States from which `self` may be entered.
    pub fn predecessors(self) -> &'static [ExecutionStatus] {
        match self {
            ExecutionStatus::Pending => &[],
            ExecutionStatus::Running => &[ExecutionStatus::Pending],
            ExecutionStatus::Completed | ExecutionStatus::Failed => &[ExecutionStatus::Running],
            ExecutionStatus::Cancelled => &[ExecutionStatus::Pending, ExecutionStatus::Running],
        }
    }

    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        next.predecessors().contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    /// Lower-case form used in progress event names (`agent.running`).
    pub fn event_suffix(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Renders statuses as a SQL `IN (...)` body. Values come from the closed
/// enum above, never from user input.
pub(crate) fn sql_status_list(statuses: &[ExecutionStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_reaches_completed_or_failed() {
        for from in ExecutionStatus::ALL {
            assert_eq!(
                from.can_transition_to(ExecutionStatus::Completed),
                from == ExecutionStatus::Running
            );
            assert_eq!(
                from.can_transition_to(ExecutionStatus::Failed),
                from == ExecutionStatus::Running
            );
        }
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for from in ExecutionStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ExecutionStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn pending_can_be_claimed_or_cancelled() {
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Running));
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Cancelled));
        assert!(!ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Pending));
        assert!(ExecutionStatus::Running.can_transition_to(ExecutionStatus::Cancelled));
    }

    #[test]
    fn serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ExecutionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        assert_eq!(sql_status_list(ExecutionStatus::Cancelled.predecessors()), "'PENDING','RUNNING'");
    }
}
