use serde::{Deserialize, Serialize};

/// Provisioning workflow state.
///
/// ```text
/// initializing -> provisioning -> configuring_permissions -> sending_notifications -> completed
///        \______________\_________________\_________________________\--> failed | cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Initializing,
    Provisioning,
    ConfiguringPermissions,
    SendingNotifications,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled
        )
    }

    /// Next state on the success path; `None` for terminal states.
    pub fn next(self) -> Option<WorkflowState> {
        match self {
            WorkflowState::Initializing => Some(WorkflowState::Provisioning),
            WorkflowState::Provisioning => Some(WorkflowState::ConfiguringPermissions),
            WorkflowState::ConfiguringPermissions => Some(WorkflowState::SendingNotifications),
            WorkflowState::SendingNotifications => Some(WorkflowState::Completed),
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled => None,
        }
    }

    pub fn can_transition_to(self, to: WorkflowState) -> bool {
        match to {
            WorkflowState::Failed | WorkflowState::Cancelled => !self.is_terminal(),
            // re-trigger
            WorkflowState::Initializing => self == WorkflowState::Failed,
            _ => self.next() == Some(to),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Initializing => "initializing",
            WorkflowState::Provisioning => "provisioning",
            WorkflowState::ConfiguringPermissions => "configuring_permissions",
            WorkflowState::SendingNotifications => "sending_notifications",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WorkflowState; 7] = [
        WorkflowState::Initializing,
        WorkflowState::Provisioning,
        WorkflowState::ConfiguringPermissions,
        WorkflowState::SendingNotifications,
        WorkflowState::Completed,
        WorkflowState::Failed,
        WorkflowState::Cancelled,
    ];

    #[test]
    fn happy_path_is_linear() {
        let mut state = WorkflowState::Initializing;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(next));
            state = next;
            seen.push(state);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(state, WorkflowState::Completed);
    }

    #[test]
    fn terminal_states_are_absorbing_except_retrigger() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                let allowed = from == WorkflowState::Failed && to == WorkflowState::Initializing;
                assert_eq!(from.can_transition_to(to), allowed, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn no_skipping_steps() {
        assert!(!WorkflowState::Provisioning.can_transition_to(WorkflowState::SendingNotifications));
        assert!(!WorkflowState::Initializing.can_transition_to(WorkflowState::Completed));
        assert!(WorkflowState::ConfiguringPermissions.can_transition_to(WorkflowState::Failed));
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkflowState::ConfiguringPermissions).unwrap(),
            "\"configuring_permissions\""
        );
    }
}
