//! Workflow instance model (checkpointed after every change).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use adminhub_core::{TenantId, UserId};
use adminhub_projects::ProjectId;

use super::state::WorkflowState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ProvisionResources,
    ConfigurePermissions,
    SendNotifications,
}

impl StepKind {
    /// The state in which this step runs.
    pub fn state(self) -> WorkflowState {
        match self {
            StepKind::ProvisionResources => WorkflowState::Provisioning,
            StepKind::ConfigurePermissions => WorkflowState::ConfiguringPermissions,
            StepKind::SendNotifications => WorkflowState::SendingNotifications,
        }
    }

    pub fn for_state(state: WorkflowState) -> Option<StepKind> {
        match state {
            WorkflowState::Provisioning => Some(StepKind::ProvisionResources),
            WorkflowState::ConfiguringPermissions => Some(StepKind::ConfigurePermissions),
            WorkflowState::SendingNotifications => Some(StepKind::SendNotifications),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::ProvisionResources => "provision_resources",
            StepKind::ConfigurePermissions => "configure_permissions",
            StepKind::SendNotifications => "send_notifications",
        }
    }
}

/// What a single step attempt produced. Failures are values, not panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// resource kind -> resource id
    Succeeded(BTreeMap<String, String>),
    Failed(String),
}

impl StepOutcome {
    pub fn ok() -> Self {
        Self::Succeeded(BTreeMap::new())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Final result of a step after retries. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningStepResult {
    pub success: bool,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    pub error: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: StepKind,
    /// Trigger generation the step ran under.
    pub generation: u32,
    pub result: ProvisioningStepResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationUpdate {
    pub received_at: DateTime<Utc>,
    pub state: WorkflowState,
    pub payload: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// What the workflow provisions for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub requested_by: Option<UserId>,
}

/// Durable workflow instance, keyed by project id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub request: ProvisioningRequest,
    pub state: WorkflowState,
    pub step_log: Vec<StepRecord>,
    pub configuration_updates: Vec<ConfigurationUpdate>,
    pub transitions: Vec<TransitionRecord>,
    /// Incremented by every explicit re-trigger.
    pub generation: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(request: ProvisioningRequest) -> Self {
        let now = Utc::now();
        Self {
            request,
            state: WorkflowState::Initializing,
            step_log: Vec::new(),
            configuration_updates: Vec::new(),
            transitions: Vec::new(),
            generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.request.project_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.request.tenant_id
    }

    /// Move to `to`, recording the transition. Returns `false` (and changes
    /// nothing) when the transition is not allowed.
    pub fn transition(&mut self, to: WorkflowState, reason: Option<String>) -> bool {
        if !self.state.can_transition_to(to) {
            return false;
        }
        let now = Utc::now();
        self.transitions.push(TransitionRecord {
            from: self.state,
            to,
            at: now,
            reason,
        });
        self.state = to;
        self.updated_at = now;
        true
    }

    pub fn record_step(&mut self, record: StepRecord) {
        self.updated_at = record.finished_at;
        self.step_log.push(record);
    }

    /// Resources produced by successful steps, later generations winning.
    pub fn resources(&self) -> BTreeMap<String, String> {
        self.step_log
            .iter()
            .filter(|r| r.result.success)
            .flat_map(|r| r.result.resources.clone())
            .collect()
    }

    pub fn last_result(&self, step: StepKind) -> Option<&ProvisioningStepResult> {
        self.step_log
            .iter()
            .rev()
            .find(|r| r.step == step)
            .map(|r| &r.result)
    }
}

/// How a failing notification step affects the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationMode {
    /// Failure is recorded and logged; the workflow still completes.
    #[default]
    BestEffort,
    /// Failure after retries fails the workflow.
    Strict,
}

impl core::str::FromStr for NotificationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(NotificationMode::BestEffort),
            "strict" => Ok(NotificationMode::Strict),
            other => Err(format!("expected best_effort or strict, got '{other}'")),
        }
    }
}
