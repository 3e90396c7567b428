//! Project provisioning workflow: durable state machine run per project.

pub mod engine;
pub mod postgres;
pub mod state;
pub mod steps;
pub mod store;
pub mod trigger;
pub mod types;

pub use engine::{EngineConfig, StartOutcome, WorkflowEngine, WorkflowError};
pub use postgres::PostgresWorkflowStore;
pub use state::WorkflowState;
pub use steps::{
    LogNotifier, PermissionConfigurator, ProvisioningStep, ResourceProvisioner, WorkflowSteps,
    resource_ids,
};
pub use store::{InMemoryWorkflowStore, WorkflowStore, WorkflowStoreError};
pub use trigger::ProvisioningTrigger;
pub use types::{
    ConfigurationUpdate, NotificationMode, ProvisioningRequest, ProvisioningStepResult, StepKind,
    StepOutcome, StepRecord, TransitionRecord, WorkflowInstance,
};
