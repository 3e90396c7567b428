//! Outbox handler that starts provisioning for newly created projects.

use tracing::{debug, error};

use adminhub_projects::{PROJECT_CREATED, ProjectCreated};

use super::engine::{StartOutcome, WorkflowEngine};
use super::store::WorkflowStore;
use super::types::ProvisioningRequest;
use crate::outbox::{HandlerError, MessageHandler, OutboxMessage};

/// Maps `project.created` to [`WorkflowEngine::start`].
///
/// Redelivery is harmless: the engine deduplicates by project id and a
/// duplicate is acknowledged.
pub struct ProvisioningTrigger<W> {
    engine: WorkflowEngine<W>,
}

impl<W> ProvisioningTrigger<W> {
    pub fn new(engine: WorkflowEngine<W>) -> Self {
        Self { engine }
    }
}

impl<W> MessageHandler for ProvisioningTrigger<W>
where
    W: WorkflowStore + 'static,
{
    fn handle(&self, message: &OutboxMessage) -> Result<(), HandlerError> {
        if message.event_type() != PROJECT_CREATED {
            return Ok(());
        }

        // Undecodable or mis-scoped payloads never become valid; drop them
        // rather than block the aggregate forever.
        let event: ProjectCreated = match message.decode() {
            Ok(e) => e,
            Err(e) => {
                error!(event_id = %message.event_id(), error = %e, "undecodable project.created dropped");
                return Ok(());
            }
        };
        if event.tenant_id != message.tenant_id() {
            error!(
                event_id = %message.event_id(),
                envelope_tenant = %message.tenant_id(),
                payload_tenant = %event.tenant_id,
                "project.created tenant mismatch dropped"
            );
            return Ok(());
        }

        let request = ProvisioningRequest {
            tenant_id: event.tenant_id,
            project_id: event.project_id,
            requested_by: Some(event.created_by),
        };
        match self.engine.start(request) {
            Ok(StartOutcome::Started) => Ok(()),
            Ok(StartOutcome::AlreadyExists) => {
                debug!(project_id = %event.project_id, "provisioning already triggered");
                Ok(())
            }
            Err(e) => Err(HandlerError::new(format!("failed to start provisioning: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use adminhub_auth::InMemoryRelationshipStore;
    use adminhub_core::{TenantId, UserId};
    use adminhub_projects::{PROJECT_AGGREGATE_TYPE, ProjectId};
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::outbox::OutboxRecord;
    use crate::workflow::engine::EngineConfig;
    use crate::workflow::state::WorkflowState;
    use crate::workflow::steps::{
        LogNotifier, PermissionConfigurator, ResourceProvisioner, WorkflowSteps,
    };
    use crate::workflow::store::InMemoryWorkflowStore;

    fn engine() -> WorkflowEngine<Arc<InMemoryWorkflowStore>> {
        WorkflowEngine::new(
            InMemoryWorkflowStore::arc(),
            WorkflowSteps::new(
                Arc::new(ResourceProvisioner::new()),
                Arc::new(PermissionConfigurator::new(InMemoryRelationshipStore::default())),
                Arc::new(LogNotifier),
            ),
            EngineConfig::default(),
        )
    }

    fn created(tenant_id: TenantId) -> ProjectCreated {
        ProjectCreated {
            tenant_id,
            project_id: ProjectId::generate(),
            name: "Apollo".to_string(),
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        }
    }

    fn envelope(tenant_id: TenantId, event: &ProjectCreated) -> OutboxMessage {
        OutboxRecord::from_event(
            tenant_id,
            event.project_id.as_aggregate_id(),
            PROJECT_AGGREGATE_TYPE,
            event,
        )
        .unwrap()
        .message
    }

    #[test]
    fn project_created_starts_once() {
        let engine = engine();
        let trigger = ProvisioningTrigger::new(engine.clone());
        let tenant = TenantId::new();
        let event = created(tenant);
        let msg = envelope(tenant, &event);

        trigger.handle(&msg).unwrap();
        trigger.handle(&msg).unwrap();
        engine.join(event.project_id);

        assert_eq!(engine.store().len(), 1);
        let instance = engine.instance(event.project_id).unwrap();
        assert_eq!(instance.state, WorkflowState::Completed);
        assert_eq!(instance.request.requested_by, Some(event.created_by));
    }

    #[test]
    fn other_and_malformed_messages_are_acknowledged() {
        let engine = engine();
        let trigger = ProvisioningTrigger::new(engine.clone());
        let tenant = TenantId::new();

        let other = OutboxMessage::new(
            Uuid::now_v7(),
            tenant,
            ProjectId::generate().as_aggregate_id(),
            PROJECT_AGGREGATE_TYPE,
            "project.renamed",
            Utc::now(),
            serde_json::json!({}),
        );
        let garbage = OutboxMessage::new(
            Uuid::now_v7(),
            tenant,
            ProjectId::generate().as_aggregate_id(),
            PROJECT_AGGREGATE_TYPE,
            PROJECT_CREATED,
            Utc::now(),
            serde_json::json!({"unexpected": true}),
        );
        let foreign = envelope(tenant, &created(TenantId::new()));

        for msg in [other, garbage, foreign] {
            trigger.handle(&msg).unwrap();
        }
        assert!(engine.store().is_empty());
    }
}
