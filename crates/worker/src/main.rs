//! adminhub worker: outbox relay, provisioning engine and activity log.
//!
//! Backends are Postgres when `DATABASE_URL` is set, in-memory otherwise.
//! Set `ADMINHUB_DEMO` to create a demo project at startup.

use std::convert::Infallible;
use std::sync::{Arc, mpsc};

use sqlx::postgres::PgPoolOptions;
use tokio::runtime::Handle;
use tracing::{info, warn};

use adminhub_auth::{
    AuthorizationGate, InMemoryRelationshipStore, ObjectRef, Relation, RelationSchema,
    RelationshipStore, RelationshipTuple, RequestContext,
};
use adminhub_core::{TenantId, UserId};
use adminhub_events::InMemoryEventBus;
use adminhub_infra::AdminConfig;
use adminhub_infra::outbox::{
    BusForwarder, InMemoryOutbox, OutboxMessage, OutboxRelay, OutboxStore, PostgresOutbox,
    RelayConfig,
};
use adminhub_infra::projects::{
    InMemoryProjectStore, PostgresProjectStore, ProjectService, ProjectStore,
};
use adminhub_infra::relationships::PostgresRelationshipStore;
use adminhub_infra::workers::BusWorker;
use adminhub_infra::workflow::{
    EngineConfig, InMemoryWorkflowStore, LogNotifier, PermissionConfigurator,
    PostgresWorkflowStore, ProvisioningTrigger, ResourceProvisioner, WorkflowEngine, WorkflowSteps,
    WorkflowStore,
};
use adminhub_projects::{CreateProject, PROJECT_CREATED};

struct Backends {
    projects: Arc<dyn ProjectStore>,
    outbox: Arc<dyn OutboxStore>,
    relationships: Arc<dyn RelationshipStore>,
    workflows: Arc<dyn WorkflowStore>,
}

impl Backends {
    async fn connect(config: &AdminConfig) -> anyhow::Result<Self> {
        let Some(url) = config.database_url.as_deref() else {
            warn!("DATABASE_URL not set; using in-memory stores");
            let outbox = InMemoryOutbox::arc();
            return Ok(Self {
                projects: Arc::new(InMemoryProjectStore::new(outbox.clone())),
                outbox,
                relationships: Arc::new(InMemoryRelationshipStore::default()),
                workflows: InMemoryWorkflowStore::arc(),
            });
        };

        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        let runtime = Handle::current();

        // Project rows and their outbox records share one transaction.
        let outbox = PostgresOutbox::new(pool.clone(), runtime.clone());
        outbox.ensure_schema().await?;
        let projects = PostgresProjectStore::new(pool.clone(), runtime.clone());
        projects.ensure_schema().await?;
        let relationships =
            PostgresRelationshipStore::new(pool.clone(), runtime.clone(), RelationSchema::admin_default());
        relationships.ensure_schema().await?;
        let workflows = PostgresWorkflowStore::new(pool, runtime);
        workflows.ensure_schema().await?;

        info!("using Postgres stores");
        Ok(Self {
            projects: Arc::new(projects),
            outbox: Arc::new(outbox),
            relationships: Arc::new(relationships),
            workflows: Arc::new(workflows),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    adminhub_observability::init();

    let config = AdminConfig::from_env()?;
    let backends = Backends::connect(&config).await?;

    // Stores block on the runtime, so the synchronous side runs off the
    // async workers.
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let worker = tokio::task::spawn_blocking(move || run(&config, backends, stop_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = stop_tx.send(());

    worker.await?
}

fn run(config: &AdminConfig, backends: Backends, stop: mpsc::Receiver<()>) -> anyhow::Result<()> {
    let service = ProjectService::new(
        backends.projects.clone(),
        AuthorizationGate::new(backends.relationships.clone()),
    );

    let steps = WorkflowSteps::new(
        Arc::new(ResourceProvisioner::new()),
        Arc::new(PermissionConfigurator::new(backends.relationships.clone())),
        Arc::new(LogNotifier),
    );
    let engine = WorkflowEngine::new(backends.workflows, steps, EngineConfig::from(config));
    let resumed = engine.resume_incomplete()?;

    let bus: Arc<InMemoryEventBus<OutboxMessage>> = Arc::new(InMemoryEventBus::new());
    let activity = BusWorker::spawn("activity-log", &bus, None, |m: OutboxMessage| {
        info!(
            tenant_id = %m.tenant_id(),
            aggregate_id = %m.aggregate_id(),
            event_type = m.event_type(),
            "activity"
        );
        Ok::<_, Infallible>(())
    })?;

    let mut relay = OutboxRelay::new(
        backends.outbox.clone(),
        RelayConfig::default().with_poll_interval(config.outbox_poll_interval),
    );
    relay.register_handler(PROJECT_CREATED, ProvisioningTrigger::new(engine.clone()));
    relay.register_handler("*", BusForwarder::new(bus.clone()));
    let relay = relay.spawn()?;

    info!(resumed, notification_mode = ?config.notification_mode, "adminhub worker running");

    if std::env::var_os("ADMINHUB_DEMO").is_some() {
        seed_demo(&service, &backends.relationships)?;
    }

    let _ = stop.recv();

    relay.shutdown();
    activity.shutdown();
    engine.shutdown();
    info!("adminhub worker stopped");
    Ok(())
}

fn seed_demo<S, R>(service: &ProjectService<S, R>, relationships: &R) -> anyhow::Result<()>
where
    S: ProjectStore,
    R: RelationshipStore,
{
    let ctx = RequestContext::new(UserId::new(), TenantId::new());
    relationships.write(RelationshipTuple::new(
        ctx.subject(),
        Relation::MEMBER,
        ObjectRef::tenant(ctx.tenant_id),
    ))?;

    let project = service.create(
        &ctx,
        CreateProject {
            description: Some("Created by ADMINHUB_DEMO".to_string()),
            ..CreateProject::named("Demo")
        },
    )?;
    info!(
        tenant_id = %ctx.tenant_id,
        project_id = %project.id_typed(),
        user_id = %ctx.user_id,
        "demo project created"
    );
    Ok(())
}
