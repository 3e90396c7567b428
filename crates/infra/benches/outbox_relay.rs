use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;

use adminhub_auth::{
    AuthorizationGate, InMemoryRelationshipStore, ObjectRef, Relation, RelationshipStore,
    RelationshipTuple, RequestContext,
};
use adminhub_core::{AggregateId, TenantId, UserId};
use adminhub_infra::outbox::{
    HandlerError, InMemoryOutbox, MessageHandler, OutboxMessage, OutboxRecord, OutboxRelay,
    OutboxStore, RelayConfig,
};
use adminhub_infra::projects::{InMemoryProjectStore, ProjectService};
use adminhub_projects::CreateProject;
use chrono::Utc;
use uuid::Uuid;

struct Ack;

impl MessageHandler for Ack {
    fn handle(&self, _message: &OutboxMessage) -> Result<(), HandlerError> {
        Ok(())
    }
}

fn seeded_outbox(records: usize, aggregates: usize) -> Arc<InMemoryOutbox> {
    let outbox = InMemoryOutbox::arc();
    let tenant_id = TenantId::new();
    let ids: Vec<AggregateId> = (0..aggregates.max(1)).map(|_| AggregateId::new()).collect();

    for i in 0..records {
        let message = OutboxMessage::new(
            Uuid::now_v7(),
            tenant_id,
            ids[i % ids.len()],
            "project",
            "project.created",
            Utc::now(),
            serde_json::json!({ "seq": i }),
        );
        outbox.append(OutboxRecord::new(message)).unwrap();
    }
    outbox
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox_drain");

    for batch_size in [1usize, 64, 512].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("drain_once", batch_size),
            batch_size,
            |b, &batch_size| {
                b.iter_batched(
                    || {
                        let outbox = seeded_outbox(batch_size, batch_size / 4 + 1);
                        let config = RelayConfig {
                            batch_size,
                            ..RelayConfig::default()
                        };
                        let mut relay = OutboxRelay::new(outbox, config);
                        relay.register_handler("*", Ack);
                        relay
                    },
                    |relay| relay.drain_once().unwrap(),
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_create_project(c: &mut Criterion) {
    let mut group = c.benchmark_group("project_create");

    let relationships = Arc::new(InMemoryRelationshipStore::default());
    let outbox = InMemoryOutbox::arc();
    let service = ProjectService::new(
        Arc::new(InMemoryProjectStore::new(outbox)),
        AuthorizationGate::new(relationships.clone()),
    );
    let ctx = RequestContext::new(UserId::new(), TenantId::new());
    relationships
        .write(RelationshipTuple::new(
            ctx.subject(),
            Relation::MEMBER,
            ObjectRef::tenant(ctx.tenant_id),
        ))
        .unwrap();

    group.bench_function("create_with_outbox_and_grant", |b| {
        b.iter(|| service.create(&ctx, CreateProject::named("Apollo")).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_drain, bench_create_project);
criterion_main!(benches);
