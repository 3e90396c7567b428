use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use adminhub_auth::{
    InMemoryRelationshipStore, ObjectRef, Relation, RelationshipStore, RelationshipTuple, Subject,
};
use adminhub_core::{AggregateId, TenantId, UserId};

/// A tenant with one admin, one member and `projects` projects parented to it.
fn seeded_store(projects: usize) -> (InMemoryRelationshipStore, UserId, UserId, Vec<ObjectRef>) {
    let store = InMemoryRelationshipStore::default();
    let tenant = ObjectRef::tenant(TenantId::new());
    let admin = UserId::new();
    let member = UserId::new();

    store
        .write(RelationshipTuple::new(Subject::user(admin), Relation::ADMIN, tenant.clone()))
        .unwrap();
    store
        .write(RelationshipTuple::new(Subject::user(member), Relation::MEMBER, tenant.clone()))
        .unwrap();

    let objects: Vec<ObjectRef> = (0..projects)
        .map(|_| {
            let project = ObjectRef::project(AggregateId::new());
            store
                .write(RelationshipTuple::new(
                    Subject::object(tenant.clone()),
                    Relation::PARENT,
                    project.clone(),
                ))
                .unwrap();
            store
                .write(RelationshipTuple::new(
                    Subject::userset(tenant.clone(), Relation::MEMBER),
                    Relation::VIEWER,
                    project.clone(),
                ))
                .unwrap();
            project
        })
        .collect();

    (store, admin, member, objects)
}

fn bench_check_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("relationship_check");

    for projects in [10, 1000].iter() {
        let (store, admin, member, objects) = seeded_store(*projects);
        let target = objects[objects.len() / 2].clone();

        group.bench_with_input(BenchmarkId::new("inherited_owner", projects), &target, |b, target| {
            let subject = Subject::user(admin);
            b.iter(|| black_box(store.check(&subject, &Relation::VIEWER, target).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("userset_viewer", projects), &target, |b, target| {
            let subject = Subject::user(member);
            b.iter(|| black_box(store.check(&subject, &Relation::VIEWER, target).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("denied", projects), &target, |b, target| {
            let subject = Subject::user(UserId::new());
            b.iter(|| black_box(store.check(&subject, &Relation::EDITOR, target).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_check_paths);
criterion_main!(benches);
