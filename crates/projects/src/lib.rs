//! Projects domain module.
//!
//! Deterministic domain logic only (no IO, no storage): the Project
//! aggregate, its milestones, the inputs that mutate them and the
//! `project.created` event.

pub mod commands;
pub mod events;
pub mod milestone;
pub mod project;

pub use commands::{AddMilestone, CreateProject, UpdateProject};
pub use events::{PROJECT_AGGREGATE_TYPE, PROJECT_CREATED, ProjectCreated};
pub use milestone::{Milestone, MilestoneId};
pub use project::{Project, ProjectId};
