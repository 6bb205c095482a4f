//! Mission model and policy for the helm executor.
//!
//! This crate is pure logic: the task data model, the external command
//! grammar, the spatial math, and the task-advancement policy. Everything
//! that talks to the outside world (navigation, path services, motion
//! backends, transports) lives in `helm-executor`.

pub mod command;
pub mod mission;
pub mod models;
pub mod spatial;

pub use command::{Command, CommandError, PendingCommand};
pub use mission::{CurrentTask, DoneBehavior, MissionConfig, MissionState, PlannerKind};
pub use models::{
    GeoPoint, GeoPose, GotoTask, HoverTask, MissionPlanTask, NavObjective, PathKind,
    PilotingMode, Task,
};
