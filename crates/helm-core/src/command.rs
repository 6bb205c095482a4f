//! External command grammar.
//!
//! Commands are whitespace-separated text lines; the first token is the verb.
//! Parsing never mutates mission state directly: it produces a [`Command`]
//! value that the mission core applies on its own tick.

use serde::Deserialize;
use thiserror::Error;

use crate::models::{GeoPoint, GotoTask, HoverTask, MissionPlanTask, NavObjective, Task};

const KNOTS_TO_MPS: f64 = 0.514444;

/// A parsed command, ready to be applied to the mission core.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Clear the task list, add the parsed tasks, and queue a `NextTask`.
    ReplaceTask(Vec<Task>),
    AppendTask(Vec<Task>),
    PrependTask(Vec<Task>),
    ClearTasks,
    Pending(PendingCommand),
    /// Install a transient goto/hover override.
    Override(Task),
}

/// A command held in the core's single-slot mailbox until the state machine
/// consumes it at the next advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCommand {
    NextTask,
    PrevTask,
    DoOverride,
    RestartMission,
    /// Accepted by the grammar; the advancement policy has no action for it.
    GotoTask(usize),
    GotoLine(usize),
    StartLine(usize),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("no defined action for command verb `{0}`")]
    UnknownVerb(String),
    #[error("no defined task of type `{0}`")]
    UnknownTaskType(String),
    #[error("command `{0}` is missing its arguments")]
    MissingArgs(&'static str),
    #[error("cannot split `{0}` into exactly two coordinates")]
    CoordinateArity(String),
    #[error("cannot convert `{0}` into two floats")]
    CoordinateFloat(String),
    #[error("cannot convert `{0}` into an objective index")]
    BadIndex(String),
    #[error("override task must be goto or hover, not `{0}`")]
    BadOverride(String),
    #[error("malformed mission plan json: {0}")]
    BadJson(#[from] serde_json::Error),
}

/// Parse one command line.
///
/// `default_speed_mps` seeds the speed of produced tasks and the rolling
/// speed of mission-plan expansion. A parse error leaves no partial effect.
pub fn parse(line: &str, default_speed_mps: f32) -> Result<Command, CommandError> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None if line.is_empty() => return Err(CommandError::Empty),
        None => (line, ""),
    };

    match verb {
        "replace_task" => Ok(Command::ReplaceTask(parse_task_spec(
            require_args("replace_task", rest)?,
            default_speed_mps,
        )?)),
        "append_task" => Ok(Command::AppendTask(parse_task_spec(
            require_args("append_task", rest)?,
            default_speed_mps,
        )?)),
        "prepend_task" => Ok(Command::PrependTask(parse_task_spec(
            require_args("prepend_task", rest)?,
            default_speed_mps,
        )?)),
        "clear_tasks" => Ok(Command::ClearTasks),
        "next_task" => Ok(Command::Pending(PendingCommand::NextTask)),
        "prev_task" => Ok(Command::Pending(PendingCommand::PrevTask)),
        "restart_mission" => Ok(Command::Pending(PendingCommand::RestartMission)),
        "goto_task" => Ok(Command::Pending(PendingCommand::GotoTask(parse_index(
            require_args("goto_task", rest)?,
        )?))),
        "goto_line" => Ok(Command::Pending(PendingCommand::GotoLine(parse_index(
            require_args("goto_line", rest)?,
        )?))),
        "start_line" => Ok(Command::Pending(PendingCommand::StartLine(parse_index(
            require_args("start_line", rest)?,
        )?))),
        "override" => parse_override(require_args("override", rest)?, default_speed_mps),
        other => Err(CommandError::UnknownVerb(other.to_string())),
    }
}

fn require_args<'a>(verb: &'static str, rest: &'a str) -> Result<&'a str, CommandError> {
    if rest.is_empty() {
        Err(CommandError::MissingArgs(verb))
    } else {
        Ok(rest)
    }
}

fn parse_index(args: &str) -> Result<usize, CommandError> {
    args.trim()
        .parse()
        .map_err(|_| CommandError::BadIndex(args.to_string()))
}

/// Splits a string into latitude and longitude.
fn parse_lat_lon(args: &str) -> Result<GeoPoint, CommandError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(CommandError::CoordinateArity(args.to_string()));
    }
    let lat: f64 = parts[0]
        .parse()
        .map_err(|_| CommandError::CoordinateFloat(args.to_string()))?;
    let lon: f64 = parts[1]
        .parse()
        .map_err(|_| CommandError::CoordinateFloat(args.to_string()))?;
    Ok(GeoPoint::new(lat, lon))
}

fn parse_override(args: &str, default_speed_mps: f32) -> Result<Command, CommandError> {
    let (task_type, rest) = args
        .split_once(char::is_whitespace)
        .ok_or(CommandError::MissingArgs("override"))?;
    let target = parse_lat_lon(rest)?;
    let task = match task_type {
        "goto" => Task::Goto(GotoTask {
            target,
            path: None,
            path_kind: None,
            speed: default_speed_mps,
        }),
        "hover" => Task::Hover(HoverTask {
            target,
            path: None,
            speed: default_speed_mps,
        }),
        other => return Err(CommandError::BadOverride(other.to_string())),
    };
    Ok(Command::Override(task))
}

/// Parse a `<taskspec>`: `goto <lat> <lon>`, `hover <lat> <lon>`, or
/// `mission_plan <json>`. A mission plan may expand to zero or more tasks.
fn parse_task_spec(spec: &str, default_speed_mps: f32) -> Result<Vec<Task>, CommandError> {
    let (task_type, rest) = spec
        .split_once(char::is_whitespace)
        .ok_or(CommandError::MissingArgs("taskspec"))?;
    match task_type {
        "goto" => Ok(vec![Task::Goto(GotoTask {
            target: parse_lat_lon(rest)?,
            path: None,
            path_kind: None,
            speed: default_speed_mps,
        })]),
        "hover" => Ok(vec![Task::Hover(HoverTask {
            target: parse_lat_lon(rest)?,
            path: None,
            speed: default_speed_mps,
        })]),
        "mission_plan" => {
            let items: Vec<PlanItem> = serde_json::from_str(rest)?;
            let mut tasks = Vec::new();
            expand_items(&items, default_speed_mps, &mut tasks);
            Ok(tasks)
        }
        other => Err(CommandError::UnknownTaskType(other.to_string())),
    }
}

/// One node of the mission-plan JSON tree. The tree is free-form; fields not
/// relevant to a node's `type` are simply absent.
#[derive(Debug, Deserialize)]
struct PlanItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    waypoints: Vec<PlanPoint>,
    #[serde(default)]
    children: Vec<PlanItem>,
}

#[derive(Debug, Deserialize)]
struct PlanPoint {
    latitude: f64,
    longitude: f64,
}

/// Expand a list of plan items into tasks.
///
/// `speed` is the rolling platform speed: a `Platform` item updates it for
/// the items that follow at the same level. Recursion passes the current
/// value down by copy, so nested updates do not leak back out.
fn expand_items(items: &[PlanItem], mut speed: f32, out: &mut Vec<Task>) {
    for item in items {
        match item.kind.as_str() {
            "Platform" => {
                if let Some(knots) = item.speed {
                    speed = (knots * KNOTS_TO_MPS) as f32;
                }
            }
            "SurveyPattern" => {
                let objectives = item
                    .children
                    .iter()
                    .filter_map(objective_from_item)
                    .collect();
                push_plan(item, objectives, speed, out);
            }
            "TrackLine" => {
                let objectives = objective_from_item(item).into_iter().collect();
                push_plan(item, objectives, speed, out);
            }
            "SurveyArea" => {
                let all_waypoints = item.children.iter().all(|c| c.kind == "Waypoint");
                if all_waypoints {
                    let objectives = objective_from_item(item).into_iter().collect();
                    push_plan(item, objectives, speed, out);
                } else {
                    expand_items(&item.children, speed, out);
                }
            }
            "Group" => expand_items(&item.children, speed, out),
            other => {
                tracing::debug!("Ignoring mission plan item of type `{}`", other);
            }
        }
    }
}

/// Push a mission plan built from `item`, unless every objective was dropped.
/// A plan with nothing to do would only pad the queue and self-complete.
fn push_plan(item: &PlanItem, nav_objectives: Vec<NavObjective>, speed: f32, out: &mut Vec<Task>) {
    if nav_objectives.is_empty() {
        tracing::error!(
            "Dropping mission plan item `{:?}` with no usable objectives",
            item.label
        );
        return;
    }
    out.push(Task::MissionPlan(MissionPlanTask {
        label: item.label.clone().unwrap_or_default(),
        default_speed: speed,
        do_transit: true,
        nav_objectives,
        current_index: None,
        current_path: None,
        transit_path: None,
    }));
}

/// Lift a plan item into a navigation objective, enforcing the arity
/// invariants (a trackline needs a waypoint, a survey area three corners).
fn objective_from_item(item: &PlanItem) -> Option<NavObjective> {
    match item.kind.as_str() {
        "TrackLine" => {
            let waypoints: Vec<GeoPoint> = item
                .waypoints
                .iter()
                .map(|p| GeoPoint::new(p.latitude, p.longitude))
                .collect();
            if waypoints.is_empty() {
                tracing::error!("Dropping trackline `{:?}` with no waypoints", item.label);
                return None;
            }
            Some(NavObjective::TrackLine { waypoints })
        }
        "SurveyArea" => {
            let boundary: Vec<GeoPoint> = item
                .children
                .iter()
                .filter(|c| c.kind == "Waypoint")
                .filter_map(|c| Some(GeoPoint::new(c.latitude?, c.longitude?)))
                .collect();
            if boundary.len() < 3 {
                tracing::error!(
                    "Dropping survey area `{:?}` with fewer than 3 corners",
                    item.label
                );
                return None;
            }
            Some(NavObjective::SurveyArea { boundary })
        }
        other => {
            tracing::debug!("Ignoring nav objective of type `{}`", other);
            None
        }
    }
}
