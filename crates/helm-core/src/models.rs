//! Core data models for mission tasks.

use serde::{Deserialize, Serialize};

/// A geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

impl GeoPoint {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self { lat_deg, lon_deg }
    }
}

/// A geographic point plus an optional heading in degrees NED.
///
/// Waypoints lifted straight from a trackline have no prescribed heading;
/// poses produced by the path services do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPose {
    pub position: GeoPoint,
    #[serde(default)]
    pub heading_deg: Option<f64>,
}

impl GeoPose {
    pub fn new(lat_deg: f64, lon_deg: f64, heading_deg: Option<f64>) -> Self {
        Self {
            position: GeoPoint::new(lat_deg, lon_deg),
            heading_deg,
        }
    }

    pub fn from_point(position: GeoPoint) -> Self {
        Self {
            position,
            heading_deg: None,
        }
    }
}

/// Top-level piloting mode received from the operator station.
///
/// Only `Autonomous` enables task execution; everything else parks the
/// executor in the Pause state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PilotingMode {
    Standby,
    Autonomous,
    Other(String),
}

impl From<&str> for PilotingMode {
    fn from(value: &str) -> Self {
        match value.trim() {
            "standby" => PilotingMode::Standby,
            "autonomous" => PilotingMode::Autonomous,
            other => PilotingMode::Other(other.to_string()),
        }
    }
}

impl PilotingMode {
    pub fn as_str(&self) -> &str {
        match self {
            PilotingMode::Standby => "standby",
            PilotingMode::Autonomous => "autonomous",
            PilotingMode::Other(s) => s,
        }
    }
}

/// Kind of a path stashed on a goto/hover task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    Transit,
}

/// A unit of work in the mission list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Goto(GotoTask),
    Hover(HoverTask),
    MissionPlan(MissionPlanTask),
}

/// Transit to a waypoint, then advance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GotoTask {
    pub target: GeoPoint,
    /// Derived path from the vehicle to the target; rebuilt on demand.
    #[serde(default)]
    pub path: Option<Vec<GeoPose>>,
    #[serde(default)]
    pub path_kind: Option<PathKind>,
    pub speed: f32,
}

/// Station-keep at a waypoint until interrupted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoverTask {
    pub target: GeoPoint,
    /// Derived transit path toward the hover point; rebuilt on demand.
    #[serde(default)]
    pub path: Option<Vec<GeoPose>>,
    pub speed: f32,
}

/// A composite plan of tracklines and survey areas, executed in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionPlanTask {
    pub label: String,
    pub default_speed: f32,
    /// Whether to line up on the next trackline with a transit pre-roll.
    pub do_transit: bool,
    pub nav_objectives: Vec<NavObjective>,
    /// Index of the objective in progress; `None` before the plan starts.
    #[serde(default)]
    pub current_index: Option<usize>,
    /// Derived poses for the objective in progress.
    #[serde(default)]
    pub current_path: Option<Vec<GeoPose>>,
    /// Derived line-up path onto the objective in progress.
    #[serde(default)]
    pub transit_path: Option<Vec<GeoPose>>,
}

impl MissionPlanTask {
    /// Forget all execution progress, returning the plan to its pristine state.
    pub fn reset_progress(&mut self) {
        self.current_index = None;
        self.invalidate_paths();
    }

    /// Drop the derived paths; they are rebuilt the next time the plan runs.
    pub fn invalidate_paths(&mut self) {
        self.current_path = None;
        self.transit_path = None;
    }

    /// The objective in progress, if the index is set and in range.
    pub fn current_objective(&self) -> Option<&NavObjective> {
        self.current_index.and_then(|i| self.nav_objectives.get(i))
    }
}

/// A sub-unit of a mission plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavObjective {
    /// An ordered line of survey waypoints; carries at least one point.
    TrackLine { waypoints: Vec<GeoPoint> },
    /// A polygon to cover; carries at least three boundary points.
    SurveyArea { boundary: Vec<GeoPoint> },
}

impl Task {
    /// Task kind label used in status heartbeats.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Task::Goto(_) => "goto",
            Task::Hover(_) => "hover",
            Task::MissionPlan(_) => "mission_plan",
        }
    }

    /// Target point for goto/hover tasks.
    pub fn target(&self) -> Option<GeoPoint> {
        match self {
            Task::Goto(t) => Some(t.target),
            Task::Hover(t) => Some(t.target),
            Task::MissionPlan(_) => None,
        }
    }

    /// The speed the motion backends should run this task at.
    pub fn speed(&self) -> f32 {
        match self {
            Task::Goto(t) => t.speed,
            Task::Hover(t) => t.speed,
            Task::MissionPlan(t) => t.default_speed,
        }
    }

    /// Drop all derived path state from the task.
    pub fn invalidate_paths(&mut self) {
        match self {
            Task::Goto(t) => {
                t.path = None;
                t.path_kind = None;
            }
            Task::Hover(t) => t.path = None,
            Task::MissionPlan(t) => t.invalidate_paths(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piloting_mode_from_str() {
        assert_eq!(PilotingMode::from("autonomous"), PilotingMode::Autonomous);
        assert_eq!(PilotingMode::from(" standby "), PilotingMode::Standby);
        assert_eq!(
            PilotingMode::from("manual"),
            PilotingMode::Other("manual".to_string())
        );
    }

    #[test]
    fn test_mission_plan_reset_progress() {
        let mut plan = MissionPlanTask {
            label: "survey".to_string(),
            default_speed: 2.0,
            do_transit: true,
            nav_objectives: vec![NavObjective::TrackLine {
                waypoints: vec![GeoPoint::new(43.0, -70.0)],
            }],
            current_index: Some(0),
            current_path: Some(vec![GeoPose::new(43.0, -70.0, None)]),
            transit_path: Some(vec![]),
        };
        plan.reset_progress();
        assert_eq!(plan.current_index, None);
        assert!(plan.current_path.is_none());
        assert!(plan.transit_path.is_none());
    }
}
