//! Motion backend goals, feedback, and the client/server bundles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use helm_core::models::{GeoPoint, GeoPose};

use crate::actions::{self, ActionClient, ActionServer};

/// A pose with the time it was issued, as the path backends expect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoseStamped {
    pub stamp: DateTime<Utc>,
    pub pose: GeoPose,
}

/// Goal for the path follower and path planner backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathGoal {
    pub poses: Vec<GeoPoseStamped>,
    pub speed: f32,
}

/// Goal for the hover backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoverGoal {
    pub target: GeoPoint,
}

/// Goal for the survey-area coverage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyAreaGoal {
    pub area: Vec<GeoPoint>,
    pub speed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathFeedback {
    pub distance_remaining_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoverFeedback {
    pub range_m: f64,
    pub bearing_deg: f64,
    pub speed_mps: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurveyFeedback {
    pub percent_complete: f32,
}

/// Client side of every motion backend, owned by the state machine.
pub struct MotionBackends {
    pub path_follower: ActionClient<PathGoal, PathFeedback>,
    pub path_planner: ActionClient<PathGoal, PathFeedback>,
    pub hover: ActionClient<HoverGoal, HoverFeedback>,
    pub survey_area: ActionClient<SurveyAreaGoal, SurveyFeedback>,
}

impl MotionBackends {
    /// Cancel whatever goal each backend may still hold.
    pub fn cancel_all(&self) {
        self.path_follower.cancel_goal();
        self.path_planner.cancel_goal();
        self.hover.cancel_goal();
        self.survey_area.cancel_goal();
    }
}

/// Server side of every motion backend, handed to the transport bridge.
pub struct BackendServers {
    pub path_follower: ActionServer<PathGoal, PathFeedback>,
    pub path_planner: ActionServer<PathGoal, PathFeedback>,
    pub hover: ActionServer<HoverGoal, HoverFeedback>,
    pub survey_area: ActionServer<SurveyAreaGoal, SurveyFeedback>,
}

/// Create the four connected backend pairs.
pub fn bind() -> (MotionBackends, BackendServers) {
    let (path_follower, path_follower_server) = actions::pair("path_follower");
    let (path_planner, path_planner_server) = actions::pair("path_planner");
    let (hover, hover_server) = actions::pair("hover");
    let (survey_area, survey_area_server) = actions::pair("survey_area");
    (
        MotionBackends {
            path_follower,
            path_planner,
            hover,
            survey_area,
        },
        BackendServers {
            path_follower: path_follower_server,
            path_planner: path_planner_server,
            hover: hover_server,
            survey_area: survey_area_server,
        },
    )
}
