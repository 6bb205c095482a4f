//! Status heartbeat, mission visualization, and end-of-line publishing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use helm_core::mission::MissionState;
use helm_core::models::{GeoPoint, GeoPose, NavObjective, Task};
use helm_core::spatial;

use crate::nav::Navigation;
use crate::path::PathBuilder;

const TRANSIT_COLOR: VizColor = VizColor {
    r: 0.4,
    g: 0.4,
    b: 0.4,
    a: 0.5,
};
const TRACK_COLOR: VizColor = VizColor {
    r: 0.65,
    g: 0.4,
    b: 0.75,
    a: 0.75,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Periodic status snapshot published on every executor tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub stamp: DateTime<Utc>,
    pub values: Vec<KeyValue>,
}

impl Heartbeat {
    /// First value carried under `key`, if any.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VizColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VizPolyline {
    pub color: VizColor,
    pub size: f32,
    pub points: Vec<GeoPoint>,
}

/// Geometric picture of the queued mission plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VizItem {
    pub id: String,
    pub lines: Vec<VizPolyline>,
}

/// Marker published at each trackline/transit boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndOfLine {
    Transit,
    Track,
}

impl fmt::Display for EndOfLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndOfLine::Transit => write!(f, "transit"),
            EndOfLine::Track => write!(f, "track"),
        }
    }
}

pub struct StatusPublisher {
    heartbeat_tx: broadcast::Sender<Heartbeat>,
    viz_tx: broadcast::Sender<VizItem>,
    endofline_tx: broadcast::Sender<EndOfLine>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (heartbeat_tx, _) = broadcast::channel(16);
        let (viz_tx, _) = broadcast::channel(16);
        let (endofline_tx, _) = broadcast::channel(16);
        Self {
            heartbeat_tx,
            viz_tx,
            endofline_tx,
        }
    }

    pub fn subscribe_heartbeat(&self) -> broadcast::Receiver<Heartbeat> {
        self.heartbeat_tx.subscribe()
    }

    pub fn subscribe_viz(&self) -> broadcast::Receiver<VizItem> {
        self.viz_tx.subscribe()
    }

    pub fn subscribe_end_of_line(&self) -> broadcast::Receiver<EndOfLine> {
        self.endofline_tx.subscribe()
    }

    pub fn publish_end_of_line(&self, boundary: EndOfLine) {
        tracing::info!("End of line: {}", boundary);
        let _ = self.endofline_tx.send(boundary);
    }

    /// Publish a heartbeat snapshot and the visualization layer.
    pub async fn publish(
        &self,
        state_name: &str,
        core: &MissionState,
        nav: &Navigation,
        paths: &PathBuilder,
    ) {
        let mut values = vec![
            KeyValue::new("state", state_name),
            KeyValue::new("tasks_count", core.tasks().len().to_string()),
        ];

        let mut viz = VizItem {
            id: "mission_manager".to_string(),
            lines: Vec::new(),
        };

        // The projected endpoint/heading chain across objectives, seeded from
        // the vehicle when nothing is being worked on.
        let mut last_position: Option<GeoPoint> = None;
        let mut last_heading: Option<f64> = None;
        if core.current_task().is_none() {
            last_position = nav.position();
            last_heading = nav.heading();
        }

        for task in core.tasks() {
            let mut entry = task.kind_str().to_string();
            if let Task::MissionPlan(plan) = task {
                if !plan.label.is_empty() {
                    entry = format!("mission_plan ({})", plan.label);
                }
            }
            values.push(KeyValue::new("-task", entry));

            let Task::MissionPlan(plan) = task else {
                continue;
            };
            for objective in &plan.nav_objectives {
                let points = objective_points(objective);
                let next_heading = match points {
                    [first, second, ..] => Some(
                        spatial::distance_bearing_deg(
                            first.lat_deg,
                            first.lon_deg,
                            second.lat_deg,
                            second.lon_deg,
                        )
                        .1,
                    ),
                    [only] => last_position.map(|from| {
                        spatial::distance_bearing_deg(
                            from.lat_deg,
                            from.lon_deg,
                            only.lat_deg,
                            only.lon_deg,
                        )
                        .1
                    }),
                    [] => None,
                };

                if let (Some(heading), Some(from), Some(from_heading)) =
                    (next_heading, last_position, last_heading)
                {
                    let first = points[0];
                    let (lineup_lat, lineup_lon) = spatial::direct(
                        first.lat_deg,
                        first.lon_deg,
                        heading + 180.0,
                        core.config.lineup_distance_m,
                    );
                    let approach = paths
                        .generate_path(
                            nav,
                            GeoPose::new(from.lat_deg, from.lon_deg, Some(from_heading)),
                            GeoPose::new(lineup_lat, lineup_lon, Some(heading)),
                        )
                        .await;
                    let mut line = VizPolyline {
                        color: TRANSIT_COLOR,
                        size: 2.0,
                        points: approach.iter().map(|p| p.position).collect(),
                    };
                    line.points.push(first);
                    viz.lines.push(line);
                }

                if !points.is_empty() {
                    viz.lines.push(VizPolyline {
                        color: TRACK_COLOR,
                        size: 3.0,
                        points: points.to_vec(),
                    });
                    last_position = points.last().copied();
                    if let [.., a, b] = points {
                        last_heading = Some(
                            spatial::distance_bearing_deg(
                                a.lat_deg,
                                a.lon_deg,
                                b.lat_deg,
                                b.lon_deg,
                            )
                            .1,
                        );
                    }
                }
            }
        }

        let _ = self.viz_tx.send(viz);

        match core.current_task() {
            None => values.push(KeyValue::new("current_task", "None")),
            Some(task) => {
                values.push(KeyValue::new("current_task_type", task.kind_str()));
                if let Task::MissionPlan(plan) = task {
                    values.push(KeyValue::new("current_task_label", plan.label.clone()));
                    values.push(KeyValue::new(
                        "current_task_nav_objective_count",
                        plan.nav_objectives.len().to_string(),
                    ));
                    values.push(KeyValue::new(
                        "current_task_nav_objective_index",
                        plan.current_index
                            .map(|i| i.to_string())
                            .unwrap_or_else(|| "None".to_string()),
                    ));
                }
            }
        }

        let _ = self.heartbeat_tx.send(Heartbeat {
            stamp: Utc::now(),
            values,
        });
    }
}

fn objective_points(objective: &NavObjective) -> &[GeoPoint] {
    match objective {
        NavObjective::TrackLine { waypoints } => waypoints,
        NavObjective::SurveyArea { boundary } => boundary,
    }
}
