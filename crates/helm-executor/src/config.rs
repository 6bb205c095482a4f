//! Executor configuration from environment.

use std::env;

use helm_core::mission::{DoneBehavior, MissionConfig, PlannerKind};
use helm_core::models::GeoPoint;

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port for the line transport.
    pub transport_port: u16,
    /// Grid-planner service endpoint; unset means the service is absent.
    pub grid_planner_url: Option<String>,
    /// Dubins service endpoint; unset means the service is absent.
    pub dubins_url: Option<String>,
    /// Local-frame datum; latched from the first fix when unset.
    pub datum: Option<GeoPoint>,
    pub waypoint_threshold_m: f64,
    pub turn_radius_m: f64,
    pub segment_length_m: f64,
    pub default_speed_mps: f32,
    /// 0 = path follower, 1 = path planner.
    pub planner: PlannerKind,
    /// 0 = hover at the end of the list, 1 = restart from the top.
    pub done_behavior: DoneBehavior,
    pub lineup_distance_m: f64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            transport_port: env::var("HELM_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4700),
            grid_planner_url: env::var("HELM_GRID_PLANNER_URL").ok().filter(|s| !s.is_empty()),
            dubins_url: env::var("HELM_DUBINS_URL").ok().filter(|s| !s.is_empty()),
            datum: env::var("HELM_DATUM").ok().and_then(|s| parse_datum(&s)),
            waypoint_threshold_m: env_f64("HELM_WAYPOINT_THRESHOLD_M", 10.0),
            turn_radius_m: env_f64("HELM_TURN_RADIUS_M", 10.0),
            segment_length_m: env_f64("HELM_SEGMENT_LENGTH_M", 5.0),
            default_speed_mps: env::var("HELM_DEFAULT_SPEED_MPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2.0),
            planner: match env::var("HELM_PLANNER").as_deref() {
                Ok("1") => PlannerKind::Planner,
                _ => PlannerKind::Follower,
            },
            done_behavior: match env::var("HELM_DONE_BEHAVIOR").as_deref() {
                Ok("1") => DoneBehavior::Restart,
                _ => DoneBehavior::Hover,
            },
            lineup_distance_m: env_f64("HELM_LINEUP_DISTANCE_M", 25.0),
        }
    }

    /// The mission-level slice of the configuration.
    pub fn mission(&self) -> MissionConfig {
        MissionConfig {
            waypoint_threshold_m: self.waypoint_threshold_m,
            turn_radius_m: self.turn_radius_m,
            segment_length_m: self.segment_length_m,
            default_speed_mps: self.default_speed_mps,
            planner: self.planner,
            done_behavior: self.done_behavior,
            lineup_distance_m: self.lineup_distance_m,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport_port: 4700,
            grid_planner_url: None,
            dubins_url: None,
            datum: None,
            waypoint_threshold_m: 10.0,
            turn_radius_m: 10.0,
            segment_length_m: 5.0,
            default_speed_mps: 2.0,
            planner: PlannerKind::Follower,
            done_behavior: DoneBehavior::Hover,
            lineup_distance_m: 25.0,
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_datum(value: &str) -> Option<GeoPoint> {
    let (lat, lon) = value.split_once(',')?;
    Some(GeoPoint::new(
        lat.trim().parse().ok()?,
        lon.trim().parse().ok()?,
    ))
}
