//! Path construction over the external planning services.
//!
//! The ladder is: grid planner, then Dubins, then an empty path. Each rung
//! gets a bounded 500 ms window; an empty path is the "cannot plan" signal
//! and every caller tolerates it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use helm_core::models::GeoPose;

use crate::config::Config;
use crate::nav::{LocalPose, Navigation};

const SERVICE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct PathBuilder {
    client: reqwest::Client,
    grid_planner_url: Option<String>,
    dubins_url: Option<String>,
    turn_radius_m: f64,
    segment_length_m: f64,
}

#[derive(Debug, Serialize)]
struct GridPlanRequest {
    start_pose: LocalPose,
    goal_pose: LocalPose,
}

#[derive(Debug, Deserialize)]
struct GridPlanResponse {
    poses: Vec<LocalPose>,
}

#[derive(Debug, Serialize)]
struct DubinsRequest {
    radius: f64,
    sampling_interval: f64,
    start_geo_pose: WireGeoPose,
    target_geo_pose: WireGeoPose,
}

/// A pose on the Dubins wire: position in degrees, orientation as the ENU
/// yaw in radians encoded from the NED heading.
#[derive(Debug, Serialize)]
struct WireGeoPose {
    latitude: f64,
    longitude: f64,
    yaw_rad: f64,
}

impl WireGeoPose {
    fn from_geo_pose(pose: &GeoPose) -> Self {
        let heading = pose.heading_deg.unwrap_or(0.0);
        Self {
            latitude: pose.position.lat_deg,
            longitude: pose.position.lon_deg,
            yaw_rad: helm_core::spatial::heading_to_yaw_deg(heading).to_radians(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DubinsResponse {
    path: Vec<WireGeoPoint>,
}

#[derive(Debug, Deserialize)]
struct WireGeoPoint {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    heading_deg: Option<f64>,
}

impl PathBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            grid_planner_url: config.grid_planner_url.clone(),
            dubins_url: config.dubins_url.clone(),
            turn_radius_m: config.turn_radius_m,
            segment_length_m: config.segment_length_m,
        }
    }

    /// Build a path from `start` to `target`, walking the service ladder.
    pub async fn generate_path(
        &self,
        nav: &Navigation,
        start: GeoPose,
        target: GeoPose,
    ) -> Vec<GeoPose> {
        if let Some(path) = self.try_grid_planner(nav, start, target).await {
            return path;
        }
        if let Some(path) = self.try_dubins(start, target).await {
            return path;
        }
        tracing::error!("No path service answered; returning an empty path");
        Vec::new()
    }

    /// Build a path from the vehicle's current pose to `target`. Without a
    /// fix no plan can be made and the path is empty.
    pub async fn generate_path_from_vehicle(
        &self,
        nav: &Navigation,
        target: GeoPose,
    ) -> Vec<GeoPose> {
        let Some(start) = nav.pose() else {
            tracing::warn!("No position fix; cannot plan from the vehicle");
            return Vec::new();
        };
        self.generate_path(nav, start, target).await
    }

    async fn try_grid_planner(
        &self,
        nav: &Navigation,
        start: GeoPose,
        target: GeoPose,
    ) -> Option<Vec<GeoPose>> {
        let url = self.grid_planner_url.as_deref()?;
        let start_pose = nav.geo_to_local_pose(
            start.position.lat_deg,
            start.position.lon_deg,
            start.heading_deg.unwrap_or(0.0),
        )?;
        let goal_pose = nav.geo_to_local_pose(
            target.position.lat_deg,
            target.position.lon_deg,
            target.heading_deg.unwrap_or(0.0),
        )?;

        let request = GridPlanRequest {
            start_pose,
            goal_pose,
        };
        let response = self
            .client
            .post(url)
            .timeout(SERVICE_TIMEOUT)
            .json(&request)
            .send()
            .await;
        match response {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.json::<GridPlanResponse>().await {
                    Ok(plan) => Some(nav.local_poses_to_geo_poses(&plan.poses)),
                    Err(err) => {
                        tracing::warn!("Bad grid planner response ({}); falling back to Dubins", err);
                        None
                    }
                },
                Err(err) => {
                    tracing::warn!("Grid planner rejected the request ({}); falling back to Dubins", err);
                    None
                }
            },
            Err(err) => {
                tracing::warn!("Grid planner not available ({}); falling back to Dubins", err);
                None
            }
        }
    }

    async fn try_dubins(&self, start: GeoPose, target: GeoPose) -> Option<Vec<GeoPose>> {
        let url = self.dubins_url.as_deref()?;
        let request = DubinsRequest {
            radius: self.turn_radius_m,
            sampling_interval: self.segment_length_m,
            start_geo_pose: WireGeoPose::from_geo_pose(&start),
            target_geo_pose: WireGeoPose::from_geo_pose(&target),
        };
        let response = self
            .client
            .post(url)
            .timeout(SERVICE_TIMEOUT)
            .json(&request)
            .send()
            .await;
        match response {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.json::<DubinsResponse>().await {
                    Ok(dubins) => Some(
                        dubins
                            .path
                            .into_iter()
                            .map(|p| GeoPose::new(p.latitude, p.longitude, p.heading_deg))
                            .collect(),
                    ),
                    Err(err) => {
                        tracing::error!("Bad Dubins response: {}", err);
                        None
                    }
                },
                Err(err) => {
                    tracing::error!("Dubins service rejected the request: {}", err);
                    None
                }
            },
            Err(err) => {
                tracing::error!("Dubins service not available: {}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav::NavFix;
    use tokio::sync::watch;

    fn navigation() -> Navigation {
        let (tx, rx) = watch::channel(Some(NavFix {
            lat_deg: 43.0,
            lon_deg: -70.0,
            heading_deg: 0.0,
        }));
        // The last value stays readable after the sender is gone.
        drop(tx);
        Navigation::new(rx, None)
    }

    #[tokio::test]
    async fn test_no_services_yields_empty_path() {
        let builder = PathBuilder::new(&Config::default());
        let nav = navigation();
        let path = builder
            .generate_path(
                &nav,
                GeoPose::new(43.0, -70.0, Some(0.0)),
                GeoPose::new(43.01, -70.0, Some(0.0)),
            )
            .await;
        assert!(path.is_empty());
    }

    #[tokio::test]
    async fn test_no_fix_yields_empty_path_from_vehicle() {
        let builder = PathBuilder::new(&Config::default());
        let (_tx, rx) = watch::channel(None);
        let nav = Navigation::new(rx, None);
        let path = builder
            .generate_path_from_vehicle(&nav, GeoPose::new(43.01, -70.0, Some(0.0)))
            .await;
        assert!(path.is_empty());
    }
}
