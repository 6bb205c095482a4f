//! Navigation adapter: vehicle pose and geographic/local frame conversions.
//!
//! Position is fed through a watch channel by the transport; every accessor
//! reports absence with `Option` so callers can suppress derived actions and
//! retry on a later tick.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use helm_core::models::{GeoPoint, GeoPose};
use helm_core::spatial;

/// One odometry fix from the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavFix {
    pub lat_deg: f64,
    pub lon_deg: f64,
    /// Heading in degrees NED.
    pub heading_deg: f64,
}

/// A pose in the local east/north tangent frame: meters east (`x`), meters
/// north (`y`), and ENU yaw in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalPose {
    pub x: f64,
    pub y: f64,
    pub yaw_rad: f64,
}

pub struct Navigation {
    rx: watch::Receiver<Option<NavFix>>,
    /// Datum latched from the first fix when not configured.
    latched_datum: OnceLock<GeoPoint>,
    configured_datum: Option<GeoPoint>,
}

impl Navigation {
    pub fn new(rx: watch::Receiver<Option<NavFix>>, configured_datum: Option<GeoPoint>) -> Self {
        Self {
            rx,
            latched_datum: OnceLock::new(),
            configured_datum,
        }
    }

    /// The latest odometry fix, if any has arrived.
    pub fn fix(&self) -> Option<NavFix> {
        *self.rx.borrow()
    }

    /// Current position as (lat, lon) in radians; absent before the first fix.
    pub fn position_lat_lon(&self) -> Option<(f64, f64)> {
        self.fix()
            .map(|f| (f.lat_deg.to_radians(), f.lon_deg.to_radians()))
    }

    /// Current position in degrees.
    pub fn position(&self) -> Option<GeoPoint> {
        self.fix().map(|f| GeoPoint::new(f.lat_deg, f.lon_deg))
    }

    /// Current heading in degrees NED.
    pub fn heading(&self) -> Option<f64> {
        self.fix().map(|f| f.heading_deg)
    }

    /// Current pose with heading.
    pub fn pose(&self) -> Option<GeoPose> {
        self.fix()
            .map(|f| GeoPose::new(f.lat_deg, f.lon_deg, Some(f.heading_deg)))
    }

    /// Distance in meters and bearing in degrees NED from the vehicle to a
    /// point; absent without a fix.
    pub fn distance_bearing_to(&self, lat_deg: f64, lon_deg: f64) -> Option<(f64, f64)> {
        let fix = self.fix()?;
        Some(spatial::distance_bearing_deg(
            fix.lat_deg,
            fix.lon_deg,
            lat_deg,
            lon_deg,
        ))
    }

    fn datum(&self) -> Option<GeoPoint> {
        if let Some(datum) = self.configured_datum {
            return Some(datum);
        }
        if let Some(datum) = self.latched_datum.get() {
            return Some(*datum);
        }
        let fix = self.fix()?;
        let datum = GeoPoint::new(fix.lat_deg, fix.lon_deg);
        Some(*self.latched_datum.get_or_init(|| datum))
    }

    /// Convert a geographic pose to the local frame; absent until a datum is
    /// available.
    pub fn geo_to_local_pose(
        &self,
        lat_deg: f64,
        lon_deg: f64,
        heading_deg: f64,
    ) -> Option<LocalPose> {
        let datum = self.datum()?;
        Some(LocalPose {
            x: spatial::lon_to_meters(lon_deg - datum.lon_deg, datum.lat_deg),
            y: spatial::lat_to_meters(lat_deg - datum.lat_deg),
            yaw_rad: spatial::heading_to_yaw_deg(heading_deg).to_radians(),
        })
    }

    /// Convert local-frame poses back to geographic poses. Without a datum
    /// the result is empty.
    pub fn local_poses_to_geo_poses(&self, poses: &[LocalPose]) -> Vec<GeoPose> {
        let Some(datum) = self.datum() else {
            return Vec::new();
        };
        poses
            .iter()
            .map(|p| {
                GeoPose::new(
                    datum.lat_deg + spatial::meters_to_lat(p.y),
                    datum.lon_deg + spatial::meters_to_lon(p.x, datum.lat_deg),
                    Some(spatial::yaw_to_heading_deg(p.yaw_rad.to_degrees())),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn navigation_with_fix(fix: Option<NavFix>) -> (watch::Sender<Option<NavFix>>, Navigation) {
        let (tx, rx) = watch::channel(fix);
        (tx, Navigation::new(rx, None))
    }

    #[test]
    fn test_absent_before_first_fix() {
        let (_tx, nav) = navigation_with_fix(None);
        assert!(nav.position_lat_lon().is_none());
        assert!(nav.heading().is_none());
        assert!(nav.distance_bearing_to(43.0, -70.0).is_none());
        assert!(nav.geo_to_local_pose(43.0, -70.0, 0.0).is_none());
        assert!(nav.local_poses_to_geo_poses(&[]).is_empty());
    }

    #[test]
    fn test_distance_bearing_from_fix() {
        let (_tx, nav) = navigation_with_fix(Some(NavFix {
            lat_deg: 43.0,
            lon_deg: -70.0,
            heading_deg: 90.0,
        }));
        let (distance, bearing) = nav.distance_bearing_to(43.0, -69.99).unwrap();
        assert!((bearing - 90.0).abs() < 0.1);
        assert!((distance - 814.0).abs() < 10.0);
    }

    #[test]
    fn test_local_frame_round_trip() {
        let (_tx, nav) = navigation_with_fix(Some(NavFix {
            lat_deg: 43.0,
            lon_deg: -70.0,
            heading_deg: 45.0,
        }));
        let local = nav.geo_to_local_pose(43.001, -70.002, 30.0).unwrap();
        let geo = nav.local_poses_to_geo_poses(&[local]);
        assert_eq!(geo.len(), 1);
        assert!((geo[0].position.lat_deg - 43.001).abs() < 1e-9);
        assert!((geo[0].position.lon_deg - -70.002).abs() < 1e-9);
        assert!((geo[0].heading_deg.unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_datum_latches_on_first_use() {
        let (tx, nav) = navigation_with_fix(Some(NavFix {
            lat_deg: 43.0,
            lon_deg: -70.0,
            heading_deg: 0.0,
        }));
        let before = nav.geo_to_local_pose(43.001, -70.0, 0.0).unwrap();
        tx.send(Some(NavFix {
            lat_deg: 44.0,
            lon_deg: -71.0,
            heading_deg: 0.0,
        }))
        .unwrap();
        let after = nav.geo_to_local_pose(43.001, -70.0, 0.0).unwrap();
        assert_eq!(before, after);
    }
}
