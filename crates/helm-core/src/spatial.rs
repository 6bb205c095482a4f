//! Spherical-earth math for waypoint distances, bearings, and offsets.
//!
//! Everything here works on one model: a sphere of radius [`EARTH_RADIUS_M`].
//! Distances come from the haversine formula; the meter/degree conversions
//! and the direct problem use the tangent plane at the point of interest,
//! which is plenty for survey-scale offsets like line-up pre-rolls.

/// Mean earth radius of the spherical model, meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two points given in degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let half_dphi = (phi2 - phi1) / 2.0;
    let half_dlambda = (lon2 - lon1).to_radians() / 2.0;
    let h = half_dphi.sin().powi(2) + phi1.cos() * phi2.cos() * half_dlambda.sin().powi(2);
    // h can creep past 1.0 for antipodal points; clamp before asin.
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from point 1 to point 2, degrees NED in
/// [0, 360).
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let east = dlambda.sin() * phi2.cos();
    let north = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    normalize_bearing_deg(east.atan2(north).to_degrees())
}

/// Distance in meters and bearing in degrees NED from point 1 to point 2.
pub fn distance_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64) {
    (
        haversine_distance(lat1, lon1, lat2, lon2),
        bearing_deg(lat1, lon1, lat2, lon2),
    )
}

/// Wrap a bearing in degrees into [0, 360).
pub fn normalize_bearing_deg(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}

/// North/south meters covered by a latitude difference in degrees.
pub fn lat_to_meters(dlat_deg: f64) -> f64 {
    dlat_deg.to_radians() * EARTH_RADIUS_M
}

/// East/west meters covered by a longitude difference in degrees, measured
/// along the parallel at `at_lat_deg` (parallels shrink toward the poles).
pub fn lon_to_meters(dlon_deg: f64, at_lat_deg: f64) -> f64 {
    dlon_deg.to_radians() * EARTH_RADIUS_M * at_lat_deg.to_radians().cos()
}

/// Latitude difference in degrees covered by a north/south offset in meters.
pub fn meters_to_lat(north_m: f64) -> f64 {
    (north_m / EARTH_RADIUS_M).to_degrees()
}

/// Longitude difference in degrees covered by an east/west offset in meters
/// at the parallel of `at_lat_deg`.
pub fn meters_to_lon(east_m: f64, at_lat_deg: f64) -> f64 {
    (east_m / (EARTH_RADIUS_M * at_lat_deg.to_radians().cos())).to_degrees()
}

/// The direct problem on the local tangent plane: the position reached by
/// travelling `distance_m` from (`lat_deg`, `lon_deg`) along a NED bearing.
/// Returns `(lat, lon)` in degrees.
pub fn direct(lat_deg: f64, lon_deg: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let along = bearing_deg.to_radians();
    let north_m = distance_m * along.cos();
    let east_m = distance_m * along.sin();
    (
        lat_deg + meters_to_lat(north_m),
        lon_deg + meters_to_lon(east_m, lat_deg),
    )
}

/// Convert a NED heading in degrees to an ENU yaw in degrees. Heading runs
/// clockwise from north, yaw counter-clockwise from east; the two mirror
/// each other around the 45-degree line.
pub fn heading_to_yaw_deg(heading_deg: f64) -> f64 {
    90.0 - heading_deg
}

/// Convert an ENU yaw in degrees back to a NED heading in [0, 360).
pub fn yaw_to_heading_deg(yaw_deg: f64) -> f64 {
    normalize_bearing_deg(90.0 - yaw_deg)
}
