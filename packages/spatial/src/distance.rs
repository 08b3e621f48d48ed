//! Great-circle distance and radius prefilter envelopes.

use geo::{Distance, Haversine, Point};
use rstar::AABB;

/// Mean Earth radius in kilometers, matching the radius [`Haversine`]
/// uses.
pub const EARTH_RADIUS_KM: f64 = 6_371.008_8;

/// Great-circle distance between two WGS84 points, in kilometers.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Haversine.distance(Point::new(lon1, lat1), Point::new(lon2, lat2)) / 1000.0
}

/// Returns `[lng, lat]` envelopes that together contain every point
/// within `radius_km` of the center.
///
/// The boxes are computed on the sphere, so they widen in longitude
/// toward the poles. A box crossing the antimeridian is split in two, and
/// a circle reaching a pole covers every longitude. The result is a
/// superset of the circle and must be followed by an exact
/// [`haversine_km`] check.
#[must_use]
pub fn radius_envelopes(lat: f64, lon: f64, radius_km: f64) -> Vec<AABB<[f64; 2]>> {
    let angular = radius_km / EARTH_RADIUS_KM;

    if angular >= std::f64::consts::PI {
        return vec![AABB::from_corners([-180.0, -90.0], [180.0, 90.0])];
    }

    let dlat = angular.to_degrees();
    let min_lat = lat - dlat;
    let max_lat = lat + dlat;

    if min_lat <= -90.0 || max_lat >= 90.0 {
        return vec![AABB::from_corners(
            [-180.0, min_lat.max(-90.0)],
            [180.0, max_lat.min(90.0)],
        )];
    }

    let ratio = (angular.sin() / lat.to_radians().cos()).min(1.0);
    let dlon = ratio.asin().to_degrees();

    if dlon >= 180.0 {
        return vec![AABB::from_corners([-180.0, min_lat], [180.0, max_lat])];
    }

    let min_lon = lon - dlon;
    let max_lon = lon + dlon;

    if min_lon < -180.0 {
        vec![
            AABB::from_corners([min_lon + 360.0, min_lat], [180.0, max_lat]),
            AABB::from_corners([-180.0, min_lat], [max_lon, max_lat]),
        ]
    } else if max_lon > 180.0 {
        vec![
            AABB::from_corners([min_lon, min_lat], [180.0, max_lat]),
            AABB::from_corners([-180.0, min_lat], [max_lon - 360.0, max_lat]),
        ]
    } else {
        vec![AABB::from_corners([min_lon, min_lat], [max_lon, max_lat])]
    }
}
