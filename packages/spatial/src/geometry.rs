//! `GeoJSON` point geometry as stored in the `geometry` columns.

use geojson::GeoJson;

/// Encodes a WGS84 point as a `GeoJSON` geometry string.
#[must_use]
pub fn point_geojson(lat: f64, lon: f64) -> String {
    geojson::Geometry::new(geojson::Value::Point(vec![lon, lat])).to_string()
}

/// Decodes a `GeoJSON` point geometry string.
///
/// Returns `None` for anything that is not a single point with finite
/// coordinates inside the WGS84 range.
#[must_use]
pub fn parse_point_geojson(geojson_str: &str) -> Option<geo::Point<f64>> {
    let geojson: GeoJson = geojson_str.parse().ok()?;
    let GeoJson::Geometry(geom) = geojson else {
        return None;
    };

    let geo_geom: geo::Geometry<f64> = geom.try_into().ok()?;
    let geo::Geometry::Point(point) = geo_geom else {
        return None;
    };

    ((-180.0..=180.0).contains(&point.x()) && (-90.0..=90.0).contains(&point.y()))
        .then_some(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_survives_encoding() {
        let encoded = point_geojson(43.6532, -79.3832);
        assert!(encoded.contains("\"Point\""));

        let point = parse_point_geojson(&encoded).unwrap();
        assert!((point.x() - -79.3832).abs() < 1e-12);
        assert!((point.y() - 43.6532).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_points() {
        assert!(parse_point_geojson("not json").is_none());
        assert!(
            parse_point_geojson(r#"{"type":"LineString","coordinates":[[0,0],[1,1]]}"#).is_none()
        );
        assert!(parse_point_geojson(r#"{"type":"Point","coordinates":[200,0]}"#).is_none());
    }
}
