//! Geo utilities: great-circle distance, bearing, and straight-line ETA.
//!
//! No road routing here; distances are haversine and ETAs assume a fixed
//! average speed. Coordinate validation is the orchestrator's job.

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometers between two (lat, lon) points.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1) = (lat1.to_radians(), lon1.to_radians());
    let (lat2, lon2) = (lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Initial bearing in degrees from the first point toward the second,
/// normalized to [0, 360).
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1) = (lat1.to_radians(), lon1.to_radians());
    let (lat2, lon2) = (lat2.to_radians(), lon2.to_radians());
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Travel time in whole seconds for `distance_km` at `speed_kmh`.
/// Never negative; a non-positive speed yields zero.
pub fn eta_secs(distance_km: f64, speed_kmh: f64) -> u64 {
    if speed_kmh <= 0.0 || distance_km <= 0.0 {
        return 0;
    }
    (distance_km / speed_kmh * 3600.0).round() as u64
}

/// Distance in meters, for the short-range completion checks.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_km(lat1, lon1, lat2, lon2) * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    // Bangalore city center to the airport, roughly 32 km as the crow flies.
    const MG_ROAD: (f64, f64) = (12.9716, 77.5946);
    const AIRPORT: (f64, f64) = (13.1986, 77.7066);

    #[test]
    fn haversine_matches_known_distance() {
        let d = haversine_km(MG_ROAD.0, MG_ROAD.1, AIRPORT.0, AIRPORT.1);
        assert!((d - 28.0).abs() < 2.0, "got {d}");
    }

    #[test]
    fn haversine_zero_for_identical_points() {
        let d = haversine_km(MG_ROAD.0, MG_ROAD.1, MG_ROAD.0, MG_ROAD.1);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = haversine_km(MG_ROAD.0, MG_ROAD.1, AIRPORT.0, AIRPORT.1);
        let b = haversine_km(AIRPORT.0, AIRPORT.1, MG_ROAD.0, MG_ROAD.1);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn bearing_is_normalized() {
        let b = initial_bearing_deg(MG_ROAD.0, MG_ROAD.1, AIRPORT.0, AIRPORT.1);
        assert!((0.0..360.0).contains(&b));
        // Airport is northeast of the city center.
        assert!((0.0..90.0).contains(&b), "got {b}");
    }

    #[test]
    fn eta_at_forty_kmh() {
        // 10 km at 40 km/h is 15 minutes.
        assert_eq!(eta_secs(10.0, 40.0), 900);
        assert_eq!(eta_secs(0.0, 40.0), 0);
        assert_eq!(eta_secs(10.0, 0.0), 0);
        assert_eq!(eta_secs(-3.0, 40.0), 0);
    }

    #[test]
    fn meters_variant_scales_kilometers() {
        // ~111m per 0.001 degree of latitude.
        let m = haversine_m(12.9716, 77.5946, 12.9726, 77.5946);
        assert!((m - 111.0).abs() < 2.0, "got {m}");
    }
}
