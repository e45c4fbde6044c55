/// Mean Earth radius used by the spherical approximation.
pub const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance in kilometres (haversine).
///
/// Inputs are not validated; out-of-range coordinates give a defined but
/// meaningless answer. Every query path goes through this one function so
/// rankings agree with each other.
#[inline]
pub fn great_circle_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let half_lat = (d_lat / 2.0).sin();
    let half_lng = (d_lng / 2.0).sin();
    let a = half_lat * half_lat + lat1.cos() * lat2.cos() * half_lng * half_lng;

    // Rounding can push `a` a hair past 1 for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn zero_for_identical_points() {
        for &(lat, lng) in &[(0.0, 0.0), (51.5, -0.12), (-89.9, 179.9), (90.0, 0.0)] {
            assert_eq!(great_circle_km(lat, lng, lat, lng), 0.0);
        }
    }

    #[test]
    fn symmetric() {
        let pairs = [((40.7128, -74.006), (34.0522, -118.2437)), ((-33.86, 151.2), (35.68, 139.69))];
        for ((a_lat, a_lng), (b_lat, b_lng)) in pairs {
            let there = great_circle_km(a_lat, a_lng, b_lat, b_lng);
            let back = great_circle_km(b_lat, b_lng, a_lat, a_lng);
            assert!(approx(there, back, 1e-9), "{there} != {back}");
        }
    }

    #[test]
    fn one_degree_on_equator() {
        // 2πR / 360
        assert!(approx(great_circle_km(0.0, 0.0, 0.0, 1.0), 111.195, 0.01));
        assert!(approx(great_circle_km(0.0, 0.0, 1.0, 0.0), 111.195, 0.01));
    }

    #[test]
    fn london_to_paris() {
        let d = great_circle_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!(approx(d, 343.5, 1.0), "got {d}");
    }

    #[test]
    fn antipodes_are_finite() {
        let d = great_circle_km(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite());
        assert!(approx(d, std::f64::consts::PI * EARTH_RADIUS_KM, 1e-6));
    }
}
