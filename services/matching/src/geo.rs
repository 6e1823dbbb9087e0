//! Geospatial utilities: geohash encoding and great-circle distance
//!
//! Profiles carry a geohash-derived location code so that candidate
//! retrieval can narrow by code prefix instead of scanning the whole
//! population. Precision 4 covers roughly a 20-40 km cell, which is the
//! scale the retriever queries at.

use crate::models::Coordinates;

/// Base-32 alphabet used by the geohash encoding
const BASE32: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Earth's radius in miles
const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Distance reported when either side has no coordinates.
///
/// Large enough to fail any realistic distance preference, so a profile
/// without a location never silently passes the distance check.
pub const DISTANCE_SENTINEL_MILES: f64 = 9999.0;

/// Encode coordinates to a geohash of the given precision
pub fn encode_geohash(coords: &Coordinates, precision: usize) -> String {
    let mut idx: usize = 0;
    let mut bit = 0;
    let mut even_bit = true;
    let mut geohash = String::with_capacity(precision);

    let (mut lat_min, mut lat_max) = (-90.0_f64, 90.0_f64);
    let (mut lng_min, mut lng_max) = (-180.0_f64, 180.0_f64);

    while geohash.len() < precision {
        if even_bit {
            let lng_mid = (lng_min + lng_max) / 2.0;
            if coords.lng >= lng_mid {
                idx = idx * 2 + 1;
                lng_min = lng_mid;
            } else {
                idx *= 2;
                lng_max = lng_mid;
            }
        } else {
            let lat_mid = (lat_min + lat_max) / 2.0;
            if coords.lat >= lat_mid {
                idx = idx * 2 + 1;
                lat_min = lat_mid;
            } else {
                idx *= 2;
                lat_max = lat_mid;
            }
        }
        even_bit = !even_bit;

        bit += 1;
        if bit == 5 {
            geohash.push(BASE32[idx] as char);
            bit = 0;
            idx = 0;
        }
    }

    geohash
}

/// Great-circle distance between two points via the haversine formula,
/// rounded to whole miles
pub fn haversine_miles(a: &Coordinates, b: &Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    (EARTH_RADIUS_MILES * c).round()
}

/// Distance between two optional coordinate pairs, in miles.
///
/// Missing coordinates on either side yield the sentinel distance.
pub fn distance_miles(a: Option<&Coordinates>, b: Option<&Coordinates>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => haversine_miles(a, b),
        _ => DISTANCE_SENTINEL_MILES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(lat: f64, lng: f64) -> Coordinates {
        Coordinates { lat, lng }
    }

    #[test]
    fn test_encode_known_geohashes() {
        // Reference values from the canonical geohash test vectors
        assert_eq!(encode_geohash(&coords(57.64911, 10.40744), 4), "u4pr");
        assert_eq!(encode_geohash(&coords(40.7128, -74.0060), 4), "dr5r");
    }

    #[test]
    fn test_encode_precision_is_prefix_stable() {
        let point = coords(48.8566, 2.3522);
        let short = encode_geohash(&point, 4);
        let long = encode_geohash(&point, 6);
        assert!(long.starts_with(&short));
        assert_eq!(short.len(), 4);
    }

    #[test]
    fn test_haversine_zero_distance() {
        let p = coords(40.0, -74.0);
        assert_eq!(haversine_miles(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        // One degree of latitude is roughly 69 miles everywhere
        let d = haversine_miles(&coords(40.0, -74.0), &coords(41.0, -74.0));
        assert_eq!(d, 69.0);
    }

    #[test]
    fn test_missing_coordinates_use_sentinel() {
        let p = coords(40.0, -74.0);
        assert_eq!(distance_miles(None, Some(&p)), DISTANCE_SENTINEL_MILES);
        assert_eq!(distance_miles(Some(&p), None), DISTANCE_SENTINEL_MILES);
        assert_eq!(distance_miles(None, None), DISTANCE_SENTINEL_MILES);
    }
}
