//! Great-circle distance and spherical averaging.

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance between two points in meters (haversine).
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Point on the unit sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl UnitVector {
    pub fn from_lat_lon(latitude: f64, longitude: f64) -> Self {
        let lat = latitude.to_radians();
        let lon = longitude.to_radians();
        Self {
            x: lat.cos() * lon.cos(),
            y: lat.cos() * lon.sin(),
            z: lat.sin(),
        }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Convert back to degrees. The vector does not need to be normalized.
    pub fn to_lat_lon(&self) -> (f64, f64) {
        let hyp = (self.x * self.x + self.y * self.y).sqrt();
        let lat = self.z.atan2(hyp).to_degrees();
        let lon = if hyp == 0.0 {
            0.0
        } else {
            self.y.atan2(self.x).to_degrees()
        };
        (lat, lon)
    }
}

/// Below this resultant length the weighted mean direction is undefined
/// (points cancel out, e.g. antipodal pairs).
const DEGENERATE_NORM: f64 = 1e-9;

/// Weighted mean direction of `(latitude, longitude, weight)` points.
///
/// Sums weighted unit vectors and projects back to the sphere, so the
/// result is unaffected by the antimeridian and stays inside the spherical
/// hull of the inputs. Returns `None` when the input is empty, the total
/// weight is not positive, or the vectors cancel out.
pub fn weighted_spherical_mean(points: &[(f64, f64, f64)]) -> Option<(f64, f64)> {
    let mut sum = UnitVector {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    let mut total_weight = 0.0;

    for &(lat, lon, w) in points {
        if !(w > 0.0) {
            continue;
        }
        let v = UnitVector::from_lat_lon(lat, lon);
        sum.x += w * v.x;
        sum.y += w * v.y;
        sum.z += w * v.z;
        total_weight += w;
    }

    if total_weight <= 0.0 || sum.norm() / total_weight < DEGENERATE_NORM {
        return None;
    }
    Some(sum.to_lat_lon())
}
