//! Map projections between geographic coordinates and projected metres.
//!
//! Transverse Mercator uses Krüger's series to third order in the third
//! flattening `n`, which keeps errors well below a millimetre within a zone.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use geo::Coord;

use super::Crs;
use crate::error::{Result, RoadNetworkError};

/// Reference ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis in metres
    pub a: f64,
    /// Flattening
    pub f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_223_563,
    };
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_222_101,
    };
}

/// Transverse Mercator with latitude of origin on the equator.
#[derive(Debug, Clone, PartialEq)]
pub struct TransverseMercator {
    central_meridian: f64,
    false_easting: f64,
    false_northing: f64,
    /// k0 * rectifying radius
    scaled_radius: f64,
    eccentricity: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

impl TransverseMercator {
    pub fn new(
        ellipsoid: Ellipsoid,
        central_meridian_deg: f64,
        scale_factor: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let f = ellipsoid.f;
        let n = f / (2.0 - f);
        let n2 = n * n;
        let n3 = n2 * n;
        let rectifying = ellipsoid.a / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0);

        Self {
            central_meridian: central_meridian_deg.to_radians(),
            false_easting,
            false_northing,
            scaled_radius: scale_factor * rectifying,
            eccentricity: (f * (2.0 - f)).sqrt(),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
        }
    }

    /// NZGD2000 / New Zealand Transverse Mercator 2000.
    pub fn nztm2000() -> Self {
        Self::new(Ellipsoid::GRS80, 173.0, 0.9996, 1_600_000.0, 10_000_000.0)
    }

    /// WGS84 UTM zone (1-60).
    pub fn utm(zone: u32, south: bool) -> Self {
        let central_meridian = -183.0 + 6.0 * zone as f64;
        let false_northing = if south { 10_000_000.0 } else { 0.0 };
        Self::new(
            Ellipsoid::WGS84,
            central_meridian,
            0.9996,
            500_000.0,
            false_northing,
        )
    }

    /// (longitude, latitude) in degrees to (easting, northing) in metres.
    pub fn forward(&self, lon_lat: Coord<f64>) -> Coord<f64> {
        let phi = lon_lat.y.to_radians();
        let dlambda = lon_lat.x.to_radians() - self.central_meridian;
        let e = self.eccentricity;

        let t = (phi.sin().atanh() - e * (e * phi.sin()).atanh()).sinh();
        let xi_prime = t.atan2(dlambda.cos());
        let eta_prime = (dlambda.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_prime;
        let mut eta = eta_prime;
        for (j, alpha) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += alpha * (k * xi_prime).sin() * (k * eta_prime).cosh();
            eta += alpha * (k * xi_prime).cos() * (k * eta_prime).sinh();
        }

        Coord {
            x: self.false_easting + self.scaled_radius * eta,
            y: self.false_northing + self.scaled_radius * xi,
        }
    }

    /// (easting, northing) in metres to (longitude, latitude) in degrees.
    pub fn inverse(&self, en: Coord<f64>) -> Coord<f64> {
        let xi = (en.y - self.false_northing) / self.scaled_radius;
        let eta = (en.x - self.false_easting) / self.scaled_radius;

        let mut xi_prime = xi;
        let mut eta_prime = eta;
        for (j, beta) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_prime -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_prime -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_prime.sin() / eta_prime.cosh()).asin();
        let mut phi = chi;
        for (j, delta) in self.delta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            phi += delta * (k * chi).sin();
        }
        let lambda = self.central_meridian + eta_prime.sinh().atan2(xi_prime.cos());

        Coord {
            x: lambda.to_degrees(),
            y: phi.to_degrees(),
        }
    }
}

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// A coordinate reference system that can be converted to and from
/// geographic longitude/latitude.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Geographic,
    TransverseMercator(TransverseMercator),
    WebMercator,
}

impl Projection {
    pub fn from_crs(crs: Crs) -> Result<Self> {
        let projection: Projection = match crs.code() {
            4326 => Projection::Geographic,
            2193 => TransverseMercator::nztm2000().into(),
            3857 => Projection::WebMercator,
            code @ 32601..=32660 => TransverseMercator::utm(code - 32600, false).into(),
            code @ 32701..=32760 => TransverseMercator::utm(code - 32700, true).into(),
            code => return Err(RoadNetworkError::UnsupportedCrs { code }),
        };
        Ok(projection)
    }

    pub fn to_geographic(&self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Projection::Geographic => coord,
            Projection::TransverseMercator(tm) => tm.inverse(coord),
            Projection::WebMercator => Coord {
                x: (coord.x / WEB_MERCATOR_RADIUS).to_degrees(),
                y: (2.0 * (coord.y / WEB_MERCATOR_RADIUS).exp().atan() - FRAC_PI_2).to_degrees(),
            },
        }
    }

    pub fn from_geographic(&self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Projection::Geographic => coord,
            Projection::TransverseMercator(tm) => tm.forward(coord),
            Projection::WebMercator => Coord {
                x: WEB_MERCATOR_RADIUS * coord.x.to_radians(),
                y: WEB_MERCATOR_RADIUS * (FRAC_PI_4 + coord.y.to_radians() / 2.0).tan().ln(),
            },
        }
    }
}

impl From<TransverseMercator> for Projection {
    fn from(tm: TransverseMercator) -> Self {
        Projection::TransverseMercator(tm)
    }
}
