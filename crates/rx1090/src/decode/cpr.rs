/**
 * Compact position reports spread a position over two alternating
 * frames, odd and even, each carrying seventeen encoded bits per axis.
 * Two decoding strategies exist:
 *
 *  - global: a fresh pair of opposite parities pins down the latitude
 *    zone, and with it the unambiguous position;
 *  - local: a single frame is enough when a reference position (the
 *    previous fix, the receiver, an airport) is known to sit within
 *    half a zone.
 */
use deku::prelude::*;
use libm::fabs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::bds::bds05::AirbornePosition;
use super::bds::bds06::SurfacePosition;

/// The frame flag of a compact position report
#[derive(Debug, PartialEq, Eq, Serialize, DekuRead, Copy, Clone)]
#[deku(type = "u8", bits = "1")]
#[serde(rename_all = "snake_case")]
pub enum CprParity {
    Even = 0,
    Odd = 1,
}

impl CprParity {
    /// Number of latitude zones of this encoding
    fn zones(self) -> f64 {
        match self {
            Self::Even => 60.0,
            Self::Odd => 59.0,
        }
    }
}

impl fmt::Display for CprParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Even => "even",
                Self::Odd => "odd",
            }
        )
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Copy)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        if parts.len() != 2 {
            return Err("expecting 'latitude,longitude'".to_string());
        }
        let latitude: f64 = parts[0]
            .parse()
            .map_err(|e| format!("latitude parse error: {e}"))?;
        let longitude: f64 = parts[1]
            .parse()
            .map_err(|e| format!("longitude parse error: {e}"))?;
        Ok(Position {
            latitude,
            longitude,
        })
    }
}

/// Great-circle distance between two positions, in kilometers
pub fn haversine(from: &Position, to: &Position) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let half_dlat = (to.latitude - from.latitude).to_radians() / 2.0;
    let half_dlon = (to.longitude - from.longitude).to_radians() / 2.0;
    let chord = half_dlat.sin().powi(2)
        + from.latitude.to_radians().cos()
            * to.latitude.to_radians().cos()
            * half_dlon.sin().powi(2);
    2.0 * EARTH_RADIUS_KM * chord.sqrt().asin()
}

/// Scale of the seventeen encoded bits: 2^17 steps per zone
const CPR_SCALE: f64 = 131072.0;

/// Latitude span of one even zone (sixty zones per 360 degrees) and of
/// one odd zone (fifty-nine)
const ZONE_EVEN: f64 = 360.0 / 60.0;
const ZONE_ODD: f64 = 360.0 / 59.0;

/// Upper latitude bound of each band of the NL function, from the
/// table in 1090-WP-9-14: below the first entry NL is 59, below the
/// next 58, and so on down to NL=2 below 87 degrees (NL=1 beyond).
#[rustfmt::skip]
const NL_BANDS: [f64; 58] = [
    10.47047130, 14.82817437, 18.18626357, 21.02939493, 23.54504487,
    25.82924707, 27.93898710, 29.91135686, 31.77209708, 33.53993436,
    35.22899598, 36.85025108, 38.41241892, 39.92256684, 41.38651832,
    42.80914012, 44.19454951, 45.54626723, 46.86733252, 48.16039128,
    49.42776439, 50.67150166, 51.89342469, 53.09516153, 54.27817472,
    55.44378444, 56.59318756, 57.72747354, 58.84763776, 59.95459277,
    61.04917774, 62.13216659, 63.20427479, 64.26616523, 65.31845310,
    66.36171008, 67.39646774, 68.42322022, 69.44242631, 70.45451075,
    71.45986473, 72.45884545, 73.45177442, 74.43893416, 75.42056257,
    76.39684391, 77.36789461, 78.33374083, 79.29428225, 80.24923213,
    81.19801349, 82.13956981, 83.07199445, 83.99173563, 84.89166191,
    85.75541621, 86.53536998, 87.00000000,
];

/// Number of longitude zones at this latitude, between 1 and 59
fn nl(latitude: f64) -> u64 {
    let latitude = fabs(latitude);
    match NL_BANDS.iter().position(|&bound| latitude < bound) {
        Some(band) => 59 - band as u64,
        None => 1,
    }
}

/// Remainder with the sign of the divisor, as the CPR equations expect
fn positive_mod(value: f64, modulus: f64) -> f64 {
    let rem = value % modulus;
    if rem < 0.0 {
        rem + fabs(modulus)
    } else {
        rem
    }
}

/// Fold a decoded angle into the usual signed ranges
fn fold_lat(latitude: f64) -> f64 {
    if latitude >= 270.0 {
        latitude - 360.0
    } else {
        latitude
    }
}

fn fold_lon(longitude: f64) -> f64 {
    if longitude >= 180.0 {
        longitude - 360.0
    } else if longitude < -180.0 {
        longitude + 360.0
    } else {
        longitude
    }
}

/// Difference between two longitudes, wrapped into (-180, 180]
fn lon_distance(a: f64, b: f64) -> f64 {
    fold_lon(positive_mod(a - b + 180.0, 360.0) - 180.0)
}

/**
 * Resolve an airborne position from a pair of frames of opposite
 * parities, both received within the pairing window. The parity of the
 * most recent frame decides which solution is reported.
 */
pub fn global_airborne(
    even: &AirbornePosition,
    odd: &AirbornePosition,
    newest: CprParity,
) -> Option<Position> {
    let even_lat = f64::from(even.encoded_lat) / CPR_SCALE;
    let even_lon = f64::from(even.encoded_lon) / CPR_SCALE;
    let odd_lat = f64::from(odd.encoded_lat) / CPR_SCALE;
    let odd_lon = f64::from(odd.encoded_lon) / CPR_SCALE;

    // latitude zone index, from the offset between the two encodings
    let index = libm::floor(59.0 * even_lat - 60.0 * odd_lat + 0.5);
    let lat_even = fold_lat(ZONE_EVEN * (positive_mod(index, 60.0) + even_lat));
    let lat_odd = fold_lat(ZONE_ODD * (positive_mod(index, 59.0) + odd_lat));

    let valid = -90.0..=90.0;
    if !valid.contains(&lat_even) || !valid.contains(&lat_odd) {
        return None;
    }
    // a pair straddling a longitude-zone boundary cannot be resolved
    if nl(lat_even) != nl(lat_odd) {
        return None;
    }

    let (latitude, cpr_lon) = match newest {
        CprParity::Even => (lat_even, even_lon),
        CprParity::Odd => (lat_odd, odd_lon),
    };

    let zones = nl(latitude);
    let m = libm::floor(
        even_lon * (zones - 1) as f64 - odd_lon * zones as f64 + 0.5,
    );
    let ni = match newest {
        CprParity::Even => zones,
        CprParity::Odd => zones - 1,
    }
    .max(1) as f64;
    let longitude =
        fold_lon((360.0 / ni) * (positive_mod(m, ni) + cpr_lon));

    Some(Position {
        latitude,
        longitude,
    })
}

/**
 * Resolve an airborne position from a single frame and a reference
 * within half a zone (180 NM).
 */
pub fn local_airborne(
    msg: &AirbornePosition,
    reference: &Position,
) -> Option<Position> {
    local_decode(
        f64::from(msg.encoded_lat) / CPR_SCALE,
        f64::from(msg.encoded_lon) / CPR_SCALE,
        msg.parity,
        reference,
        360.0,
    )
}

/**
 * Resolve a surface position from a single frame and a reference
 * within half a surface zone (45 NM): surface reports reuse the
 * airborne encoding over a four-fold smaller span.
 */
pub fn local_surface(
    msg: &SurfacePosition,
    reference: &Position,
) -> Option<Position> {
    local_decode(
        f64::from(msg.encoded_lat) / CPR_SCALE,
        f64::from(msg.encoded_lon) / CPR_SCALE,
        msg.parity,
        reference,
        90.0,
    )
}

fn local_decode(
    cpr_lat: f64,
    cpr_lon: f64,
    parity: CprParity,
    reference: &Position,
    span: f64,
) -> Option<Position> {
    let dlat = span / parity.zones();

    // zone index closest to the reference latitude
    let lat_index = libm::floor(reference.latitude / dlat)
        + libm::floor(
            0.5 + positive_mod(reference.latitude, dlat) / dlat - cpr_lat,
        );
    let latitude = dlat * (lat_index + cpr_lat);
    if !(-90.0..=90.0).contains(&latitude) {
        return None;
    }
    if fabs(latitude - reference.latitude) > dlat / 2.0 {
        return None;
    }

    let zones = match parity {
        CprParity::Even => nl(latitude),
        CprParity::Odd => nl(latitude) - 1,
    };
    let dlon = if zones > 0 { span / zones as f64 } else { span };
    let lon_index = libm::floor(reference.longitude / dlon)
        + libm::floor(
            0.5 + positive_mod(reference.longitude, dlon) / dlon - cpr_lon,
        );
    let longitude = fold_lon(dlon * (lon_index + cpr_lon));

    // the same half-zone check, wrapped across the antimeridian
    if fabs(lon_distance(longitude, reference.longitude)) > dlon / 2.0 {
        return None;
    }

    Some(Position {
        latitude,
        longitude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use approx::assert_relative_eq;
    use hexlit::hex;

    fn bds05(bytes: &[u8]) -> AirbornePosition {
        let msg = Message::from_bytes((bytes, 0)).unwrap().1;
        match msg.df {
            Adsb(squitter) => match squitter.content {
                SquitterContent::BDS05(position) => position,
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_nl_bands() {
        assert_eq!(nl(0.0), 59);
        assert_eq!(nl(-10.0), 59);
        assert_eq!(nl(10.5), 58);
        assert_eq!(nl(52.26), 36);
        assert_eq!(nl(86.9), 2);
        assert_eq!(nl(88.0), 1);
    }

    #[test]
    fn decode_global_airborne() {
        let even = bds05(&hex!("8D40058B58C901375147EFD09357"));
        let odd = bds05(&hex!("8D40058B58C904A87F402D3B8C59"));

        // the odd frame arrived last
        let Position {
            latitude,
            longitude,
        } = global_airborne(&even, &odd, CprParity::Odd).unwrap();

        assert_relative_eq!(latitude, 49.81755, max_relative = 1e-3);
        assert_relative_eq!(longitude, 6.08442, max_relative = 1e-3);

        let odd = bds05(&hex!("8d4d224f58bf07c2d41a9a353d70"));
        let even = bds05(&hex!("8d4d224f58bf003b221b34aa5b8d"));

        // here the even frame is the most recent one
        let Position {
            latitude,
            longitude,
        } = global_airborne(&even, &odd, CprParity::Even).unwrap();

        assert_relative_eq!(latitude, 42.346, max_relative = 1e-3);
        assert_relative_eq!(longitude, 0.4347, max_relative = 1e-3);
    }

    #[test]
    fn decode_global_airborne_even_newest() {
        let even = bds05(&hex!("8D40621D58C382D690C8AC2863A7"));
        let odd = bds05(&hex!("8D40621D58C386435CC412692AD6"));

        let pos = global_airborne(&even, &odd, CprParity::Even).unwrap();
        assert_relative_eq!(pos.latitude, 52.2572, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 3.91937, max_relative = 1e-3);
    }

    #[test]
    fn decode_local_airborne() {
        let reference = Position {
            latitude: 49.0,
            longitude: 6.0,
        };

        let msg = bds05(&hex!("8D40058B58C901375147EFD09357"));
        let Position {
            latitude,
            longitude,
        } = local_airborne(&msg, &reference).unwrap();

        assert_relative_eq!(latitude, 49.82410, max_relative = 1e-3);
        assert_relative_eq!(longitude, 6.06785, max_relative = 1e-3);

        let msg = bds05(&hex!("8D40058B58C904A87F402D3B8C59"));
        let Position {
            latitude,
            longitude,
        } = local_airborne(&msg, &reference).unwrap();

        assert_relative_eq!(latitude, 49.81755, max_relative = 1e-3);
        assert_relative_eq!(longitude, 6.08442, max_relative = 1e-3);
    }

    #[test]
    fn decode_local_surface() {
        let bytes = hex!("8c4841753aab238733c8cd4020b1");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        let msg = match msg.df {
            Adsb(squitter) => match squitter.content {
                SquitterContent::BDS06(surface) => surface,
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };

        let reference = Position {
            latitude: 51.99,
            longitude: 4.375,
        };
        let Position {
            latitude,
            longitude,
        } = local_surface(&msg, &reference).unwrap();

        assert_relative_eq!(latitude, 52.32061, max_relative = 1e-3);
        assert_relative_eq!(longitude, 4.73473, max_relative = 1e-3);
    }

    #[test]
    fn local_decode_wraps_antimeridian() {
        let msg = AirbornePosition {
            tc: 11,
            status: 0,
            antenna: 0,
            altitude: Some(38000),
            utc_sync: false,
            parity: CprParity::Even,
            encoded_lat: 0,
            encoded_lon: 64462,
            latitude: None,
            longitude: None,
        };
        // the aircraft east of the antimeridian, the receiver west of it
        let reference = Position {
            latitude: 0.0,
            longitude: -179.99,
        };
        let pos = local_airborne(&msg, &reference).unwrap();
        assert_relative_eq!(pos.latitude, 0.0, epsilon = 1e-6);
        assert_relative_eq!(pos.longitude, 179.95, max_relative = 1e-3);
    }

    #[test]
    fn test_haversine() {
        let paris = Position {
            latitude: 48.72,
            longitude: 2.37,
        };
        let toulouse = Position {
            latitude: 43.63,
            longitude: 1.37,
        };
        let d = haversine(&paris, &toulouse);
        assert!((d - 570.).abs() < 10.);
    }

    #[test]
    fn test_position_from_str() {
        let pos: Position = "43.3, 1.35".parse().unwrap();
        assert_relative_eq!(pos.latitude, 43.3);
        assert_relative_eq!(pos.longitude, 1.35);
        assert!("LFBO".parse::<Position>().is_err());
    }
}
