use deku::bitvec::{BitSlice, Msb0};
use deku::prelude::*;
use serde::Serialize;

/**
 * ## Airborne velocity (register 0,9)
 *
 * Broadcast under typecode 19. Subtypes 1 and 2 carry a ground speed
 * split into east-west and north-south components; subtypes 3 and 4
 * fall back to airspeed and magnetic heading when no navigation fix is
 * available. The even subtypes are the supersonic variants: identical
 * layout, four times the speed resolution. A barometric/GNSS vertical
 * rate and the difference between the two altitude sources complete
 * the register.
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
pub struct AirborneVelocity {
    #[deku(bits = "3")]
    #[serde(skip)]
    pub subtype: u8,

    /// Intent change flag
    #[deku(bits = "1")]
    #[serde(skip)]
    pub intent: bool,

    /// IFR capability flag
    #[deku(bits = "1")]
    #[serde(skip)]
    pub ifr: bool,

    /// Navigation accuracy category for velocity
    #[deku(bits = "3")]
    #[serde(rename = "NACv")]
    pub nac_v: u8,

    /// Ground-referenced or air-referenced speeds, by subtype
    #[deku(ctx = "*subtype")]
    #[serde(flatten)]
    pub kind: VelocityKind,

    /// Which altitude feeds the vertical rate
    pub rate_source: RateSource,

    /// Vertical rate in ft/min, negative downwards, None when not
    /// available
    #[deku(reader = "read_vertical_rate(deku::rest)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_rate: Option<i16>,

    #[deku(bits = "2")]
    #[serde(skip)]
    pub spare: u8,

    /// GNSS height minus barometric altitude, in feet, None when not
    /// available
    #[deku(reader = "read_altitude_delta(deku::rest)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gnss_baro_delta: Option<i16>,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
#[deku(ctx = "subtype: u8", id = "subtype")]
#[serde(untagged)]
pub enum VelocityKind {
    #[deku(id_pat = "1..=2")]
    GroundReferenced(#[deku(ctx = "subtype")] GroundVelocity),

    #[deku(id_pat = "3..=4")]
    AirReferenced(#[deku(ctx = "subtype")] AirVelocity),

    /// Subtype 0 and 5..=7 are reserved
    #[deku(id_pat = "_")]
    #[serde(skip)]
    Unavailable {
        #[deku(bits = "22")]
        raw: u32,
    },
}

/// Speed over ground as signed east and north components.
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[deku(ctx = "subtype: u8")]
pub struct GroundVelocity {
    /// Eastbound component in knots, negative westwards
    #[deku(reader = "read_component(deku::rest, subtype)")]
    #[serde(skip)]
    pub east: Option<f64>,

    /// Northbound component in knots, negative southwards
    #[deku(reader = "read_component(deku::rest, subtype)")]
    #[serde(skip)]
    pub north: Option<f64>,

    /// Speed over ground in knots
    #[deku(
        bits = "0",
        map = "|_v: u8| -> Result<_, DekuError> {
            Ok(match (*east, *north) {
                (Some(e), Some(n)) => Some(libm::hypot(e, n)),
                _ => None,
            })
        }"
    )]
    pub groundspeed: Option<f64>,

    /// Direction of motion, clockwise from true north
    #[deku(
        bits = "0",
        map = "|_v: u8| -> Result<_, DekuError> {
            Ok(match (*east, *north) {
                (Some(e), Some(n)) =>
                    Some((libm::atan2(e, n).to_degrees() + 360.0) % 360.0),
                _ => None,
            })
        }"
    )]
    pub track: Option<f64>,
}

/// One signed velocity component: a direction bit, then ten bits where
/// zero means no information and anything else counts (value - 1)
/// knots, scaled four-fold for the supersonic subtype.
fn read_component(
    rest: &BitSlice<u8, Msb0>,
    subtype: u8,
) -> Result<(&BitSlice<u8, Msb0>, Option<f64>), DekuError> {
    let (rest, negative) =
        u8::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(1)))?;
    let (rest, raw) =
        u16::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(10)))?;

    let component = match raw {
        0 => None,
        value => {
            let scale = if subtype == 2 { 4.0 } else { 1.0 };
            let knots = f64::from(value - 1) * scale;
            Some(if negative == 1 { -knots } else { knots })
        }
    };
    Ok((rest, component))
}

/// Airspeed and magnetic heading, the fallback when the navigation
/// source cannot provide a ground vector.
#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
#[deku(ctx = "subtype: u8")]
pub struct AirVelocity {
    #[deku(bits = "1")]
    #[serde(skip)]
    pub heading_valid: bool,

    /// Magnetic heading in 360/1024 degree steps
    #[deku(
        bits = "10",
        endian = "big",
        map = "|v: u16| -> Result<_, DekuError> {
            if *heading_valid {
                Ok(Some(f64::from(v) * 0.3515625))
            } else { Ok(None) }
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,

    /// Indicated or true airspeed?
    pub airspeed_source: AirspeedSource,

    /// Airspeed in knots, None when not available
    #[deku(reader = "read_airspeed(deku::rest, subtype)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airspeed: Option<u16>,
}

fn read_airspeed(
    rest: &BitSlice<u8, Msb0>,
    subtype: u8,
) -> Result<(&BitSlice<u8, Msb0>, Option<u16>), DekuError> {
    let (rest, raw) =
        u16::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(10)))?;
    let airspeed = match raw {
        0 => None,
        value => {
            let scale = if subtype == 4 { 4 } else { 1 };
            Some((value - 1) * scale)
        }
    };
    Ok((rest, airspeed))
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, DekuRead)]
#[deku(type = "u8", bits = "1")]
pub enum AirspeedSource {
    IAS = 0,
    TAS = 1,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[deku(type = "u8", bits = "1")]
pub enum RateSource {
    #[serde(rename = "GNSS")]
    Gnss = 0,
    #[serde(rename = "barometric")]
    Barometric = 1,
}

/// Sign bit, then nine bits counting 64 ft/min increments; zero means
/// no information and the count is offset by one.
fn read_vertical_rate(
    rest: &BitSlice<u8, Msb0>,
) -> Result<(&BitSlice<u8, Msb0>, Option<i16>), DekuError> {
    let (rest, downwards) =
        u8::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(1)))?;
    let (rest, raw) =
        u16::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(9)))?;

    let rate = match raw {
        0 => None,
        value => {
            // nine bits at most, comfortably within i16 at 64 ft/min
            let fpm = (value as i16 - 1) * 64;
            Some(if downwards == 1 { -fpm } else { fpm })
        }
    };
    Ok((rest, rate))
}

/// Sign bit, then seven bits counting 25 ft increments between the
/// GNSS and barometric altitudes; 0 and 1 mean no information.
fn read_altitude_delta(
    rest: &BitSlice<u8, Msb0>,
) -> Result<(&BitSlice<u8, Msb0>, Option<i16>), DekuError> {
    let (rest, below) =
        u8::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(1)))?;
    let (rest, raw) =
        u8::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(7)))?;

    let delta = match raw {
        0 | 1 => None,
        value => {
            let feet = 25 * (i16::from(value) - 1);
            Some(if below == 1 { -feet } else { feet })
        }
    };
    Ok((rest, delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use approx::assert_relative_eq;
    use hexlit::hex;

    #[test]
    fn test_ground_velocity() {
        let bytes = hex!("8D485020994409940838175B284F");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        if let Adsb(squitter) = msg.df {
            if let SquitterContent::BDS09(velocity) = squitter.content {
                if let VelocityKind::GroundReferenced(ground) = velocity.kind
                {
                    assert_relative_eq!(
                        ground.groundspeed.unwrap(),
                        159.,
                        max_relative = 1e-2
                    );
                    assert_relative_eq!(
                        ground.track.unwrap(),
                        182.88,
                        max_relative = 1e-2
                    );
                    assert_eq!(velocity.vertical_rate, Some(-832));
                    assert_eq!(velocity.gnss_baro_delta, Some(550));
                    return;
                }
            }
        }
        unreachable!();
    }

    #[test]
    fn test_airspeed_fallback() {
        let bytes = hex!("8DA05F219B06B6AF189400CBC33F");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        if let Adsb(squitter) = msg.df {
            if let SquitterContent::BDS09(velocity) = squitter.content {
                if let VelocityKind::AirReferenced(air) = velocity.kind {
                    assert_eq!(air.airspeed, Some(375));
                    assert_eq!(air.airspeed_source, AirspeedSource::TAS);
                    assert_relative_eq!(
                        air.heading.unwrap(),
                        244.,
                        max_relative = 1e-2
                    );
                    assert_eq!(velocity.vertical_rate, Some(-2304));
                    return;
                }
            }
        }
        unreachable!();
    }
}
