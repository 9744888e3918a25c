use crate::decode::cpr::CprParity;
use deku::prelude::*;
use serde::Serialize;

/**
 * ## Surface position (register 0,6)
 *
 * Broadcast under typecodes 5..=8 while on the ground: no altitude,
 * but the taxi speed and the ground track, then the same compact
 * position report as the airborne variant (with zones four times
 * smaller for the same seventeen bits).
 */
#[derive(Debug, PartialEq, DekuRead, Serialize, Copy, Clone)]
pub struct SurfacePosition {
    #[deku(bits = "5")]
    #[serde(skip)]
    pub tc: u8,

    /// Ground speed in knots, from the 7-bit movement code, None when
    /// not available
    #[deku(
        bits = "7",
        map = "|code: u8| -> Result<_, DekuError> {
            Ok(movement_to_knots(code))
        }"
    )]
    pub groundspeed: Option<f64>,

    /// Whether the track field below carries a value
    #[deku(bits = "1")]
    #[serde(skip)]
    pub track_valid: bool,

    /// Ground track, clockwise from true north in steps of 360/128
    /// of a degree
    #[deku(
        bits = "7",
        map = "|angle: u8| -> Result<_, DekuError> {
            if *track_valid {
                Ok(Some(f64::from(angle) * 2.8125))
            } else { Ok(None) }
        }"
    )]
    pub track: Option<f64>,

    /// Whether the epoch of the report is synchronised to UTC
    #[deku(bits = "1")]
    #[serde(skip)]
    pub utc_sync: bool,

    /// Which of the two alternating position encodings this frame uses
    pub parity: CprParity,

    #[deku(bits = "17", endian = "big")]
    #[serde(skip)]
    pub encoded_lat: u32,

    #[deku(bits = "17", endian = "big")]
    #[serde(skip)]
    pub encoded_lon: u32,

    /// Resolved latitude, filled by the position tracker
    #[deku(bits = "0", map = "|_v: u8| -> Result<_, DekuError> { Ok(None) }")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    /// Resolved longitude, filled by the position tracker
    #[deku(bits = "0", map = "|_v: u8| -> Result<_, DekuError> { Ok(None) }")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// The non-linear movement encoding: finer steps where taxi speeds
/// need them. Each band is (first code, base speed, knots per code);
/// 0 means no information, 124 caps the scale and 125..=127 are
/// reserved.
fn movement_to_knots(code: u8) -> Option<f64> {
    #[rustfmt::skip]
    const BANDS: [(u8, f64, f64); 6] = [
        (  2,   0.125, 0.125),
        (  9,   1.0,   0.25),
        ( 13,   2.0,   0.5),
        ( 39,  15.0,   1.0),
        ( 94,  70.0,   2.0),
        (109, 100.0,   5.0),
    ];

    match code {
        0 | 125..=u8::MAX => None,
        1 => Some(0.0),
        124 => Some(175.0),
        _ => BANDS
            .iter()
            .rev()
            .find(|(first, _, _)| code >= *first)
            .map(|(first, base, step)| {
                base + f64::from(code - first) * step
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use hexlit::hex;

    #[test]
    fn test_surface_position() {
        let bytes = hex!("8c4841753a9a153237aef0f275be");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        if let Adsb(squitter) = msg.df {
            if let SquitterContent::BDS06(SurfacePosition {
                track,
                groundspeed,
                parity,
                ..
            }) = squitter.content
            {
                assert_eq!(track, Some(92.8125));
                assert_eq!(groundspeed, Some(17.));
                assert_eq!(parity, CprParity::Odd);
                return;
            }
        }
        unreachable!();
    }

    #[test]
    fn test_movement_stopped() {
        // movement code 1: aircraft stopped, no valid track
        let bytes = hex!("903a33ff40100858d34ff3cce976");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        if let Tisb { content, .. } = msg.df {
            if let SquitterContent::BDS06(SurfacePosition {
                groundspeed,
                track,
                ..
            }) = content
            {
                assert_eq!(groundspeed, Some(0.0));
                assert_eq!(track, None);
                return;
            }
        }
        unreachable!();
    }

    #[test]
    fn test_movement_bands() {
        // every quantisation band, by its first code and one inside
        assert_eq!(movement_to_knots(0), None);
        assert_eq!(movement_to_knots(1), Some(0.0));
        assert_eq!(movement_to_knots(2), Some(0.125));
        assert_eq!(movement_to_knots(9), Some(1.0));
        assert_eq!(movement_to_knots(13), Some(2.0));
        assert_eq!(movement_to_knots(25), Some(8.0));
        assert_eq!(movement_to_knots(39), Some(15.0));
        assert_eq!(movement_to_knots(94), Some(70.0));
        assert_eq!(movement_to_knots(109), Some(100.0));
        assert_eq!(movement_to_knots(123), Some(170.0));
        assert_eq!(movement_to_knots(124), Some(175.0));
        assert_eq!(movement_to_knots(125), None);
        assert_eq!(movement_to_knots(127), None);
    }

    #[test]
    fn test_movement_taxi_range() {
        // movement code 25, in the 0.5 kt band: 8.0 kt
        let bytes = hex!("8c3461cf399d6059814ea81483a9");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        if let Adsb(squitter) = msg.df {
            if let SquitterContent::BDS06(SurfacePosition {
                groundspeed,
                ..
            }) = squitter.content
            {
                assert_eq!(groundspeed, Some(8.0));
                return;
            }
        }
        unreachable!();
    }
}
