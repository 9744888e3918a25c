use crate::decode::cpr::CprParity;
use crate::decode::{gillham_altitude, unshuffle_squawk};
use deku::bitvec::{BitSlice, Msb0};
use deku::prelude::*;
use serde::Serialize;

/**
 * ## Airborne position (register 0,5)
 *
 * Broadcast under typecodes 9..=18 with a barometric altitude, or
 * 20..=22 with a GNSS height. The position itself is a compact
 * position report: seventeen encoded bits per axis plus the odd/even
 * flag, resolved against the paired frame or a nearby reference in
 * [`crate::decode::cpr`].
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct AirbornePosition {
    /// Typecode, also the position accuracy category
    #[deku(bits = "5")]
    #[serde(skip)]
    pub tc: u8,

    /// Surveillance status: permanent or temporary alert, SPI
    #[deku(bits = "2")]
    #[serde(skip)]
    pub status: u8,

    /// Single antenna flag (a NIC supplement from ADS-B version 2 on)
    #[deku(bits = "1")]
    #[serde(skip)]
    pub antenna: u8,

    /// Altitude in feet from the 12-bit code, None when unavailable
    #[deku(reader = "read_altitude12(deku::rest)")]
    pub altitude: Option<u16>,

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

impl AirbornePosition {
    /// GNSS height rather than barometric altitude?
    pub fn is_gnss(&self) -> bool {
        self.tc >= 20
    }
}

/// The 12-bit AC field of the squitter: with the Q bit set, a 25 ft
/// scale starting at -1000 ft; otherwise a Gillham code in 100 ft
/// steps (the squitter field is the surveillance one minus its M bit).
fn read_altitude12(
    rest: &BitSlice<u8, Msb0>,
) -> Result<(&BitSlice<u8, Msb0>, Option<u16>), DekuError> {
    let (rest, field) =
        u16::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(12)))?;

    let altitude = if field & 0x10 != 0 {
        // squeeze the Q bit out: seven bits above it, four below
        let steps = ((field >> 5) << 4) | (field & 0x0f);
        let feet = 25 * i32::from(steps) - 1000;
        if feet > 0 {
            Some(feet as u16)
        } else {
            None
        }
    } else {
        // reopen the M slot so the 13-bit Gillham tables apply
        let code13 = ((field >> 6) << 7) | (field & 0x3f);
        gillham_altitude(unshuffle_squawk(code13))
            .and_then(|hundreds| u16::try_from(hundreds * 100).ok())
    };
    Ok((rest, altitude))
}
