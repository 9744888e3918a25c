use super::bds::{bds05, bds06, bds08, bds09};
use super::{Capability, ICAO};
use deku::prelude::*;
use serde::Serialize;

/// The 112-bit extended squitter: capability and address in clear
/// text, then a 56-bit message whose leading five bits (the typecode)
/// select the broadcast register, and the parity.
#[derive(Debug, PartialEq, DekuRead, Clone, Serialize)]
pub struct ExtendedSquitter {
    #[serde(skip)]
    pub capability: Capability,

    pub icao24: ICAO,

    #[serde(flatten)]
    pub content: SquitterContent,

    #[serde(skip)]
    pub parity: ICAO,
}

/// Typecode dispatch of the squitter message:
///
/// - 1..=4 identification and category (register 0,8)
/// - 5..=8 surface position (register 0,6)
/// - 9..=18 and 20..=22 airborne position, barometric or GNSS
///   (register 0,5)
/// - 19 airborne velocity (register 0,9)
///
/// Typecode 0 announces that no position is available; the status and
/// operational registers above 22 are left undecoded.
#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
#[deku(type = "u8", bits = "5")]
#[serde(tag = "BDS")]
pub enum SquitterContent {
    #[deku(id = "0")]
    #[serde(skip)]
    NoInformation([u8; 6]),

    #[deku(id_pat = "1..=4")]
    #[serde(rename = "0,8")]
    BDS08(bds08::AircraftIdentification),

    #[deku(id_pat = "5..=8")]
    #[serde(rename = "0,6")]
    BDS06(bds06::SurfacePosition),

    #[deku(id_pat = "9..=18 | 20..=22")]
    #[serde(rename = "0,5")]
    BDS05(bds05::AirbornePosition),

    #[deku(id = "19")]
    #[serde(rename = "0,9")]
    BDS09(bds09::AirborneVelocity),

    #[deku(id_pat = "23..=31")]
    #[serde(skip)]
    Undecoded {
        #[deku(bits = "5")]
        tc: u8,
        payload: [u8; 6],
    },
}
