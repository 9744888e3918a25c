pub mod adsb;
pub mod bds;
pub mod cpr;
pub mod crc;
pub mod time;

use adsb::{ExtendedSquitter, SquitterContent};
use deku::bitvec::{BitSlice, Msb0};
use deku::prelude::*;
use serde::ser::{Serialize, Serializer};
use std::fmt;

/**
 * The top five bits of every Mode S frame carry the Downlink Format,
 * which selects both the frame length (formats below 16 are 56 bits,
 * the others 112) and the interpretation of the remaining fields.
 *
 * Nine formats are decoded here: the surveillance replies (DF 0, 4, 5
 * and their long counterparts 16, 20, 21), the all-call reply (DF 11)
 * and the extended squitters (DF 17, and DF 18 which carries the same
 * content for non-transponder emitters). DF 19 and the Comm-D segments
 * (DF 24 and up) parse to opaque payloads.
 *
 * Except for the squitters and the all-call, the transmitting address
 * is not spelled out in the frame: it is recovered from the parity
 * field, which the checksum threads into [`OverlaidAddress`] through
 * the deku context.
 */
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Clone)]
#[deku(type = "u8", bits = "5", ctx = "syndrome: u32")]
#[serde(tag = "DF")]
pub enum DF {
    // --- short formats, 56 bits ---
    /// DF=0: short air-to-air surveillance, the ACAS reply carrying an
    /// altitude
    #[deku(id = "0")]
    #[serde(rename = "DF0")]
    AirToAirShort {
        /// 0 when airborne, 1 on the ground
        #[deku(bits = "1")]
        #[serde(skip)]
        vertical_status: u8,
        /// Cross-link capability
        #[deku(bits = "1")]
        #[serde(skip)]
        crosslink: u8,
        #[deku(bits = "1")]
        #[serde(skip)]
        spare1: u8,
        /// ACAS sensitivity level
        #[deku(bits = "3")]
        #[serde(skip)]
        sensitivity: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        spare2: u8,
        /// Reply information, the ACAS capability of the target
        #[deku(bits = "4")]
        #[serde(skip)]
        reply_info: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        spare3: u8,
        altitude: AltitudeCode,
        #[serde(rename = "icao24")]
        #[deku(ctx = "syndrome")]
        address: OverlaidAddress,
    },

    /// DF=4: surveillance reply carrying an altitude
    #[deku(id = "4")]
    #[serde(rename = "DF4")]
    AltitudeReply {
        #[serde(skip)]
        status: FlightStatus,
        /// Downlink request, 5 bits (Comm-B negotiation, not decoded)
        #[deku(bits = "5")]
        #[serde(skip)]
        downlink_request: u8,
        /// Utility message, 6 bits (not decoded)
        #[deku(bits = "6")]
        #[serde(skip)]
        utility: u8,
        altitude: AltitudeCode,
        #[serde(rename = "icao24")]
        #[deku(ctx = "syndrome")]
        address: OverlaidAddress,
    },

    /// DF=5: surveillance reply carrying the assigned identity code
    #[deku(id = "5")]
    #[serde(rename = "DF5")]
    IdentityReply {
        #[serde(skip)]
        status: FlightStatus,
        #[deku(bits = "5")]
        #[serde(skip)]
        downlink_request: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        utility: u8,
        squawk: Squawk,
        #[serde(rename = "icao24")]
        #[deku(ctx = "syndrome")]
        address: OverlaidAddress,
    },

    /// DF=11: reply to an all-call interrogation, announcing the
    /// address in clear text
    #[deku(id = "11")]
    #[serde(rename = "DF11")]
    AllCall {
        capability: Capability,
        icao24: ICAO,
        /// Parity, possibly overlaid with the interrogator identifier
        #[serde(skip)]
        interrogator: ICAO,
    },

    // --- long formats, 112 bits ---
    /// DF=16: long air-to-air surveillance, an ACAS coordination reply
    #[deku(id = "16")]
    #[serde(rename = "DF16")]
    AirToAirLong {
        /// 0 when airborne, 1 on the ground
        #[deku(bits = "1")]
        vertical_status: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        spare1: u8,
        /// ACAS sensitivity level
        #[deku(bits = "3")]
        sensitivity: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        spare2: u8,
        /// Reply information
        #[deku(bits = "4")]
        reply_info: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        spare3: u8,
        altitude: AltitudeCode,
        /// Resolution advisory message (56 bits, not decoded)
        #[deku(count = "7")]
        #[serde(skip)]
        acas_message: Vec<u8>,
        #[serde(rename = "icao24")]
        #[deku(ctx = "syndrome")]
        address: OverlaidAddress,
    },

    /// DF=17: the ADS-B extended squitter
    #[deku(id = "17")]
    #[serde(rename = "DF17")]
    Adsb(ExtendedSquitter),

    /// DF=18: extended squitter from equipment that cannot be
    /// interrogated (TIS-B or non-transponder ADS-B); the content is
    /// the same as DF 17
    #[deku(id = "18")]
    #[serde(rename = "DF18")]
    Tisb {
        /// Control field selecting the addressing scheme
        #[deku(bits = "3")]
        #[serde(skip)]
        source: u8,
        icao24: ICAO,
        #[serde(flatten)]
        content: SquitterContent,
        #[serde(skip)]
        parity: ICAO,
    },

    /// DF=19: military extended squitter, opaque
    #[deku(id = "19")]
    #[serde(skip)]
    Military {
        #[deku(bits = "3")]
        application: u8,
    },

    /// DF=20: Comm-B reply carrying an altitude and a 56-bit message
    #[deku(id = "20")]
    #[serde(rename = "DF20")]
    CommBAltitude {
        #[serde(skip)]
        status: FlightStatus,
        #[deku(bits = "5")]
        #[serde(skip)]
        downlink_request: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        utility: u8,
        altitude: AltitudeCode,
        /// Raw Comm-B message, the register is negotiated upstream
        #[deku(count = "7")]
        #[serde(skip)]
        comm_b: Vec<u8>,
        #[serde(rename = "icao24")]
        #[deku(ctx = "syndrome")]
        address: OverlaidAddress,
    },

    /// DF=21: Comm-B reply carrying the identity code and a 56-bit
    /// message
    #[deku(id = "21")]
    #[serde(rename = "DF21")]
    CommBIdentity {
        #[serde(skip)]
        status: FlightStatus,
        #[deku(bits = "5")]
        #[serde(skip)]
        downlink_request: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        utility: u8,
        squawk: Squawk,
        /// Raw Comm-B message
        #[deku(count = "7")]
        #[serde(skip)]
        comm_b: Vec<u8>,
        #[serde(rename = "icao24")]
        #[deku(ctx = "syndrome")]
        address: OverlaidAddress,
    },

    /// DF=24..=31: one segment of an extended-length Comm-D exchange,
    /// opaque (only the top two bits select the format, the rest of the
    /// first byte already belongs to the payload)
    #[deku(id_pat = "24..=31")]
    #[serde(skip)]
    CommD {
        #[deku(bits = "3")]
        control: u8,
        #[deku(count = "13")]
        segment: Vec<u8>,
    },
}

/// The entry point to Mode S and ADS-B decoding.
///
/// The checksum residue over the whole frame is computed first and made
/// available to every address/parity field; frames are expected to have
/// been validated (and repaired) by [`crc::score_and_repair`] upstream.
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Clone)]
pub struct Message {
    /// Zero for an intact squitter, the transmitting address for the
    /// surveillance and Comm-B formats
    #[deku(reader = "Self::read_syndrome(deku::input_bits)")]
    #[serde(skip)]
    pub syndrome: u32,

    #[serde(flatten)]
    #[deku(ctx = "*syndrome")]
    pub df: DF,
}

impl Message {
    fn read_syndrome(
        rest: &BitSlice<u8, Msb0>,
    ) -> Result<(&BitSlice<u8, Msb0>, u32), DekuError> {
        let bytes = match rest.domain().region() {
            Some((_, bytes, _)) if !bytes.is_empty() => bytes,
            _ => {
                return Err(DekuError::Assertion(
                    "nothing to decode".to_string(),
                ))
            }
        };
        let syndrome = crc::modes_checksum(bytes, crc::message_bits(bytes[0]))?;
        // a squitter with a residue was not repaired upstream
        if bytes[0] >> 3 == 17 && syndrome != 0 {
            return Err(DekuError::Assertion(format!(
                "corrupt ADS-B frame, residue {syndrome:06x}"
            )));
        }
        Ok((rest, syndrome))
    }

    /// The transmitting airframe, announced in the frame or recovered
    /// from the address/parity overlay.
    pub fn icao24(&self) -> Option<ICAO> {
        match &self.df {
            DF::AirToAirShort { address, .. }
            | DF::AltitudeReply { address, .. }
            | DF::IdentityReply { address, .. }
            | DF::AirToAirLong { address, .. }
            | DF::CommBAltitude { address, .. }
            | DF::CommBIdentity { address, .. } => Some(ICAO(address.0)),
            DF::AllCall { icao24, .. } | DF::Tisb { icao24, .. } => {
                Some(*icao24)
            }
            DF::Adsb(squitter) => Some(squitter.icao24),
            _ => None,
        }
    }
}

/// ICAO 24-bit transponder address, the identity of an airframe
#[derive(PartialEq, Eq, PartialOrd, DekuRead, Hash, Copy, Clone, Ord)]
pub struct ICAO(#[deku(bits = "24", endian = "big")] pub u32);

impl fmt::Debug for ICAO {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl fmt::Display for ICAO {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for ICAO {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:06x}", &self.0))
    }
}

impl core::str::FromStr for ICAO {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(u32::from_str_radix(s, 16)?))
    }
}

/// An address recovered from an address/parity field. The 24 parity
/// bits were already folded into the syndrome, so this reader only
/// consumes them and keeps the value handed down through the context.
#[derive(PartialEq, Eq, PartialOrd, DekuRead, Hash, Copy, Clone, Ord)]
#[deku(ctx = "syndrome: u32")]
pub struct OverlaidAddress(
    #[deku(
        bits = "24",
        map = "|_parity: u32| -> Result<_, DekuError> { Ok(syndrome) }"
    )]
    pub u32,
);

impl fmt::Debug for OverlaidAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl fmt::Display for OverlaidAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for OverlaidAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:06x}", &self.0))
    }
}

/// The identity code assigned by ATC, four octal digits squawked on
/// 13 interleaved bits
#[derive(PartialEq, Eq, DekuRead, Copy, Clone)]
pub struct Squawk(#[deku(reader = "Self::read(deku::rest)")] pub u16);

impl Squawk {
    fn read(
        rest: &BitSlice<u8, Msb0>,
    ) -> Result<(&BitSlice<u8, Msb0>, u16), DekuError> {
        let (rest, field) =
            u16::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(13)))?;
        Ok((rest, unshuffle_squawk(field)))
    }
}

impl fmt::Debug for Squawk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl fmt::Display for Squawk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl Serialize for Squawk {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:04x}", &self.0))
    }
}

/// The 13-bit altitude code of the surveillance replies, decoded to
/// feet. Three encodings share the field: metric when the M bit (6) is
/// set, 25 ft steps when the Q bit (4) is set, and the Gillham code in
/// 100 ft steps otherwise. Zero stands for invalid or unavailable.
#[derive(Debug, PartialEq, Eq, serde::Serialize, DekuRead, Copy, Clone)]
pub struct AltitudeCode(#[deku(reader = "Self::read(deku::rest)")] pub u16);

impl AltitudeCode {
    fn read(
        rest: &BitSlice<u8, Msb0>,
    ) -> Result<(&BitSlice<u8, Msb0>, u16), DekuError> {
        let (rest, field) =
            u16::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(13)))?;

        let feet = if field & 0x0040 != 0 {
            // M bit: the twelve remaining bits count meters
            let meters = ((field >> 7) << 6) | (field & 0x3f);
            (f32::from(meters) * 3.28084) as u16
        } else if field & 0x0010 != 0 {
            // Q bit: 25 ft steps from -1000 ft; the M and Q slots are
            // squeezed out of the count
            let steps =
                ((field >> 7) << 5) | (((field >> 5) & 1) << 4) | (field & 0x0f);
            let feet = 25 * i32::from(steps) - 1000;
            if feet > 0 {
                feet as u16
            } else {
                0
            }
        } else {
            // Gillham-coded, 100 ft steps
            match gillham_altitude(unshuffle_squawk(field)) {
                Some(hundreds) => (hundreds * 100) as u16,
                None => 0,
            }
        };
        Ok((rest, feet))
    }
}

/// Transponder capability announced in the all-call reply
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Copy, Clone)]
#[deku(type = "u8", bits = "3")]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Surveillance-only transponder
    Level1 = 0,
    #[deku(id_pat = "1..=3")]
    Reserved,
    /// Level 2 or above, on the ground
    OnGround = 4,
    /// Level 2 or above, airborne
    Airborne = 5,
    /// Level 2 or above, either airborne or on the ground
    AirborneOrGround = 6,
    /// Downlink request pending or alert condition
    Alert = 7,
}

impl Capability {
    pub fn on_ground(&self) -> Option<bool> {
        match self {
            Self::OnGround => Some(true),
            Self::Airborne => Some(false),
            _ => None,
        }
    }
}

/// Flight status of the surveillance and Comm-B replies: three bits
/// combining airborne/ground, alert and SPI conditions
#[derive(Debug, PartialEq, Eq, serde::Serialize, DekuRead, Copy, Clone)]
pub struct FlightStatus(#[deku(bits = "3")] pub u8);

impl FlightStatus {
    /// An alert is raised while the identity code changes
    pub fn alert(&self) -> bool {
        matches!(self.0, 2..=4)
    }

    /// Special position identification, the ident button
    pub fn spi(&self) -> bool {
        matches!(self.0, 4 | 5)
    }

    pub fn on_ground(&self) -> Option<bool> {
        match self.0 {
            0 | 2 => Some(false),
            1 | 3 => Some(true),
            _ => None,
        }
    }
}

/// Source and destination masks of the 12 identity bits, in
/// transmission order: C1 A1 C2 A2 C4 A4 (X) B1 D1 B2 D2 B4 D4.
/// Each of the four octal digits A, B, C, D lands in its own nibble of
/// the unshuffled value, so the result reads as the four-digit code.
#[rustfmt::skip]
const IDENTITY_LANES: [(u16, u16); 12] = [
    (0x1000, 0x0010), // C1
    (0x0800, 0x1000), // A1
    (0x0400, 0x0020), // C2
    (0x0200, 0x2000), // A2
    (0x0100, 0x0040), // C4
    (0x0080, 0x4000), // A4
    // 0x0040 is the X (or M) bit, never part of the code
    (0x0020, 0x0100), // B1
    (0x0010, 0x0001), // D1, which doubles as Q in altitude codes
    (0x0008, 0x0200), // B2
    (0x0004, 0x0002), // D2
    (0x0002, 0x0400), // B4
    (0x0001, 0x0004), // D4
];

/// Gather the interleaved identity bits into four octal digits.
pub fn unshuffle_squawk(field: u16) -> u16 {
    IDENTITY_LANES
        .iter()
        .filter(|(source, _)| field & source != 0)
        .fold(0, |code, (_, target)| code | target)
}

/// Binary value of a reflected Gray code.
fn gray_to_binary(gray: u32) -> u32 {
    let mut value = gray;
    let mut shift = gray >> 1;
    while shift != 0 {
        value ^= shift;
        shift >>= 1;
    }
    value
}

/// Altitude in 100 ft steps from an unshuffled Gillham code, or None
/// when the code is not a legal altitude.
///
/// The D2..B4 bits form an 8-bit Gray counter of 500 ft increments;
/// the C bits count 100 ft increments 1..=5 in a reflected 3-bit code
/// whose direction alternates with every 500 ft step.
pub fn gillham_altitude(code: u16) -> Option<i32> {
    // the top bit of each octal digit, and D1, never carry altitude;
    // a zero C digit is illegal
    if code & 0x8889 != 0 || code & 0x00f0 == 0 {
        return None;
    }

    let c_gray = (u32::from(code >> 4) & 1) << 2
        | (u32::from(code >> 5) & 1) << 1
        | (u32::from(code >> 6) & 1);
    let mut hundreds = gray_to_binary(c_gray);
    // codes 5 and 7 swap places in this counter
    if hundreds & 5 == 5 {
        hundreds ^= 2;
    }
    if hundreds > 5 {
        return None;
    }

    let d_gray = (u32::from(code >> 1) & 1) << 7   // D2
        | (u32::from(code >> 2) & 1) << 6          // D4
        | (u32::from(code >> 12) & 1) << 5         // A1
        | (u32::from(code >> 13) & 1) << 4         // A2
        | (u32::from(code >> 14) & 1) << 3         // A4
        | (u32::from(code >> 8) & 1) << 2          // B1
        | (u32::from(code >> 9) & 1) << 1          // B2
        | (u32::from(code >> 10) & 1); // B4
    let five_hundreds = gray_to_binary(d_gray);

    // every odd 500 ft step counts its hundreds backwards
    if five_hundreds & 1 != 0 {
        hundreds = 6 - hundreds;
    }

    let steps = five_hundreds * 5 + hundreds;
    // the scale starts at -1200 ft, represented as 13 steps below zero
    if steps >= 13 {
        Some(steps as i32 - 13)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use hexlit::hex;

    #[test]
    fn test_comm_b_altitude() {
        let bytes = hex!("a0001910cc300030aa0000eae004");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        match msg.df {
            DF::CommBAltitude {
                altitude, comm_b, ..
            } => {
                assert_eq!(altitude.0, 39000);
                assert_eq!(comm_b.len(), 7);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_invalid_crc() {
        let bytes = hex!("8d4ca251204994b1c36e60a5343d");
        let msg = Message::from_bytes((&bytes, 0));
        match msg {
            Err(DekuError::Assertion(_)) => (),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_all_call_reply() {
        // synthesised all-call: DF=11, CA=5, announced address 4ca7b4
        let mut bytes = [0x5d, 0x4c, 0xa7, 0xb4, 0, 0, 0];
        let parity = crc::syndrome(&bytes);
        bytes[4] = (parity >> 16) as u8;
        bytes[5] = (parity >> 8) as u8;
        bytes[6] = parity as u8;
        assert_eq!(crc::syndrome(&bytes), 0);

        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        match msg.df {
            DF::AllCall {
                capability, icao24, ..
            } => {
                assert_eq!(capability, Capability::Airborne);
                assert_eq!(format!("{icao24}"), "4ca7b4");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_icao24_recovered_from_parity() {
        let bytes = hex!("a0001910cc300030aa0000eae004");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        let icao24 = msg.icao24().unwrap();
        assert_eq!(icao24.0, msg.syndrome);
    }

    #[test]
    fn test_df_serialization() {
        let bytes = hex!("8d406b902015a678d4d220aa4bda");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["DF"], "DF17");
        assert_eq!(json["icao24"], "406b90");
    }

    #[test]
    fn test_squawk_unshuffle() {
        // a single digit per lane: A=1 (bit 11), B=2 (B2, bit 3),
        // C=4 (C4, bit 8), D=7 (bits 4, 2, 0)
        let field = 0x0800 | 0x0008 | 0x0100 | 0x0010 | 0x0004 | 0x0001;
        assert_eq!(unshuffle_squawk(field), 0x1247);
        assert_eq!(unshuffle_squawk(0), 0);
    }

    #[test]
    fn test_gillham_altitude() {
        // no C bit set is illegal, as is any check bit
        assert_eq!(gillham_altitude(0), None);
        assert_eq!(gillham_altitude(0x8000), None);
        // B2 + C1: 300 ft
        assert_eq!(gillham_altitude(0x0210), Some(3));
    }

    #[test]
    fn test_flight_status() {
        assert_eq!(FlightStatus(0).on_ground(), Some(false));
        assert_eq!(FlightStatus(1).on_ground(), Some(true));
        assert!(!FlightStatus(0).alert());
        assert!(FlightStatus(3).alert());
        assert!(FlightStatus(4).alert() && FlightStatus(4).spi());
        assert!(FlightStatus(5).spi() && !FlightStatus(5).alert());
        assert_eq!(FlightStatus(5).on_ground(), None);
    }
}
