use deku::bitvec::{BitSlice, Msb0};
use deku::prelude::*;
use serde::Serialize;

/**
 * ## Aircraft identification (register 0,8)
 *
 * Broadcast under typecodes 1..=4: the callsign, eight characters from
 * a 6-bit subset of IA-5, plus the emitter category. Typecode and
 * category together classify the emitter: set A (typecode 4) covers
 * aircraft by weight class, B covers gliders, balloons and UAVs, C the
 * surface vehicles and obstacles, D is reserved.
 */
#[derive(Debug, PartialEq, DekuRead, Serialize, Clone)]
pub struct AircraftIdentification {
    #[deku(bits = "5")]
    #[serde(skip)]
    pub tc: u8,

    #[deku(bits = "3")]
    #[serde(skip)]
    pub ca: u8,

    /// Emitter category, "A0" (nothing reported) through "D7"
    #[deku(
        bits = "0",
        map = "|_v: u8| -> Result<_, DekuError> {
            Ok(category_label(*tc, *ca))
        }"
    )]
    pub category: String,

    /// The callsign, with the trailing padding removed
    #[deku(reader = "read_callsign(deku::rest)")]
    pub callsign: String,
}

/// Typecode 4 reports category set A, 3 set B, 2 set C and 1 set D.
fn category_label(tc: u8, ca: u8) -> String {
    let set = match tc {
        4 => 'A',
        3 => 'B',
        2 => 'C',
        _ => 'D',
    };
    format!("{set}{ca}")
}

/// One character of the 6-bit alphabet: the letters sit below 27 (their
/// alphabet rank), the digits keep their ASCII value, 32 is the padding
/// space and everything else is reserved.
fn sixbit_char(code: u8) -> char {
    match code {
        1..=26 => char::from(b'@' + code),
        48..=57 => char::from(code),
        32 => ' ',
        _ => '?',
    }
}

pub fn read_callsign(
    rest: &BitSlice<u8, Msb0>,
) -> Result<(&BitSlice<u8, Msb0>, String), DekuError> {
    let mut rest = rest;
    let mut callsign = String::with_capacity(8);
    for _ in 0..8 {
        let (next, code) = u8::read(
            rest,
            (deku::ctx::Endian::Big, deku::ctx::BitSize(6)),
        )?;
        callsign.push(sixbit_char(code));
        rest = next;
    }
    callsign.truncate(callsign.trim_end().len());
    Ok((rest, callsign))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use hexlit::hex;

    #[test]
    fn test_callsign() {
        let bytes = hex!("8d406b902015a678d4d220aa4bda");
        let msg = Message::from_bytes((&bytes, 0)).unwrap().1;
        if let Adsb(squitter) = msg.df {
            if let SquitterContent::BDS08(AircraftIdentification {
                tc,
                ca,
                category,
                callsign,
            }) = squitter.content
            {
                assert_eq!(tc, 4);
                assert_eq!(ca, 0);
                assert_eq!(category, "A0");
                assert_eq!(callsign, "EZY85MH");
                return;
            }
        }
        unreachable!();
    }

    #[test]
    fn test_sixbit_alphabet() {
        assert_eq!(sixbit_char(1), 'A');
        assert_eq!(sixbit_char(26), 'Z');
        assert_eq!(sixbit_char(48), '0');
        assert_eq!(sixbit_char(57), '9');
        assert_eq!(sixbit_char(32), ' ');
        assert_eq!(sixbit_char(0), '?');
        assert_eq!(sixbit_char(63), '?');
    }
}
