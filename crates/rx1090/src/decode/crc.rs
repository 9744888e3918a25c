/**
 * The Mode S CRC is a 24-bit checksum (generator 0xFFF409) computed over
 * the message excluding its trailing 24 bits, then compared with those
 * trailing bits.
 *
 * In DF 11, 17 and 18 the parity field stands alone (DF 11 replies may
 * overlay a 7-bit interrogator identifier); in DF 0, 4, 5, 16, 20 and 21
 * it is XORed with the transmitting ICAO address, so the address of an
 * intact frame can be recovered as `checksum XOR parity`.
 */
use deku::prelude::*;

pub const MODES_SHORT_MSG_BYTES: usize = 7;
pub const MODES_LONG_MSG_BYTES: usize = 14;
pub const MODES_SHORT_MSG_BITS: usize = MODES_SHORT_MSG_BYTES * 8;
pub const MODES_LONG_MSG_BITS: usize = MODES_LONG_MSG_BYTES * 8;

/// Per-bit contribution of each message bit to the checksum of a 112-bit
/// frame; 56-bit frames use the last 56 entries. The last 24 entries are
/// zero: the parity field does not contribute to its own checksum.
#[rustfmt::skip]
pub const CHECKSUM_TABLE: [u32; 112] = [
    0x3935ea, 0x1c9af5, 0xf1b77e, 0x78dbbf, 0xc397db, 0x9e31e9, 0xb0e2f0, 0x587178,
    0x2c38bc, 0x161c5e, 0x0b0e2f, 0xfa7d13, 0x82c48d, 0xbe9842, 0x5f4c21, 0xd05c14,
    0x682e0a, 0x341705, 0xe5f186, 0x72f8c3, 0xc68665, 0x9cb936, 0x4e5c9b, 0xd8d449,
    0x939020, 0x49c810, 0x24e408, 0x127204, 0x093902, 0x049c81, 0xfdb444, 0x7eda22,
    0x3f6d11, 0xe04c8c, 0x702646, 0x381323, 0xe3f395, 0x8e03ce, 0x4701e7, 0xdc7af7,
    0x91c77f, 0xb719bb, 0xa476d9, 0xadc168, 0x56e0b4, 0x2b705a, 0x15b82d, 0xf52612,
    0x7a9309, 0xc2b380, 0x6159c0, 0x30ace0, 0x185670, 0x0c2b38, 0x06159c, 0x030ace,
    0x018567, 0xff38b7, 0x80665f, 0xbfc92b, 0xa01e91, 0xaff54c, 0x57faa6, 0x2bfd53,
    0xea04ad, 0x8af852, 0x457c29, 0xdd4410, 0x6ea208, 0x375104, 0x1ba882, 0x0dd441,
    0xf91024, 0x7c8812, 0x3e4409, 0xe0d800, 0x706c00, 0x383600, 0x1c1b00, 0x0e0d80,
    0x0706c0, 0x038360, 0x01c1b0, 0x00e0d8, 0x00706c, 0x003836, 0x001c1b, 0xfff409,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
];

/// Number of bits of a frame starting with this first byte, from the
/// Downlink Format in its top 5 bits.
pub fn message_bits(byte0: u8) -> usize {
    if byte0 & 0x80 != 0 {
        // DF 16..=31
        MODES_LONG_MSG_BITS
    } else {
        MODES_SHORT_MSG_BITS
    }
}

/// Checksum of the message data bits (the parity field contributes zero).
fn checksum(msg: &[u8]) -> u32 {
    let offset = MODES_LONG_MSG_BITS - msg.len() * 8;
    let mut crc = 0;
    for (j, entry) in CHECKSUM_TABLE[offset..].iter().enumerate() {
        if msg[j / 8] & (1 << (7 - (j % 8))) != 0 {
            crc ^= entry;
        }
    }
    crc
}

/// Checksum XOR parity field: zero for an intact standalone-parity frame,
/// the transmitting ICAO address for an intact address/parity frame.
pub fn syndrome(msg: &[u8]) -> u32 {
    let len = msg.len();
    let parity = (u32::from(msg[len - 3]) << 16)
        | (u32::from(msg[len - 2]) << 8)
        | u32::from(msg[len - 1]);
    checksum(msg) ^ parity
}

/// Syndrome variant for the deku reader of [`crate::decode::Message`]:
/// the input may carry trailing bytes beyond the frame.
pub fn modes_checksum(msg: &[u8], bits: usize) -> Result<u32, DekuError> {
    if msg.len() < bits / 8 {
        return Err(DekuError::Assertion(format!(
            "{} bytes is too short for a {bits} bit message",
            msg.len()
        )));
    }
    Ok(syndrome(&msg[..bits / 8]))
}

/// Change of syndrome caused by flipping bit `j` of a `bits`-bit frame.
fn flip_syndrome(bits: usize, j: usize) -> u32 {
    if j < bits - 24 {
        CHECKSUM_TABLE[MODES_LONG_MSG_BITS - bits + j]
    } else {
        // flips inside the parity field shift the comparison instead
        1 << (bits - 1 - j)
    }
}

/// Try every single bit flip (the DF field excepted) and apply the first
/// one that zeroes the syndrome. Returns the flipped bit position.
pub fn repair_single(msg: &mut [u8]) -> Option<usize> {
    let bits = msg.len() * 8;
    let s = syndrome(msg);
    (5..bits).find(|&j| flip_syndrome(bits, j) == s).map(|j| {
        msg[j / 8] ^= 1 << (7 - (j % 8));
        j
    })
}

/// Try every two-bit combination (the DF field excepted) and apply the
/// first pair that zeroes the syndrome.
pub fn repair_double(msg: &mut [u8]) -> Option<(usize, usize)> {
    let bits = msg.len() * 8;
    let s = syndrome(msg);
    for j in 5..bits {
        let remainder = s ^ flip_syndrome(bits, j);
        for i in (j + 1)..bits {
            if flip_syndrome(bits, i) == remainder {
                msg[j / 8] ^= 1 << (7 - (j % 8));
                msg[i / 8] ^= 1 << (7 - (i % 8));
                return Some((j, i));
            }
        }
    }
    None
}

/// Addresses of aircraft heard recently, so that a random 24-bit value
/// recovered from an address/parity frame is not mistaken for a new
/// aircraft. Direct-mapped: a slot holds the last address hashed to it.
pub struct IcaoCache {
    slots: Vec<(u32, u64)>,
    ttl: u64,
}

impl IcaoCache {
    const SLOTS: usize = 1024;
    /// Addresses expire after 60 seconds by default
    pub const DEFAULT_TTL: u64 = 60;

    pub fn new(ttl: u64) -> Self {
        IcaoCache {
            slots: vec![(0, 0); Self::SLOTS],
            ttl,
        }
    }

    fn index(addr: u32) -> usize {
        ((addr ^ (addr >> 12)) as usize) & (Self::SLOTS - 1)
    }

    pub fn insert(&mut self, addr: u32, now: u64) {
        if addr != 0 {
            self.slots[Self::index(addr)] = (addr, now);
        }
    }

    pub fn contains(&self, addr: u32, now: u64) -> bool {
        let (slot_addr, seen) = self.slots[Self::index(addr)];
        addr != 0 && slot_addr == addr && now.saturating_sub(seen) <= self.ttl
    }
}

impl Default for IcaoCache {
    fn default() -> Self {
        IcaoCache::new(Self::DEFAULT_TTL)
    }
}

const SCORE_KNOWN_ICAO: i32 = 1000;
const SCORE_STANDALONE_PARITY: i32 = 500;
const PENALTY_PER_BIT: i32 = 50;
const PENALTY_UNKNOWN_ICAO: i32 = 200;

/// Outcome of validating one candidate frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameScore {
    /// Higher is better; negative rejects the frame
    pub score: i32,
    /// Number of repaired bits
    pub corrected: u8,
    /// Announced (DF 11/17/18) or recovered (other DFs) ICAO address
    pub addr: u32,
    /// Whether the parity field stood alone, i.e. the address above was
    /// verified by the checksum rather than looked up
    pub standalone: bool,
}

/// Validate (and, as configured, repair) a candidate frame, then score it:
/// +1000 for an address already heard, +500 for a verified standalone
/// checksum, −50 per corrected bit, −200 for an unknown recovered address.
/// A negative score rejects the frame.
pub fn score_and_repair(
    msg: &mut [u8],
    fix_single: bool,
    fix_double: bool,
    cache: &IcaoCache,
    now: u64,
) -> FrameScore {
    let df = msg[0] >> 3;
    match df {
        11 | 17 | 18 => {
            // DF 11 parity may overlay an interrogator identifier
            let intact =
                |s: u32| s == 0 || (df == 11 && s & 0xffff80 == 0);
            let mut s = syndrome(msg);
            let mut corrected = 0;
            if !intact(s) && fix_single && repair_single(msg).is_some() {
                corrected = 1;
                s = syndrome(msg);
            }
            if !intact(s)
                && fix_double
                && df != 11
                && repair_double(msg).is_some()
            {
                corrected = 2;
                s = syndrome(msg);
            }
            let addr = (u32::from(msg[1]) << 16)
                | (u32::from(msg[2]) << 8)
                | u32::from(msg[3]);
            let known = cache.contains(addr, now);
            let mut score = if !intact(s) {
                -1
            } else if s != 0 && !known {
                // an IID-masked all-call from an unknown aircraft is
                // indistinguishable from noise
                -1
            } else {
                SCORE_STANDALONE_PARITY
                    - PENALTY_PER_BIT * i32::from(corrected)
            };
            if score > 0 && known {
                score += SCORE_KNOWN_ICAO;
            }
            FrameScore {
                score,
                corrected,
                addr,
                standalone: true,
            }
        }
        0 | 4 | 5 | 16 | 20 | 21 => {
            // parity is XORed with the address: no repair is observable,
            // the recovered address must have been heard recently
            let addr = syndrome(msg);
            let score = if cache.contains(addr, now) {
                SCORE_KNOWN_ICAO
            } else {
                -PENALTY_UNKNOWN_ICAO
            };
            FrameScore {
                score,
                corrected: 0,
                addr,
                standalone: false,
            }
        }
        _ => FrameScore {
            score: -1,
            corrected: 0,
            addr: 0,
            standalone: false,
        },
    }
}
