/**
 * Mode S demodulation at 2.4 MHz.
 *
 * A Mode S frame starts with an 8 µs preamble (pulses at 0, 1, 3.5 and
 * 4.5 µs) followed by 56 or 112 bits of pulse-position modulation, one
 * bit per microsecond. At 2.4 Msamples/s the symbol boundary can fall at
 * five distinct sub-sample phases (each 1/12 µs of a notional 60 MHz
 * clock), so the preamble is screened with a cheap peak test first, then
 * every candidate phase is sliced with its own correlation kernel and the
 * best-scoring message wins.
 */
pub mod magnitude;

use crate::decode::crc::{
    self, FrameScore, IcaoCache, MODES_LONG_MSG_BYTES,
};
use magnitude::{MagnitudeBuffer, POWER_LUT};

/// Preamble duration in microseconds
pub const MODES_PREAMBLE_US: usize = 8;

/// Samples spanned by a preamble plus a long frame at 2.4 MHz, rounded up
/// to the largest slicer lookahead. This many samples are carried over
/// between consecutive magnitude blocks.
pub const TRAILING_SAMPLES: usize =
    (MODES_PREAMBLE_US + crc::MODES_LONG_MSG_BITS) * 12 / 5 + 4;

/// One demodulated and CRC-validated frame
#[derive(Debug, Clone)]
pub struct ModesFrame {
    /// 7 or 14 bytes, repaired in place if bits were corrected
    pub msg: Vec<u8>,
    /// The score of the winning phase candidate
    pub score: i32,
    /// Number of repaired bits
    pub corrected: u8,
    /// Mean normalized power over the message samples, in [0, 1]
    pub signal_level: f64,
    /// 12 MHz clock at the start of the preamble
    pub timestamp: u64,
}

impl ModesFrame {
    /// Signal level in dBFS
    pub fn rssi(&self) -> f32 {
        10. * self.signal_level.max(1e-10).log10() as f32
    }

    /// The frame as lowercase hex, the payload of the raw wire format
    pub fn hex(&self) -> String {
        hex::encode(&self.msg)
    }
}

#[derive(Debug, Clone)]
pub struct DemodConfig {
    /// Attempt single bit error repair (`--no-fix` clears it)
    pub fix_single_bit: bool,
    /// Attempt two bit error repair on DF 17/18 (`--aggressive` sets it)
    pub fix_two_bits: bool,
    /// The preamble is kept when 2·high > threshold·noise, so 3 asks for
    /// roughly 3.5 dB of headroom above the noise reference
    pub preamble_threshold: u32,
}

impl Default for DemodConfig {
    fn default() -> Self {
        DemodConfig {
            fix_single_bit: true,
            fix_two_bits: false,
            preamble_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DemodStats {
    /// Windows that passed the preamble screening
    pub preambles: u64,
    /// Accepted frames, indexed by the number of corrected bits
    pub accepted: [u64; 3],
    /// Candidates rejected by checksum or score
    pub rejected_bad: u64,
    /// Samples scanned
    pub samples_processed: u64,
    /// Samples lost upstream
    pub samples_dropped: u64,
}

impl DemodStats {
    pub fn accepted_total(&self) -> u64 {
        self.accepted.iter().sum()
    }
}

// The five bit-slicing kernels. Each one estimates the sign of the chip
// transition of one PPM bit whose boundary falls at a different fifth of
// a sample.
#[inline]
fn slice_phase0(m: &[u16]) -> i32 {
    5 * i32::from(m[0]) - 3 * i32::from(m[1]) - 2 * i32::from(m[2])
}

#[inline]
fn slice_phase1(m: &[u16]) -> i32 {
    4 * i32::from(m[0]) - i32::from(m[1]) - 3 * i32::from(m[2])
}

#[inline]
fn slice_phase2(m: &[u16]) -> i32 {
    3 * i32::from(m[0]) + i32::from(m[1]) - 4 * i32::from(m[2])
}

#[inline]
fn slice_phase3(m: &[u16]) -> i32 {
    2 * i32::from(m[0]) + 3 * i32::from(m[1]) - 5 * i32::from(m[2])
}

#[inline]
fn slice_phase4(m: &[u16]) -> i32 {
    i32::from(m[0]) + 5 * i32::from(m[1])
        - 5 * i32::from(m[2])
        - i32::from(m[3])
}

/// Slice one byte starting at `m[0]` with the given phase; returns the
/// byte, the next phase and the pointer advance (5 bytes span 96 samples,
/// i.e. 40 µs).
fn slice_byte(m: &[u16], phase: usize) -> (u8, usize, usize) {
    match phase {
        0 => {
            let byte = u8::from(slice_phase0(&m[0..]) > 0) << 7
                | u8::from(slice_phase2(&m[2..]) > 0) << 6
                | u8::from(slice_phase4(&m[4..]) > 0) << 5
                | u8::from(slice_phase1(&m[7..]) > 0) << 4
                | u8::from(slice_phase3(&m[9..]) > 0) << 3
                | u8::from(slice_phase0(&m[12..]) > 0) << 2
                | u8::from(slice_phase2(&m[14..]) > 0) << 1
                | u8::from(slice_phase4(&m[16..]) > 0);
            (byte, 1, 19)
        }
        1 => {
            let byte = u8::from(slice_phase1(&m[0..]) > 0) << 7
                | u8::from(slice_phase3(&m[2..]) > 0) << 6
                | u8::from(slice_phase0(&m[5..]) > 0) << 5
                | u8::from(slice_phase2(&m[7..]) > 0) << 4
                | u8::from(slice_phase4(&m[9..]) > 0) << 3
                | u8::from(slice_phase1(&m[12..]) > 0) << 2
                | u8::from(slice_phase3(&m[14..]) > 0) << 1
                | u8::from(slice_phase0(&m[17..]) > 0);
            (byte, 2, 19)
        }
        2 => {
            let byte = u8::from(slice_phase2(&m[0..]) > 0) << 7
                | u8::from(slice_phase4(&m[2..]) > 0) << 6
                | u8::from(slice_phase1(&m[5..]) > 0) << 5
                | u8::from(slice_phase3(&m[7..]) > 0) << 4
                | u8::from(slice_phase0(&m[10..]) > 0) << 3
                | u8::from(slice_phase2(&m[12..]) > 0) << 2
                | u8::from(slice_phase4(&m[14..]) > 0) << 1
                | u8::from(slice_phase1(&m[17..]) > 0);
            (byte, 3, 19)
        }
        3 => {
            let byte = u8::from(slice_phase3(&m[0..]) > 0) << 7
                | u8::from(slice_phase0(&m[3..]) > 0) << 6
                | u8::from(slice_phase2(&m[5..]) > 0) << 5
                | u8::from(slice_phase4(&m[7..]) > 0) << 4
                | u8::from(slice_phase1(&m[10..]) > 0) << 3
                | u8::from(slice_phase3(&m[12..]) > 0) << 2
                | u8::from(slice_phase0(&m[15..]) > 0) << 1
                | u8::from(slice_phase2(&m[17..]) > 0);
            (byte, 4, 19)
        }
        _ => {
            let byte = u8::from(slice_phase4(&m[0..]) > 0) << 7
                | u8::from(slice_phase1(&m[3..]) > 0) << 6
                | u8::from(slice_phase3(&m[5..]) > 0) << 5
                | u8::from(slice_phase0(&m[8..]) > 0) << 4
                | u8::from(slice_phase2(&m[10..]) > 0) << 3
                | u8::from(slice_phase4(&m[12..]) > 0) << 2
                | u8::from(slice_phase1(&m[15..]) > 0) << 1
                | u8::from(slice_phase3(&m[17..]) > 0);
            (byte, 0, 20)
        }
    }
}

/// Expected byte length of a frame starting with this first byte, or None
/// for a Downlink Format we do not decode at all.
fn frame_bytes(byte0: u8) -> Option<usize> {
    match byte0 >> 3 {
        0 | 4 | 5 | 11 => Some(crc::MODES_SHORT_MSG_BYTES),
        16 | 17 | 18 | 20 | 21 | 24..=31 => Some(MODES_LONG_MSG_BYTES),
        _ => None,
    }
}

/// Scan a magnitude buffer for Mode S frames.
///
/// Each window passing the coarse peak test is sliced at the five
/// candidate phases; every phase candidate is checked (and possibly
/// repaired) against the CRC and scored, and the best scoring one is
/// kept. Accepted standalone-parity frames feed the recent-ICAO cache
/// used to validate address/parity frames.
pub fn demodulate2400(
    buf: &MagnitudeBuffer,
    config: &DemodConfig,
    cache: &mut IcaoCache,
    stats: &mut DemodStats,
) -> Vec<ModesFrame> {
    let mut out = Vec::new();
    if buf.length < TRAILING_SAMPLES {
        return out;
    }
    let m = &buf.data[..buf.length];
    let mlen = buf.length - TRAILING_SAMPLES;
    let now = buf.sys_timestamp as u64;

    stats.samples_processed += mlen as u64;
    stats.samples_dropped += buf.dropped;

    let mut work = [0u8; MODES_LONG_MSG_BYTES];
    let mut best = [0u8; MODES_LONG_MSG_BYTES];

    let mut j = 0;
    while j < mlen {
        let p = &m[j..];

        // coarse peak test: first and last preamble pulses
        if !(p[1] > p[7] && p[12] > p[14] && p[12] > p[15]) {
            j += 1;
            continue;
        }

        let pu = |i: usize| u32::from(p[i]);

        // locate the pulse peaks; each arrangement corresponds to one or
        // two of the five possible sub-sample phases
        let high = if p[1] > p[2]
            && p[2] < p[3]
            && p[3] > p[4]
            && p[8] < p[9]
            && p[9] > p[10]
            && p[10] < p[11]
        {
            // peaks at 1, 3, 9 and 11-12
            (pu(1) + pu(3) + pu(9) + pu(11) + pu(12)) / 5
        } else if p[1] > p[2]
            && p[2] < p[3]
            && p[3] > p[4]
            && p[8] < p[9]
            && p[9] > p[10]
            && p[11] < p[12]
        {
            // peaks at 1, 3, 9 and 12
            (pu(1) + pu(3) + pu(9) + pu(12)) / 4
        } else if p[1] > p[2]
            && p[2] < p[3]
            && p[4] > p[5]
            && p[8] < p[9]
            && p[10] > p[11]
            && p[11] < p[12]
        {
            // peaks at 1, 3-4, 9-10 and 12
            (pu(1) + pu(3) + pu(4) + pu(9) + pu(10) + pu(12)) / 6
        } else if p[1] > p[2]
            && p[3] < p[4]
            && p[4] > p[5]
            && p[9] < p[10]
            && p[10] > p[11]
            && p[11] < p[12]
        {
            // peaks at 1, 4, 10 and 12
            (pu(1) + pu(4) + pu(10) + pu(12)) / 4
        } else if p[2] > p[3]
            && p[3] < p[4]
            && p[4] > p[5]
            && p[9] < p[10]
            && p[10] > p[11]
            && p[11] < p[12]
        {
            // peaks at 1-2, 4, 10 and 12
            (pu(1) + pu(2) + pu(4) + pu(10) + pu(12)) / 5
        } else {
            j += 1;
            continue;
        };

        // noise reference from the quiet preamble samples, scaled by the
        // configured threshold
        let noise = (pu(5) + pu(8) + pu(16) + pu(17) + pu(18)) / 5;
        if 2 * high <= config.preamble_threshold * noise {
            j += 1;
            continue;
        }

        // the quiet samples themselves must stay below the pulse level
        let high16 = high.min(u32::from(u16::MAX)) as u16;
        if [5, 6, 7, 8, 14, 15, 16, 17, 18]
            .iter()
            .any(|&i| p[i] >= high16)
        {
            j += 1;
            continue;
        }

        stats.preambles += 1;

        // slice the message at each candidate phase, keep the best score
        let mut best_score = FrameScore {
            score: -1,
            corrected: 0,
            addr: 0,
            standalone: false,
        };
        let mut best_len = 0;
        for try_phase in 3..8 {
            let mut pos = j + 19 + try_phase / 5;
            let mut phase = try_phase % 5;
            let mut bytelen = MODES_LONG_MSG_BYTES;
            let mut i = 0;
            while i < bytelen {
                let (byte, next_phase, advance) =
                    slice_byte(&m[pos..], phase);
                phase = next_phase;
                pos += advance;
                work[i] = byte;
                if i == 0 {
                    // early exit on a Downlink Format we do not handle
                    match frame_bytes(work[0]) {
                        Some(len) => bytelen = len,
                        None => break,
                    }
                }
                i += 1;
            }
            if i < bytelen {
                continue;
            }

            let candidate = &mut work[..bytelen];
            let scored = crc::score_and_repair(
                candidate,
                config.fix_single_bit,
                config.fix_two_bits,
                cache,
                now,
            );
            if scored.score > best_score.score {
                best_score = scored;
                best_len = bytelen;
                best[..bytelen].copy_from_slice(candidate);
            }
        }

        if best_score.score < 0 {
            stats.rejected_bad += 1;
            j += 1;
            continue;
        }

        if best_score.standalone {
            cache.insert(best_score.addr, now);
        }

        // mean power over the message span, for the signal level
        let bits = best_len * 8;
        let data_start = j + MODES_PREAMBLE_US * 12 / 5;
        let span = bits * 12 / 5;
        let signal_level = m[data_start..data_start + span]
            .iter()
            .map(|&s| POWER_LUT[usize::from(s)])
            .sum::<f64>()
            / span as f64;

        stats.accepted[usize::from(best_score.corrected)] += 1;
        out.push(ModesFrame {
            msg: best[..best_len].to_vec(),
            score: best_score.score,
            corrected: best_score.corrected,
            signal_level,
            timestamp: buf.sample_timestamp + 5 * j as u64,
        });

        // jump over the decoded frame
        j += (MODES_PREAMBLE_US + bits) * 12 / 5;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::magnitude::MagnitudeBuffer;
    use super::*;
    use hexlit::hex;

    /// Synthesize a clean PPM signal for the given frame, starting
    /// `offset` ticks of the 12 MHz clock after the first sample. Each
    /// 2.4 MHz output sample integrates five ticks.
    fn synthesize(frame: &[u8], offset: usize) -> MagnitudeBuffer {
        const AMPLITUDE: u32 = 12000;
        let lead = 100;
        let bits = frame.len() * 8;
        let total_ticks = lead * 5 + offset + (MODES_PREAMBLE_US + bits) * 12;
        let mut ticks = vec![0u32; total_ticks + TRAILING_SAMPLES * 5 + 5];

        let start = lead * 5 + offset;
        // preamble pulses at 0, 1, 3.5 and 4.5 µs (12 ticks per µs)
        for pulse in [0, 12, 42, 54] {
            for t in 0..6 {
                ticks[start + pulse + t] = AMPLITUDE;
            }
        }
        // one PPM bit per µs: chip order encodes the bit
        for k in 0..bits {
            let bit = (frame[k / 8] >> (7 - (k % 8))) & 1;
            let chip = start + 96 + 12 * k + if bit == 1 { 0 } else { 6 };
            for t in 0..6 {
                ticks[chip + t] = AMPLITUDE;
            }
        }

        let data: Vec<u16> = ticks
            .chunks_exact(5)
            .map(|c| (c.iter().sum::<u32>() / 5) as u16)
            .collect();
        let length = data.len();
        MagnitudeBuffer {
            data,
            length,
            sample_timestamp: 0,
            sys_timestamp: 0.0,
            mean_power: 0.0,
            mean_level: 0.0,
            dropped: 0,
        }
    }

    #[test]
    fn test_decode_at_all_phases() {
        let frame = hex!("8D406B902015A678D4D220AA4BDA");
        for offset in [0, 1, 2, 3, 4, 5, 6, 7, 9, 12] {
            let buf = synthesize(&frame, offset);
            let mut cache = IcaoCache::default();
            let mut stats = DemodStats::default();
            let frames = demodulate2400(
                &buf,
                &DemodConfig::default(),
                &mut cache,
                &mut stats,
            );
            assert_eq!(frames.len(), 1, "offset {offset}");
            assert_eq!(frames[0].msg, frame, "offset {offset}");
            assert_eq!(frames[0].corrected, 0);
            assert!(frames[0].signal_level > 0.0);
            // the announced address entered the cache
            assert!(cache.contains(0x406b90, 0));
        }
    }

    #[test]
    fn test_decode_short_frame() {
        // synthesised all-call with a valid checksum
        let mut frame = [0x5du8, 0x4c, 0xa7, 0xb4, 0, 0, 0];
        let parity = crc::syndrome(&frame);
        frame[4] = (parity >> 16) as u8;
        frame[5] = (parity >> 8) as u8;
        frame[6] = parity as u8;

        let buf = synthesize(&frame, 4);
        let mut cache = IcaoCache::default();
        let mut stats = DemodStats::default();
        let frames = demodulate2400(
            &buf,
            &DemodConfig::default(),
            &mut cache,
            &mut stats,
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg, frame);
        assert_eq!(stats.accepted, [1, 0, 0]);
    }

    #[test]
    fn test_repair_flipped_bit() {
        let mut frame = hex!("8D406B902015A678D4D220AA4BDA");
        let reference = frame;
        frame[5] ^= 0x20; // flip bit 42

        let buf = synthesize(&frame, 4);

        // without repair the frame is rejected
        let mut cache = IcaoCache::default();
        let mut stats = DemodStats::default();
        let config = DemodConfig {
            fix_single_bit: false,
            ..DemodConfig::default()
        };
        let frames = demodulate2400(&buf, &config, &mut cache, &mut stats);
        assert!(frames.is_empty());
        assert!(stats.rejected_bad > 0);

        // with repair the original payload is recovered
        let mut stats = DemodStats::default();
        let frames = demodulate2400(
            &buf,
            &DemodConfig::default(),
            &mut cache,
            &mut stats,
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg, reference);
        assert_eq!(frames[0].corrected, 1);
        assert_eq!(stats.accepted, [0, 1, 0]);
    }

    #[test]
    fn test_address_parity_needs_known_aircraft() {
        // a DF 4 altitude reply from an aircraft never heard before
        let frame = hex!("20001910BC45E9");
        let buf = synthesize(&frame, 4);
        let mut cache = IcaoCache::default();
        let mut stats = DemodStats::default();
        let frames = demodulate2400(
            &buf,
            &DemodConfig::default(),
            &mut cache,
            &mut stats,
        );
        assert!(frames.is_empty());

        // once the address is known, the same frame is accepted
        let addr = crc::syndrome(&frame);
        cache.insert(addr, 0);
        let mut stats = DemodStats::default();
        let frames = demodulate2400(
            &buf,
            &DemodConfig::default(),
            &mut cache,
            &mut stats,
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].score, 1000);
    }

    #[test]
    fn test_noise_only_buffer() {
        let data = vec![120u16; 4 * TRAILING_SAMPLES];
        let length = data.len();
        let buf = MagnitudeBuffer {
            data,
            length,
            sample_timestamp: 0,
            sys_timestamp: 0.0,
            mean_power: 0.0,
            mean_level: 0.0,
            dropped: 0,
        };
        let mut cache = IcaoCache::default();
        let mut stats = DemodStats::default();
        let frames = demodulate2400(
            &buf,
            &DemodConfig::default(),
            &mut cache,
            &mut stats,
        );
        assert!(frames.is_empty());
        assert_eq!(stats.accepted_total(), 0);
    }
}
