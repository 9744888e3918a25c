/**
 * Conversion of interleaved 8-bit IQ samples into 16-bit magnitudes.
 *
 * The square root is paid once for each of the 65 536 possible (I, Q)
 * byte pairs; the per-sample cost is one table read. A second shared
 * table turns a magnitude back into normalized power for signal level
 * and noise estimation.
 */
use once_cell::sync::Lazy;

use super::TRAILING_SAMPLES;

/// Size in bytes of one IQ block read from the sample source
pub const MODES_ASYNC_BUF_SIZE: usize = 16 * 16384;
/// Number of magnitude samples in one block
pub const MODES_MAG_BUF_SAMPLES: usize = MODES_ASYNC_BUF_SIZE / 2;

/// Magnitude squared, normalized to [0, 1], indexed by magnitude
pub static POWER_LUT: Lazy<Box<[f64]>> = Lazy::new(|| {
    (0..=u16::MAX as u32)
        .map(|m| {
            let f = f64::from(m) / f64::from(u16::MAX);
            f * f
        })
        .collect()
});

/// |I| + |Q| would be cheaper but noticeably distorts weak signals: this
/// table holds round(sqrt(i² + q²)) scaled to u16, with both bytes biased
/// around 127.5.
pub struct MagnitudeLut(Box<[u16]>);

impl MagnitudeLut {
    pub fn new() -> Self {
        let mut table = vec![0u16; 1 << 16].into_boxed_slice();
        for (idx, out) in table.iter_mut().enumerate() {
            let i = (idx >> 8) as f64 - 127.5;
            let q = (idx & 0xff) as f64 - 127.5;
            let mag = (i * i + q * q).sqrt() / (127.5 * std::f64::consts::SQRT_2);
            *out = (mag * f64::from(u16::MAX)).round() as u16;
        }
        MagnitudeLut(table)
    }

    #[inline]
    pub fn magnitude(&self, i: u8, q: u8) -> u16 {
        self.0[(usize::from(i) << 8) | usize::from(q)]
    }
}

impl Default for MagnitudeLut {
    fn default() -> Self {
        MagnitudeLut::new()
    }
}

/// One block of magnitudes handed to the demodulator. The head of `data`
/// repeats the trailing samples of the previous block so that a frame
/// straddling two blocks is never missed.
#[derive(Debug, Clone)]
pub struct MagnitudeBuffer {
    pub data: Vec<u16>,
    /// Number of valid samples in `data`
    pub length: usize,
    /// 12 MHz clock at `data[0]`, monotonically increasing
    pub sample_timestamp: u64,
    /// Wall clock at `data[0]`, Unix seconds
    pub sys_timestamp: f64,
    /// Mean of the normalized sample power over the fresh samples
    pub mean_power: f64,
    /// Mean of the normalized magnitude over the fresh samples
    pub mean_level: f64,
    /// Samples lost upstream since the previous block
    pub dropped: u64,
}

impl MagnitudeBuffer {
    /// Convert an IQ byte block, prepending the overlap carried from the
    /// previous block (empty on the first one).
    pub fn from_iq(
        iq: &[u8],
        lut: &MagnitudeLut,
        overlap: &[u16],
        sample_timestamp: u64,
        sys_timestamp: f64,
    ) -> Self {
        let fresh = iq.len() / 2;
        let mut data = Vec::with_capacity(overlap.len() + fresh);
        data.extend_from_slice(overlap);

        let mut sum_level = 0f64;
        let mut sum_power = 0f64;
        for pair in iq.chunks_exact(2) {
            let m = lut.magnitude(pair[0], pair[1]);
            let f = f64::from(m) / f64::from(u16::MAX);
            sum_level += f;
            sum_power += f * f;
            data.push(m);
        }

        let n = fresh.max(1) as f64;
        let length = data.len();
        MagnitudeBuffer {
            data,
            length,
            sample_timestamp,
            sys_timestamp,
            mean_power: sum_power / n,
            mean_level: sum_level / n,
            dropped: 0,
        }
    }

    /// The samples to carry over in front of the next block
    pub fn overlap(&self) -> &[u16] {
        let start = self.length.saturating_sub(TRAILING_SAMPLES);
        &self.data[start..self.length]
    }
}
