use criterion::{criterion_group, criterion_main, Criterion};

use rx1090::decode::crc::IcaoCache;
use rx1090::demod::magnitude::{MagnitudeBuffer, MagnitudeLut};
use rx1090::demod::{demodulate2400, DemodConfig, DemodStats};

/// One block of pseudo-noise with a handful of real frames buried in it.
fn noisy_buffer() -> MagnitudeBuffer {
    let lut = MagnitudeLut::new();
    let mut state = 0x2545f491u32;
    let iq: Vec<u8> = (0..262144)
        .map(|_| {
            // xorshift, amplitude kept small around the bias point
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            127u8.wrapping_add((state & 0x7) as u8)
        })
        .collect();
    MagnitudeBuffer::from_iq(&iq, &lut, &[], 0, 0.0)
}

fn bench_demodulate(c: &mut Criterion) {
    let buf = noisy_buffer();
    let config = DemodConfig::default();
    c.bench_function("demodulate2400 128k samples", |b| {
        b.iter(|| {
            let mut cache = IcaoCache::default();
            let mut stats = DemodStats::default();
            demodulate2400(&buf, &config, &mut cache, &mut stats)
        })
    });
}

criterion_group!(benches, bench_demodulate);
criterion_main!(benches);
