/**
 * Replay of raw IQ sample files (unsigned 8-bit interleaved I/Q at
 * 2.4 MHz), `-` for standard input.
 *
 * The file is read on a dedicated thread in fixed-size blocks, converted
 * to magnitudes and pushed into a bounded channel; the reader blocks when
 * the decoding loop falls behind. The end of each block is carried over
 * in front of the next so a frame crossing the boundary stays decodable.
 */
use std::fs::File;
use std::io::{self, BufReader, Read};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::decode::time::now_in_ns;
use crate::demod::magnitude::{
    MagnitudeBuffer, MagnitudeLut, MODES_ASYNC_BUF_SIZE,
};

/// Read an IQ sample file and send magnitude blocks into `tx`.
///
/// `loops` replays the file that many times, 0 meaning forever (ignored
/// when reading from stdin). The call blocks until the file is exhausted
/// or the receiving side is closed; run it on its own thread.
pub fn read_iq_file(
    path: &str,
    loops: u32,
    tx: mpsc::Sender<MagnitudeBuffer>,
) -> io::Result<()> {
    let lut = MagnitudeLut::new();
    let mut iteration = 0u32;

    loop {
        let reader: Box<dyn Read> = if path == "-" {
            Box::new(io::stdin())
        } else {
            Box::new(File::open(path)?)
        };
        let mut reader = BufReader::with_capacity(MODES_ASYNC_BUF_SIZE, reader);

        let mut block = vec![0u8; MODES_ASYNC_BUF_SIZE];
        let mut overlap: Vec<u16> = Vec::new();
        let mut sample_timestamp = 0u64;

        loop {
            let mut filled = 0;
            while filled < block.len() {
                match reader.read(&mut block[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        error!("error reading {path}: {e}");
                        return Err(e);
                    }
                }
            }
            if filled == 0 {
                break;
            }
            // a trailing odd byte cannot form an IQ pair
            let block = &block[..filled & !1];

            let sys_timestamp = now_in_ns() as f64 * 1e-9;
            // data[0] is the first overlap sample, which predates the
            // first fresh sample of this block
            let stamp = sample_timestamp.saturating_sub(5 * overlap.len() as u64);
            let buf = MagnitudeBuffer::from_iq(
                block,
                &lut,
                &overlap,
                stamp,
                sys_timestamp,
            );
            // 5 ticks of the 12 MHz clock per sample, minus the overlap
            // which was already accounted for
            sample_timestamp += 5 * (block.len() / 2) as u64;
            overlap = buf.overlap().to_vec();

            if tx.blocking_send(buf).is_err() {
                debug!("receiver closed, stopping file replay");
                return Ok(());
            }
        }

        iteration += 1;
        if path == "-" || (loops != 0 && iteration >= loops) {
            break;
        }
        info!("looping over {path} (iteration {iteration})");
    }
    info!("end of file {path}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_replay_counts_blocks() {
        let mut path = std::env::temp_dir();
        path.push("rx1090-file-source-test.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(&vec![127u8; MODES_ASYNC_BUF_SIZE + 1024]).unwrap();
        drop(f);

        let (tx, mut rx) = mpsc::channel(2);
        let p = path.to_str().unwrap().to_string();
        let handle = std::thread::spawn(move || read_iq_file(&p, 2, tx));

        let mut blocks = 0;
        let mut samples = 0;
        while let Some(buf) = rx.blocking_recv() {
            blocks += 1;
            samples += buf.length;
        }
        handle.join().unwrap().unwrap();

        // two full blocks and two remainders
        assert_eq!(blocks, 4);
        assert!(samples > MODES_ASYNC_BUF_SIZE);
        std::fs::remove_file(&path).unwrap();
    }
}
