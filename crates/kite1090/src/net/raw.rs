/**
 * Raw wire format: one message per line, `*<hex>;` with 14 or 28
 * lowercase hex digits. A `*` resynchronises the stream; anything
 * between a `;` and the next `*` is ignored.
 */

/// Serialize a frame for the raw output service
pub fn raw_line(frame: &[u8]) -> String {
    format!("*{};\n", hex::encode(frame))
}

/// Streaming parser for the raw input service. Bytes are fed as they
/// arrive; at most one complete message is extracted per call, partial
/// messages stay buffered.
#[derive(Debug, Default)]
pub struct Deframer {
    buf: Vec<u8>,
    /// Syntactically invalid messages seen so far
    pub bad: u64,
}

/// An unterminated message longer than this cannot be valid: drop the
/// leading `*` and look for the next one.
const MAX_FRAME_CHARS: usize = 64;

impl Deframer {
    pub fn new() -> Self {
        Deframer::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete frame, if any, advancing the buffer.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let start = self.buf.iter().position(|&b| b == b'*')?;
            self.buf.drain(..start);

            let Some(end) = self.buf.iter().position(|&b| b == b';') else {
                if self.buf.len() > MAX_FRAME_CHARS {
                    self.bad += 1;
                    self.buf.drain(..1);
                    continue;
                }
                return None;
            };

            let hex_digits = &self.buf[1..end];
            let parsed = match hex_digits.len() {
                14 | 28 => hex::decode(hex_digits).ok(),
                _ => None,
            };
            self.buf.drain(..=end);
            match parsed {
                Some(frame) => return Some(frame),
                None => {
                    self.bad += 1;
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let frame = hex::decode("8d4b969699155600e87406f5b69f").unwrap();
        let line = raw_line(&frame);
        assert_eq!(line, "*8d4b969699155600e87406f5b69f;\n");

        let mut deframer = Deframer::new();
        deframer.feed(line.as_bytes());
        assert_eq!(deframer.next_frame(), Some(frame));
        assert_eq!(deframer.next_frame(), None);
        assert_eq!(deframer.bad, 0);
    }

    #[test]
    fn test_partial_message_stays_buffered() {
        let mut deframer = Deframer::new();
        deframer.feed(b"*8d4b9696991556");
        assert_eq!(deframer.next_frame(), None);
        deframer.feed(b"00e87406f5b69f;\n");
        assert_eq!(
            deframer.next_frame(),
            Some(hex::decode("8d4b969699155600e87406f5b69f").unwrap())
        );
    }

    #[test]
    fn test_resync_on_garbage() {
        let mut deframer = Deframer::new();
        deframer.feed(b"noise\n*ZZZZZZZZZZZZZZ;*28001abc123456;junk*00;");
        // first frame is invalid hex
        let frame = deframer.next_frame().unwrap();
        assert_eq!(hex::encode(&frame), "28001abc123456");
        assert_eq!(deframer.bad, 1);
        // `*00;` has an invalid length
        assert_eq!(deframer.next_frame(), None);
        assert_eq!(deframer.bad, 2);
    }

    #[test]
    fn test_one_message_per_call() {
        let mut deframer = Deframer::new();
        deframer.feed(b"*28001abc123456;\n*28001abc123456;\n");
        assert!(deframer.next_frame().is_some());
        assert!(deframer.next_frame().is_some());
        assert!(deframer.next_frame().is_none());
    }

    #[test]
    fn test_unterminated_noise_is_dropped() {
        let mut deframer = Deframer::new();
        deframer.feed(b"*");
        deframer.feed(&[b'x'; 100]);
        assert_eq!(deframer.next_frame(), None);
        assert!(deframer.bad > 0);
        // the parser still locks onto a later valid frame
        deframer.feed(b"*28001abc123456;");
        assert!(deframer.next_frame().is_some());
    }
}
