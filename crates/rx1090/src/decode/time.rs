/**
 * Timestamps circulate in two units: Unix seconds (wall clock) and ticks
 * of the 12 MHz sample clock stamped on magnitude blocks.
 */
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_in_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime before unix epoch")
        .as_nanos()
}

pub fn now_in_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime before unix epoch")
        .as_secs()
}
