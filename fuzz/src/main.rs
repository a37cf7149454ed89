//! AFL fuzz target for wire-frame decoding.
//!
//! Reads test cases from standard input and feeds them to
//! [`tradegate::frame::decode`] in a loop compatible with AFL's persistent
//! mode. Unlike a parser whose
//! `Result` is safe to `unwrap` on well-formed input, arbitrary fuzz bytes
//! are expected to be malformed far more often than not: decode errors are
//! the normal case here, not a crash signal, so we only let a genuine panic
//! inside `decode` reach AFL.
unsafe extern "C" {
    fn __AFL_LOOP(cnt: u32) -> i32;
}
use std::io::{self, Read};

use tradegate::frame::{MAX_FRAME_LEN, decode};

fn main() {
    let mut data = Vec::with_capacity(MAX_FRAME_LEN);
    loop {
        if unsafe { __AFL_LOOP(1000) } == 0 {
            break;
        }
        data.clear();
        if io::stdin()
            .take(MAX_FRAME_LEN as u64)
            .read_to_end(&mut data)
            .is_err()
        {
            return;
        }
        let _ = decode(&data);
    }
}
