//! Fuzz target for binary policy file parsing.
//!
//! Goal: `PolFile::from_bytes` should **never panic** on any input, and whatever it
//! accepts must serialize and parse again.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_polfile_parser
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use polstate_polfile::PolFile;

fuzz_target!(|data: &[u8]| {
    if let Ok(pol) = PolFile::from_bytes(data) {
        let bytes = pol.to_bytes();
        let again = PolFile::from_bytes(&bytes).expect("serialized file must parse");
        assert_eq!(again.len(), pol.len());
    }
});
