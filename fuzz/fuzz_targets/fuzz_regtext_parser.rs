//! Fuzz target for registry editor text parsing.
//!
//! Goal: The parser should **never panic** on any input.
//! It may return errors, but panics are unacceptable.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_regtext_parser
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use polstate_regtext::RegFile;

fuzz_target!(|data: &[u8]| {
    // .reg exports are text; invalid UTF-8 is rejected before parsing
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(reg) = RegFile::parse(text) {
            let _ = reg.to_text();
        }
        let _ = RegFile::parse_scoped(text, "HKEY_LOCAL_MACHINE");
    }
});
