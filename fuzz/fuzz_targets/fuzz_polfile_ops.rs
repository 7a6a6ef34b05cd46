//! Fuzz target for policy file mutation.
//!
//! Goal: any sequence of source operations leaves a file that serializes, parses
//! again, and keeps answering reads without panicking.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_polfile_ops
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use polstate_polfile::PolFile;
use polstate_types::{PolicyReader, PolicySource, RegistryValue, RegistryValueType};

#[derive(Arbitrary, Debug)]
enum Op {
    SetDWord { key: u8, value: u8, data: u32 },
    SetText { key: u8, value: u8, data: String },
    Delete { key: u8, value: u8 },
    Forget { key: u8, value: u8 },
    Clear { key: u8 },
    Unclear { key: u8 },
}

const KEYS: [&str; 3] = [
    "Software\\Policies\\Fuzz",
    "Software\\Policies\\Fuzz\\Sub",
    "Software\\Policies\\Other",
];
const VALUES: [&str; 4] = ["A", "a", "B", "**del.A"];

fn key(n: u8) -> &'static str {
    KEYS[n as usize % KEYS.len()]
}

fn value(n: u8) -> &'static str {
    VALUES[n as usize % VALUES.len()]
}

fuzz_target!(|ops: Vec<Op>| {
    let mut pol = PolFile::new();
    for op in ops {
        let _ = match op {
            Op::SetDWord { key: k, value: v, data } => pol.set_value(
                key(k),
                value(v),
                RegistryValue::DWord(data),
                RegistryValueType::DWord,
            ),
            Op::SetText { key: k, value: v, data } => pol.set_value(
                key(k),
                value(v),
                RegistryValue::Text(data),
                RegistryValueType::String,
            ),
            Op::Delete { key: k, value: v } => pol.delete_value(key(k), value(v)),
            Op::Forget { key: k, value: v } => pol.forget_value(key(k), value(v)),
            Op::Clear { key: k } => pol.clear_key(key(k)),
            Op::Unclear { key: k } => pol.forget_key_clearance(key(k)),
        };
    }

    for k in KEYS {
        for v in VALUES {
            let _ = pol.get_value(k, v);
            let _ = pol.will_delete_value(k, v);
        }
        let _ = pol.value_names(k);
    }
    let again = PolFile::from_bytes(&pol.to_bytes()).expect("serialized file must parse");
    assert_eq!(again.len(), pol.len());
});
