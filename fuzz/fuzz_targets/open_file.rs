#![no_main]

use libfuzzer_sys::fuzz_target;
use rootio::{RootFile, WalkAction};

fuzz_target!(|data: &[u8]| {
    let Ok(f) = RootFile::from_bytes(data.to_vec(), "fuzz.root") else {
        return;
    };
    let mut remaining = 64;
    f.walk(|_, _| {
        remaining -= 1;
        if remaining == 0 {
            WalkAction::Stop
        } else {
            WalkAction::Continue
        }
    });
});
