#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Arbitrary YAML must either parse into a valid definition or fail
        // cleanly; it must never panic.
        let _ = qnwis_data::catalog::load_str(text);
    }
});
