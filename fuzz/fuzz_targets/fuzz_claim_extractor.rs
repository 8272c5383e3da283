#![no_main]

use libfuzzer_sys::fuzz_target;
use qnwis::{VerificationConfig, Verifier};

fuzz_target!(|data: &[u8]| {
    if let Ok(narrative) = std::str::from_utf8(data) {
        // Extraction must never panic and must be deterministic.
        let config = VerificationConfig::default();
        let first = qnwis::verifier::claims::extract(narrative, &config);
        let second = qnwis::verifier::claims::extract(narrative, &config);
        assert_eq!(first.len(), second.len());

        // Verification over an empty result set must also hold up.
        let verifier = Verifier::new(config);
        let report = verifier.verify(narrative, &[]);
        assert!(report.claims_matched <= report.claims_total);
    }
});
