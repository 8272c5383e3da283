#![no_main]

use libfuzzer_sys::fuzz_target;
use qnwis_data::{engine, BoundParams, BoundQuery};

fuzz_target!(|data: &[u8]| {
    if let Ok(sql) = std::str::from_utf8(data) {
        let query = BoundQuery {
            sql: sql.to_string(),
            params: BoundParams::default(),
        };
        // With no bound values the rewrite either succeeds placeholder-free
        // or reports the missing bind; no panics, no silent truncation.
        if let Ok((rewritten, order)) = engine::to_positional(&query) {
            assert!(order.is_empty());
            assert_eq!(rewritten.matches('$').count(), sql.matches('$').count());
        }
    }
});
