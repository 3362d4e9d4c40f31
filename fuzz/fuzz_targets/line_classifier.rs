#![no_main]

use coretrace::parse::{parse_source_trace, EstimationDumpReader, LatencyLogReader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // None of the readers may panic on arbitrary text
        let _ = parse_source_trace(input);

        if let Ok(mut dumps) = EstimationDumpReader::new(input) {
            while dumps.next_dump().is_some() {}
        }
        if let Ok(mut rows) = LatencyLogReader::new(input) {
            while rows.next_row().is_some() {}
        }
    }
});
