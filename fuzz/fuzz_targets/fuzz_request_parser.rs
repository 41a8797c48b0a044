#![no_main]

use libfuzzer_sys::fuzz_target;
use netagent::http::parser::{parse_request, probe_request};

fuzz_target!(|data: &[u8]| {
    let _ = probe_request(data);
    let _ = parse_request(data);
});
