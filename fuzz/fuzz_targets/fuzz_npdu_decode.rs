#![no_main]

use bacroute_core::encoding::reader::Reader;
use bacroute_core::Npdu;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = Reader::new(data);
    let _ = Npdu::decode(&mut reader);
});
