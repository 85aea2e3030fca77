#![no_main]

use bacroute_core::encoding::reader::Reader;
use bacroute_core::Npdu;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = Reader::new(data);
    let Ok(npdu) = Npdu::decode(&mut reader) else {
        return;
    };
    // Oversized payloads are allowed to refuse re-encoding; anything that
    // does encode must decode back to the same value.
    let Ok(bytes) = npdu.to_vec() else {
        return;
    };
    let mut reader = Reader::new(&bytes);
    let again = Npdu::decode(&mut reader).expect("re-decoding an encoded NPDU");
    assert_eq!(npdu, again);
});
