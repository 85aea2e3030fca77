#![no_main]

use bacroute_datalink::bip::bvll::BvllMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = BvllMessage::decode(data);
});
