#![no_main]

use libfuzzer_sys::fuzz_target;
use oic_codec::message::decode_message_cbor;

fuzz_target!(|data: &[u8]| {
    let _ = decode_message_cbor(data);
});
