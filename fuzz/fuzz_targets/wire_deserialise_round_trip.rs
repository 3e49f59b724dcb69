#![no_main]
use libfuzzer_sys::fuzz_target;

use dnsshim::protocol::wire_types::Message;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut deserialised) = Message::from_octets(data) {
        // the authority and additional sections are skipped
        deserialised.header.nscount = 0;
        deserialised.header.arcount = 0;

        let serialised = deserialised.to_octets().unwrap();
        let re_deserialised = Message::from_octets(&serialised);
        assert_eq!(Ok(deserialised), re_deserialised);
    }
});
