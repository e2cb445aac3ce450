#![no_main]
use libfuzzer_sys::fuzz_target;
use hasshcap::protocol::{LinkType, parse_tcp};

fuzz_target!(|data: &[u8]| {
    for link_type in [
        LinkType::Ethernet,
        LinkType::RawIp,
        LinkType::Loopback,
        LinkType::LinuxSll,
        LinkType::LinuxSll2,
    ] {
        if let Some(segment) = parse_tcp(data, link_type) {
            let _ = segment.stream_key();
        }
    }
});
