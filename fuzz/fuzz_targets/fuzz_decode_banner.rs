#![no_main]
use libfuzzer_sys::fuzz_target;
use hasshcap::ssh::{BannerDecode, decode_banner, decode_kexinit, decode_packet_header};

fuzz_target!(|data: &[u8]| {
    if let BannerDecode::Complete { record, consumed } = decode_banner(data) {
        assert!(consumed <= data.len());
        let _ = (record.proto_version(), record.software(), record.comments());
    }
    if let Ok(header) = decode_packet_header(data)
        && header.validate().is_ok()
        && data.len() >= header.frame_len()
    {
        let _ = decode_kexinit(&data[5..header.frame_len()], header.padding_length);
    }
});
