#![no_main]
use libfuzzer_sys::fuzz_target;
use hasshcap::session::SessionState;

// The first byte picks a split size; the rest is fed through a retained
// buffer the way reassembly delivers it.
fuzz_target!(|data: &[u8]| {
    let Some((&split, stream)) = data.split_first() else {
        return;
    };
    let step = usize::from(split).max(1);

    let mut state = SessionState::new();
    let mut pending = Vec::new();
    for chunk in stream.chunks(step) {
        pending.extend_from_slice(chunk);
        let progress = state.feed(&pending);
        assert!(progress.consumed <= pending.len());
        match progress.retain_from(pending.len()) {
            Some(offset) => {
                pending.drain(..offset);
            }
            None => pending.clear(),
        }
    }
});
