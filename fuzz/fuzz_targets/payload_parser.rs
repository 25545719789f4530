#![no_main]

use libfuzzer_sys::fuzz_target;
use vtl1mon::payload::{ImageLoadPayload, PointerWidth, SecureCallPayload, StackWalkPayload};
use vtl1mon::replay;

fuzz_target!(|data: &[u8]| {
    // Payload decoders must reject, never panic, on arbitrary bytes
    let _ = SecureCallPayload::parse(data);
    for width in [PointerWidth::Four, PointerWidth::Eight] {
        if let Some(walk) = StackWalkPayload::parse(data, width) {
            assert_eq!(walk.addresses().count(), walk.frame_count());
        }
        let _ = ImageLoadPayload::parse(data, width);
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = replay::parse_capture(text);
    }
});
