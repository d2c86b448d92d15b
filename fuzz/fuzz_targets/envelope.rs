#![no_main]

use libfuzzer_sys::fuzz_target;
use secsock_core::envelope::{Envelope, SubscribeDirective};
use secsock_core::InboundFrame;

fuzz_target!(|data: &[u8]| {
    // Fragment normalization and envelope classification must never panic.
    let split = data.len() / 2;
    let frame = InboundFrame::Fragments(vec![data[..split].to_vec(), data[split..].to_vec()]);
    let Some(bytes) = frame.into_bytes() else {
        return;
    };

    if let Ok(envelope) = serde_json::from_slice::<Envelope>(&bytes) {
        let _ = envelope.kind();
        let _ = SubscribeDirective::parse(&envelope.body);
        let _ = serde_json::to_vec(&envelope);
    }
});
