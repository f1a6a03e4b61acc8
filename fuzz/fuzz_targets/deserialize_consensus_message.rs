#![no_main]

use benor::consensus::ConsensusMessage;
use benor::network::deserialize;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = deserialize::<ConsensusMessage>(data) {
        // anything that decodes is a well-formed message
        let _ = msg.to_string();
    }
});
