mod bridge;
mod decoder;

pub use bridge::{StreamBridge, events_from_message};
pub use decoder::FrameDecoder;
