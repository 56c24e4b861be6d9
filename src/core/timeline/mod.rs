pub mod assign;
pub mod timestamp;

pub use assign::{CaptionAssignment, CaptionSpan, FrameBucket, KeyframeIndex};
pub use timestamp::{format_vtt_timestamp, parse_vtt_timestamp, OutputKey};
