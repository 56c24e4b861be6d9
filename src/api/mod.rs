pub mod keyframes;

pub use keyframes::KeyframeExtractor;
