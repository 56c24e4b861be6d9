pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod sampler;
pub mod score_cache;
pub mod similarity;
pub mod sink;
pub mod source;
pub mod sweep;
pub mod worker;

pub use config::{ExtractionConfig, RetentionPolicy, SweepConfig, DEFAULT_SWEEP_THRESHOLDS};
pub use diagnostics::{CollectingDiagnostics, Diagnostics, LogDiagnostics};
pub use error::{ExtractError, Result};
pub use frame::{Frame, PixelFormat};
pub use pipeline::{CancellationToken, ExtractionPipeline, ExtractionReport};
pub use score_cache::{JsonlScoreLog, MemoryScoreCache, ScoreStore, SimilarityRecord};
pub use similarity::ssim;
pub use sink::{DirectorySink, FrameSink, MemorySink};
pub use source::{FrameSource, ImageSequenceSource, VecFrameSource};
pub use sweep::{SweepReport, ThresholdOutput, ThresholdSweep};
