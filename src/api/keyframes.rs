//! 关键帧提取器

use crate::core::timeline::KeyframeIndex;
use crate::core::video::sweep::SCORE_LOG_FILE;
use crate::core::video::{
    CancellationToken, Diagnostics, DirectorySink, ExtractionConfig, ExtractionPipeline,
    ExtractionReport, FrameSink, FrameSource, ImageSequenceSource, JsonlScoreLog, LogDiagnostics,
    Result, ScoreStore, SweepConfig, SweepReport, ThresholdSweep,
};
use log::info;
use std::path::Path;
use std::sync::Arc;

/// 关键帧提取器 - 相似度过滤 + 阈值扫描
///
/// ```no_run
/// use keyframe_lib::api::keyframes::KeyframeExtractor;
/// use keyframe_lib::core::video::ExtractionConfig;
///
/// let extractor = KeyframeExtractor::create(ExtractionConfig::default())?;
/// let report = extractor.extract_to_dir("frames/".as_ref(), 30.0, "keyframes/".as_ref())?;
/// println!("{} keyframes", report.retained);
/// # Ok::<(), keyframe_lib::core::video::ExtractError>(())
/// ```
pub struct KeyframeExtractor {
    config: ExtractionConfig,
    cancel: CancellationToken,
    diagnostics: Arc<dyn Diagnostics>,
}

impl KeyframeExtractor {
    /// 创建提取器，配置非法时直接返回错误
    pub fn create(config: ExtractionConfig) -> Result<Self> {
        crate::init_logging();
        config.validate()?;
        info!(
            "🎬 KeyframeExtractor: created (threshold {}, {} fps, {} workers)",
            config.similarity_threshold, config.sampling_fps, config.worker_count
        );
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
            diagnostics: Arc::new(LogDiagnostics::default()),
        })
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn pipeline(&self) -> Result<ExtractionPipeline> {
        Ok(ExtractionPipeline::new(self.config.clone())?
            .with_cancellation(self.cancel.clone())
            .with_diagnostics(Arc::clone(&self.diagnostics)))
    }

    /// 单阈值提取
    pub fn extract(
        &self,
        source: &mut dyn FrameSource,
        sink: Arc<dyn FrameSink>,
        scores: Arc<dyn ScoreStore>,
    ) -> Result<ExtractionReport> {
        self.pipeline()?.run(source, sink, scores)
    }

    /// 图片序列目录 → 关键帧目录（附带相似度日志），覆盖上一次的输出
    pub fn extract_to_dir(
        &self,
        frames_dir: &Path,
        native_fps: f64,
        output_dir: &Path,
    ) -> Result<ExtractionReport> {
        let mut source = ImageSequenceSource::open(frames_dir, native_fps)?;
        let sink = Arc::new(DirectorySink::recreate(output_dir)?);
        let scores = Arc::new(JsonlScoreLog::create(output_dir.join(SCORE_LOG_FILE))?);
        self.extract(&mut source, sink, scores)
    }

    /// 解码一次，输出每个阈值的关键帧
    pub fn sweep(
        &self,
        source: &mut dyn FrameSource,
        root: &Path,
        sweep: SweepConfig,
    ) -> Result<SweepReport> {
        ThresholdSweep::new(self.config.clone(), sweep)?
            .with_cancellation(self.cancel.clone())
            .with_diagnostics(Arc::clone(&self.diagnostics))
            .run(source, root)
    }

    /// 关键帧目录的时间索引
    pub fn index(&self, keyframes_dir: &Path) -> Result<KeyframeIndex> {
        KeyframeIndex::from_directory(keyframes_dir)
    }

    /// 停止采样；已入队的任务仍会处理完。取消后本实例的后续运行都会立即结束
    pub fn cancel(&self) {
        info!("⏹️ KeyframeExtractor: cancel requested");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for KeyframeExtractor {
    fn drop(&mut self) {
        info!("🗑️ KeyframeExtractor: released");
    }
}
