//! 流水线控制器
//!
//! Owns one extraction run end to end: validates the configuration, starts the
//! worker pool, drives the sampler on the calling thread until the source is
//! exhausted (or cancelled), then waits for the pool to drain.

use super::channel::task_channel;
use super::config::{ExtractionConfig, RetentionPolicy};
use super::diagnostics::{Diagnostics, LogDiagnostics};
use super::error::Result;
use super::sampler::{CadenceState, FrameSampler};
use super::score_cache::ScoreStore;
use super::sink::FrameSink;
use super::source::FrameSource;
use super::worker::{WorkerContext, WorkerPool};
use log::info;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 跨线程共享的取消标志
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 一次运行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionReport {
    pub frames_decoded: u64,
    pub candidates: u64,
    pub tasks_scored: u64,
    pub retained: u64,
    pub failed_tasks: u64,
    pub source_errors: u64,
    /// 同一时刻存活的任务数峰值
    pub peak_pending_tasks: usize,
    /// 同一时刻内存中的候选帧数峰值，不超过 capacity + workers + 1
    pub peak_live_frames: usize,
    pub cancelled: bool,
}

pub struct ExtractionPipeline {
    config: ExtractionConfig,
    cancel: CancellationToken,
    diagnostics: Arc<dyn Diagnostics>,
}

impl ExtractionPipeline {
    /// 配置错误在这里直接返回，不会触碰任何帧
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        config.validate()?;
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

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 按配置的阈值直接提取
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        sink: Arc<dyn FrameSink>,
        scores: Arc<dyn ScoreStore>,
    ) -> Result<ExtractionReport> {
        self.run_with_policy(
            source,
            RetentionPolicy::Threshold(self.config.similarity_threshold),
            sink,
            scores,
        )
    }

    pub fn run_with_policy(
        &self,
        source: &mut dyn FrameSource,
        policy: RetentionPolicy,
        sink: Arc<dyn FrameSink>,
        scores: Arc<dyn ScoreStore>,
    ) -> Result<ExtractionReport> {
        let config = &self.config;
        config.validate()?;
        let cadence = CadenceState::new(config.frames_per_sample(source.native_fps())?)?;

        info!(
            "🚀 ExtractionPipeline: {} workers, capacity {}, one candidate every {:.3} frames ({:?})",
            config.worker_count,
            config.effective_capacity(),
            cadence.frames_per_sample(),
            policy
        );
        let started = Instant::now();

        let (tx, rx, gauges) =
            task_channel(config.effective_capacity(), config.max_live_frames());
        let context = Arc::new(WorkerContext {
            sink,
            scores,
            cancel: self.cancel.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
            poll_interval: config.poll_interval(),
        });
        let pool = WorkerPool::start(config.worker_count, rx, context)?;

        let sampler = FrameSampler::new(
            cadence,
            policy,
            config.output_prefix.clone(),
            tx,
            self.cancel.clone(),
            Arc::clone(&self.diagnostics),
        );
        // sampler 返回时发送端已释放，worker 必然能退出
        let sampled = sampler.run(source, pool.size());
        let pool_stats = pool.join();
        let sampled = sampled?;

        if pool_stats.panicked_workers > 0 {
            self.diagnostics.error(&format!(
                "{} workers exited abnormally",
                pool_stats.panicked_workers
            ));
        }

        let report = ExtractionReport {
            frames_decoded: sampled.frames_decoded,
            candidates: sampled.candidates,
            tasks_scored: pool_stats.tasks_scored,
            retained: pool_stats.retained,
            failed_tasks: pool_stats.failed_tasks,
            source_errors: sampled.source_errors,
            peak_pending_tasks: gauges.tasks.peak(),
            peak_live_frames: gauges.frames.peak(),
            cancelled: sampled.cancelled,
        };

        self.diagnostics.info(&format!(
            "✅ extraction done in {:.2?}: {} frames, {} candidates, {} retained, {} failed, peak {} pending / {} frames live",
            started.elapsed(),
            report.frames_decoded,
            report.candidates,
            report.retained,
            report.failed_tasks,
            report.peak_pending_tasks,
            report.peak_live_frames
        ));
        Ok(report)
    }
}
