//! 采样器（生产者）
//!
//! Reads the frame source in order, picks every `frames_per_sample`-th frame
//! as a candidate and pushes (previous, current) pairs onto the task queue.
//! The push blocks while the queue is full. A source with fewer than two
//! candidates produces no task at all.

use super::channel::{ComparisonTask, SharedFrame, TaskSender};
use super::config::RetentionPolicy;
use super::diagnostics::Diagnostics;
use super::error::{ExtractError, Result};
use super::pipeline::CancellationToken;
use super::source::FrameSource;
use crate::core::timeline::OutputKey;
use std::sync::Arc;

const PROGRESS_EVERY: u64 = 100;

/// 采样节奏
///
/// The selection mark advances by the (possibly fractional) cadence instead of
/// jumping to the selected integer index, so rounding never accumulates.
#[derive(Debug, Clone)]
pub struct CadenceState {
    frames_per_sample: f64,
    origin: f64,
    taken: u64,
    last_selected_index: Option<u64>,
}

impl CadenceState {
    pub fn new(frames_per_sample: f64) -> Result<Self> {
        if !frames_per_sample.is_finite() || frames_per_sample <= 0.0 {
            return Err(ExtractError::config(format!(
                "frames_per_sample must be positive (got {})",
                frames_per_sample
            )));
        }
        Ok(Self {
            frames_per_sample,
            origin: 0.0,
            taken: 0,
            last_selected_index: None,
        })
    }

    pub fn frames_per_sample(&self) -> f64 {
        self.frames_per_sample
    }

    pub fn last_selected_index(&self) -> Option<u64> {
        self.last_selected_index
    }

    /// 起点为 -frames_per_sample，保证第一帧一定入选
    fn mark(&self) -> f64 {
        self.origin + (self.taken as f64 - 1.0) * self.frames_per_sample
    }

    /// 每解码一帧调用一次，返回该帧是否成为候选
    pub fn offer(&mut self, index: u64) -> bool {
        let position = index as f64;
        if position - self.mark() < self.frames_per_sample {
            return false;
        }

        self.taken += 1;
        // 源跳帧时重新对齐，避免补发一串候选
        if position - self.mark() >= self.frames_per_sample {
            self.origin = position;
            self.taken = 1;
        }
        self.last_selected_index = Some(index);
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub frames_decoded: u64,
    pub candidates: u64,
    pub tasks_emitted: u64,
    pub source_errors: u64,
    pub cancelled: bool,
}

pub struct FrameSampler {
    cadence: CadenceState,
    policy: RetentionPolicy,
    prefix: String,
    tx: TaskSender,
    cancel: CancellationToken,
    diagnostics: Arc<dyn Diagnostics>,
}

impl FrameSampler {
    pub fn new(
        cadence: CadenceState,
        policy: RetentionPolicy,
        prefix: String,
        tx: TaskSender,
        cancel: CancellationToken,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            cadence,
            policy,
            prefix,
            tx,
            cancel,
            diagnostics,
        }
    }

    /// 读完整个源后给每个 worker 发一个 Shutdown；不等待 worker
    ///
    /// 第一个候选只做参考帧，直到第二个候选出现才产生任务。
    pub fn run(mut self, source: &mut dyn FrameSource, workers: usize) -> Result<SamplerStats> {
        let mut stats = SamplerStats::default();
        let mut previous: Option<SharedFrame> = None;
        let mut last_index: Option<u64> = None;
        let total = source
            .frame_count_hint()
            .map_or_else(|| "?".to_string(), |n| n.to_string());

        let outcome = loop {
            if self.cancel.is_cancelled() {
                self.diagnostics
                    .warn("sampling cancelled, no further frames will be queued");
                stats.cancelled = true;
                break Ok(());
            }

            let frame = match source.next_frame() {
                None => break Ok(()),
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    stats.source_errors += 1;
                    self.diagnostics
                        .warn(&format!("skipping unreadable frame: {}", e));
                    continue;
                }
            };
            stats.frames_decoded += 1;

            if let Some(last) = last_index {
                if frame.sequence_index <= last {
                    stats.source_errors += 1;
                    self.diagnostics.warn(&format!(
                        "frame #{} arrived after #{}, dropped",
                        frame.sequence_index, last
                    ));
                    continue;
                }
            }
            last_index = Some(frame.sequence_index);

            if !self.cadence.offer(frame.sequence_index) {
                continue;
            }
            stats.candidates += 1;

            // 帧配额用尽时在这里等 worker 释放
            let candidate = match self.tx.admit(frame) {
                Ok(candidate) => candidate,
                Err(e) => break Err(e),
            };
            if let Some(reference) = previous.take() {
                let key = OutputKey::new(
                    &self.prefix,
                    candidate.sequence_index,
                    candidate.timestamp_seconds,
                )
                .to_string();
                let task = ComparisonTask::new(
                    reference,
                    Arc::clone(&candidate),
                    key,
                    self.policy.threshold(),
                );
                if let Err(e) = self.tx.push(task) {
                    break Err(e);
                }
                stats.tasks_emitted += 1;
            }
            previous = Some(candidate);

            if stats.candidates % PROGRESS_EVERY == 0 {
                self.diagnostics.info(&format!(
                    "📊 sampled {} candidates, {}/{} frames decoded",
                    stats.candidates, stats.frames_decoded, total
                ));
            }
        };

        drop(previous);
        self.tx.shutdown(workers)?;
        outcome.map(|_| stats)
    }
}
