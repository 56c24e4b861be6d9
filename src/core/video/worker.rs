//! 相似度打分线程池
//!
//! A fixed set of named threads drains the task queue. Each task is scored,
//! recorded in the score store and, when the score is under the task's
//! threshold, written to the sink. Any failure (or panic) inside one task is
//! logged and counted; the worker moves on to the next task.

use super::channel::{ComparisonTask, Poll, TaskReceiver, WorkItem};
use super::diagnostics::Diagnostics;
use super::error::{ExtractError, Result};
use super::pipeline::CancellationToken;
use super::score_cache::{ScoreStore, SimilarityRecord};
use super::similarity::{self, MIN_SCORE};
use super::sink::FrameSink;
use log::{debug, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// worker 共享的协作者
pub struct WorkerContext {
    pub sink: Arc<dyn FrameSink>,
    pub scores: Arc<dyn ScoreStore>,
    pub cancel: CancellationToken,
    pub diagnostics: Arc<dyn Diagnostics>,
    pub poll_interval: Duration,
}

#[derive(Debug, Default)]
struct PoolCounters {
    scored: AtomicU64,
    retained: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub tasks_scored: u64,
    pub retained: u64,
    pub failed_tasks: u64,
    pub panicked_workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskOutcome {
    Retained(f64),
    Dropped(f64),
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn start(count: usize, rx: TaskReceiver, context: Arc<WorkerContext>) -> Result<Self> {
        let counters = Arc::new(PoolCounters::default());
        let mut workers = Vec::with_capacity(count);

        for id in 0..count {
            workers.push(Worker::spawn(
                id,
                rx.clone(),
                Arc::clone(&context),
                Arc::clone(&counters),
            )?);
        }

        info!("🧵 WorkerPool: {} workers started", count);
        Ok(Self { workers, counters })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// 等待全部 worker 退出（需先发出 Shutdown 或关闭队列）
    pub fn join(mut self) -> PoolStats {
        let mut panicked_workers = 0;
        for worker in &mut self.workers {
            if !worker.join() {
                panicked_workers += 1;
            }
        }

        PoolStats {
            tasks_scored: self.counters.scored.load(Ordering::SeqCst),
            retained: self.counters.retained.load(Ordering::SeqCst),
            failed_tasks: self.counters.failed.load(Ordering::SeqCst),
            panicked_workers,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.join();
        }
        debug!("🗑️ WorkerPool: released");
    }
}

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        rx: TaskReceiver,
        context: Arc<WorkerContext>,
        counters: Arc<PoolCounters>,
    ) -> Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("ssim-worker-{}", id))
            .spawn(move || worker_loop(id, rx, &context, &counters))?;

        Ok(Worker {
            id,
            thread: Some(thread),
        })
    }

    /// false 表示线程 panic 退出
    fn join(&mut self) -> bool {
        match self.thread.take() {
            Some(handle) => match handle.join() {
                Ok(()) => true,
                Err(_) => {
                    log::error!("❌ worker {} exited abnormally", self.id);
                    false
                }
            },
            None => true,
        }
    }
}

fn worker_loop(id: usize, rx: TaskReceiver, context: &WorkerContext, counters: &PoolCounters) {
    let mut handled = 0u64;

    loop {
        let task = match rx.pop(context.poll_interval) {
            Poll::Item(WorkItem::Task(task)) => task,
            Poll::Item(WorkItem::Shutdown) | Poll::Closed => break,
            Poll::Empty => {
                if context.cancel.is_cancelled() {
                    context
                        .diagnostics
                        .debug(&format!("worker {} idle after cancel, waiting for shutdown", id));
                }
                continue;
            }
        };
        handled += 1;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| process_task(&task, context)));
        match outcome {
            Ok(Ok(TaskOutcome::Retained(_))) => {
                counters.scored.fetch_add(1, Ordering::SeqCst);
                counters.retained.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Ok(TaskOutcome::Dropped(_))) => {
                counters.scored.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                context
                    .diagnostics
                    .error(&format!("❌ {}: task failed: {}", task.output_key, e));
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                context
                    .diagnostics
                    .error(&format!("❌ {}: task panicked", task.output_key));
            }
        }
        // 释放两帧的引用和在途计数
        drop(task);
    }

    context
        .diagnostics
        .debug(&format!("worker {} stopped after {} tasks", id, handled));
}

/// 打分、记录、按阈值写出
pub fn process_task(task: &ComparisonTask, context: &WorkerContext) -> Result<TaskOutcome> {
    let candidate = task.candidate.to_luma()?;

    let score = match task.reference.to_luma() {
        Ok(reference) => similarity::ssim(&reference, &candidate)?,
        Err(e) => {
            // 无法证明相似，按全新画面保留
            context.diagnostics.warn(&format!(
                "⚠️ {}: reference unreadable ({}), keeping candidate",
                task.output_key, e
            ));
            MIN_SCORE
        }
    };

    context.diagnostics.debug(&format!("{}: {}", task.output_key, score));
    context
        .scores
        .append(SimilarityRecord::new(task.output_key.clone(), score))?;

    if score < task.threshold {
        context
            .sink
            .write(&task.output_key, &task.candidate)
            .map_err(|e| match e {
                ExtractError::Sink { .. } => e,
                other => ExtractError::sink(task.output_key.clone(), other.to_string()),
            })?;
        Ok(TaskOutcome::Retained(score))
    } else {
        Ok(TaskOutcome::Dropped(score))
    }
}
