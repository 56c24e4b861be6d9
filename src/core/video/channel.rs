//! 有界任务队列
//!
//! Fixed-capacity FIFO between the sampler and the worker pool. A full queue
//! blocks the sampler in `push`. Candidate frames are admitted against a
//! separate frame budget: `admit` blocks once `frame_limit` frames are alive
//! and resumes when the last reference to one of them is dropped. Workers may
//! finish out of order, so the frames held by live tasks do not form a single
//! chain; the budget is what bounds decoded frames in memory.
//!
//! Tasks and frames each hold a [`LiveSlot`], so the pipeline can report how
//! many of both were alive at once.

use super::error::{ExtractError, Result};
use super::frame::Frame;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 在途计数：当前值与峰值
#[derive(Debug, Default)]
pub struct LiveGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl LiveGauge {
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> LiveSlot {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        LiveSlot {
            gauge: Arc::clone(self),
        }
    }
}

struct LiveSlot {
    gauge: Arc<LiveGauge>,
}

impl Drop for LiveSlot {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 帧配额的一个名额，释放时归还
struct FramePermit {
    permits: Receiver<()>,
}

impl Drop for FramePermit {
    fn drop(&mut self) {
        let _ = self.permits.try_recv();
    }
}

/// 采样器交出的帧，最后一个引用释放时才离开帧计数
pub struct TrackedFrame {
    frame: Frame,
    // 先减计数再归还名额，计数不会越过上限
    _slot: Option<LiveSlot>,
    _permit: Option<FramePermit>,
}

impl From<Frame> for TrackedFrame {
    /// 不计数，不占名额
    fn from(frame: Frame) -> Self {
        Self {
            frame,
            _slot: None,
            _permit: None,
        }
    }
}

impl Deref for TrackedFrame {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

pub type SharedFrame = Arc<TrackedFrame>;

/// 一次比较：参考帧（上一个候选）与当前候选，两帧缺一不可
pub struct ComparisonTask {
    pub reference: SharedFrame,
    pub candidate: SharedFrame,
    pub output_key: String,
    pub threshold: f64,
    slot: Option<LiveSlot>,
}

impl ComparisonTask {
    pub fn new(
        reference: SharedFrame,
        candidate: SharedFrame,
        output_key: String,
        threshold: f64,
    ) -> Self {
        Self {
            reference,
            candidate,
            output_key,
            threshold,
            slot: None,
        }
    }
}

pub enum WorkItem {
    Task(ComparisonTask),
    Shutdown,
}

pub enum Poll {
    Item(WorkItem),
    /// 超时，调用方借此检查取消标志
    Empty,
    /// 发送端已全部释放
    Closed,
}

/// 任务数从入队前一刻算到 worker 丢弃任务；帧数从 admit 算到最后一个引用释放
#[derive(Debug, Clone, Default)]
pub struct ChannelGauges {
    pub tasks: Arc<LiveGauge>,
    pub frames: Arc<LiveGauge>,
}

#[derive(Clone)]
pub struct TaskSender {
    tx: Sender<WorkItem>,
    permit_tx: Sender<()>,
    permit_rx: Receiver<()>,
    gauges: ChannelGauges,
}

impl TaskSender {
    /// 候选帧进入计数；配额用尽时阻塞
    pub fn admit(&self, frame: Frame) -> Result<SharedFrame> {
        self.permit_tx.send(()).map_err(|_| ExtractError::Channel)?;
        let permit = FramePermit {
            permits: self.permit_rx.clone(),
        };
        Ok(Arc::new(TrackedFrame {
            frame,
            _slot: Some(self.gauges.frames.enter()),
            _permit: Some(permit),
        }))
    }

    /// 阻塞直到队列有空位
    pub fn push(&self, mut task: ComparisonTask) -> Result<()> {
        task.slot = Some(self.gauges.tasks.enter());
        self.tx
            .send(WorkItem::Task(task))
            .map_err(|_| ExtractError::Channel)
    }

    pub fn shutdown(&self, workers: usize) -> Result<()> {
        for _ in 0..workers {
            self.tx
                .send(WorkItem::Shutdown)
                .map_err(|_| ExtractError::Channel)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct TaskReceiver {
    rx: Receiver<WorkItem>,
}

impl TaskReceiver {
    pub fn pop(&self, timeout: Duration) -> Poll {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Poll::Item(item),
            Err(RecvTimeoutError::Timeout) => Poll::Empty,
            Err(RecvTimeoutError::Disconnected) => Poll::Closed,
        }
    }
}

/// `frame_limit` 至少为 2：采样器手里的参考帧加上正在 admit 的候选
pub fn task_channel(
    capacity: usize,
    frame_limit: usize,
) -> (TaskSender, TaskReceiver, ChannelGauges) {
    let (tx, rx) = bounded(capacity);
    let (permit_tx, permit_rx) = bounded(frame_limit.max(2));
    let gauges = ChannelGauges::default();
    (
        TaskSender {
            tx,
            permit_tx,
            permit_rx,
            gauges: gauges.clone(),
        },
        TaskReceiver { rx },
        gauges,
    )
}
