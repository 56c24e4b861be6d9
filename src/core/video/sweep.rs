//! 阈值扫描
//!
//! One decode+score pass with retention disabled writes every candidate into a
//! reference directory and logs every score. Each threshold is then a cheap
//! replay of the score log: the retained keys are copied from the reference
//! directory into `threshold_{t}`. Every run clears the keyframes a previous
//! run left in those directories, so each one holds exactly its report.

use super::config::{ExtractionConfig, RetentionPolicy, SweepConfig};
use super::diagnostics::{Diagnostics, LogDiagnostics};
use super::error::Result;
use super::pipeline::{CancellationToken, ExtractionPipeline, ExtractionReport};
use super::score_cache::{retained_keys, JsonlScoreLog, ScoreStore, SimilarityRecord};
use super::sink::DirectorySink;
use super::source::FrameSource;
use log::info;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 参考集目录名
pub const REFERENCE_DIR: &str = "all_frames";

/// 相似度日志文件名
pub const SCORE_LOG_FILE: &str = "similarity_scores.jsonl";

pub fn threshold_dir_name(threshold: f64) -> String {
    format!("threshold_{}", threshold)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutput {
    pub threshold: f64,
    pub directory: PathBuf,
    /// 已复制的 key（升序）
    pub retained: Vec<String>,
    /// 日志里有记录但参考集中没有文件的 key
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// 重放已有日志时为 None
    pub extraction: Option<ExtractionReport>,
    pub reference_dir: PathBuf,
    pub score_log: PathBuf,
    pub records: usize,
    pub outputs: Vec<ThresholdOutput>,
}

impl SweepReport {
    pub fn output_for(&self, threshold: f64) -> Option<&ThresholdOutput> {
        self.outputs.iter().find(|o| o.threshold == threshold)
    }
}

pub struct ThresholdSweep {
    pipeline: ExtractionPipeline,
    sweep: SweepConfig,
    diagnostics: Arc<dyn Diagnostics>,
}

impl ThresholdSweep {
    pub fn new(config: ExtractionConfig, sweep: SweepConfig) -> Result<Self> {
        sweep.normalized()?;
        Ok(Self {
            pipeline: ExtractionPipeline::new(config)?,
            sweep,
            diagnostics: Arc::new(LogDiagnostics::default()),
        })
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.pipeline = self.pipeline.with_diagnostics(Arc::clone(&diagnostics));
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.pipeline = self.pipeline.with_cancellation(cancel);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.pipeline.cancellation_token()
    }

    /// 解码一次，按每个阈值输出
    pub fn run(&self, source: &mut dyn FrameSource, root: &Path) -> Result<SweepReport> {
        let thresholds = self.sweep.normalized()?;

        let reference = Arc::new(DirectorySink::recreate(root.join(REFERENCE_DIR))?);
        let log = Arc::new(JsonlScoreLog::create(root.join(SCORE_LOG_FILE))?);

        info!(
            "🔁 ThresholdSweep: reference pass into {}, {} thresholds",
            reference.root().display(),
            thresholds.len()
        );
        let extraction = self.pipeline.run_with_policy(
            source,
            RetentionPolicy::RetainAll,
            reference.clone(),
            log.clone(),
        )?;

        let records = log.read_all()?;
        let outputs = self.filter_passes(&reference, &records, &thresholds, root)?;

        Ok(SweepReport {
            extraction: Some(extraction),
            reference_dir: reference.root().to_path_buf(),
            score_log: log.path().to_path_buf(),
            records: records.len(),
            outputs,
        })
    }

    /// 不解码，直接用 root 下已有的参考集和日志重跑过滤
    pub fn replay(&self, root: &Path) -> Result<SweepReport> {
        let thresholds = self.sweep.normalized()?;
        let reference = DirectorySink::create(root.join(REFERENCE_DIR))?;
        let score_log = root.join(SCORE_LOG_FILE);
        let records = JsonlScoreLog::read_path(&score_log)?;

        let outputs = self.filter_passes(&reference, &records, &thresholds, root)?;
        Ok(SweepReport {
            extraction: None,
            reference_dir: reference.root().to_path_buf(),
            score_log,
            records: records.len(),
            outputs,
        })
    }

    fn filter_passes(
        &self,
        reference: &DirectorySink,
        records: &[SimilarityRecord],
        thresholds: &[f64],
        root: &Path,
    ) -> Result<Vec<ThresholdOutput>> {
        thresholds
            .par_iter()
            .map(|&threshold| self.filter_pass(reference, records, threshold, root))
            .collect()
    }

    fn filter_pass(
        &self,
        reference: &DirectorySink,
        records: &[SimilarityRecord],
        threshold: f64,
        root: &Path,
    ) -> Result<ThresholdOutput> {
        let target = DirectorySink::recreate(root.join(threshold_dir_name(threshold)))?;

        let mut retained = Vec::new();
        let mut missing = Vec::new();
        for key in retained_keys(records, threshold) {
            if reference.contains(&key) {
                target.copy_from(reference, &key)?;
                retained.push(key);
            } else {
                self.diagnostics.warn(&format!(
                    "⚠️ {}: scored but absent from the reference set, skipped",
                    key
                ));
                missing.push(key);
            }
        }

        self.diagnostics.info(&format!(
            "📂 threshold {}: {} of {} candidates retained",
            threshold,
            retained.len(),
            records.len()
        ));
        Ok(ThresholdOutput {
            threshold,
            directory: target.root().to_path_buf(),
            retained,
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::diagnostics::CollectingDiagnostics;
    use crate::core::video::frame::{Frame, PixelFormat};
    use crate::core::video::score_cache::MemoryScoreCache;
    use crate::core::video::sink::MemorySink;
    use crate::core::video::source::VecFrameSource;
    use std::fs;

    const SIDE: u32 = 32;

    /// 渐变底图 + 逐帧扩大的方块，相邻帧相似度高低不一
    fn scene(count: u64) -> Vec<Frame> {
        (0..count)
            .map(|i| {
                let block = (i as u32 * 3) % SIDE;
                let shift = if i % 4 == 3 { 97 } else { 0 };
                let data = (0..SIDE * SIDE)
                    .map(|p| {
                        let (x, y) = (p % SIDE, p / SIDE);
                        if x < block && y < block {
                            255
                        } else {
                            ((x * 5 + y * 3 + shift) % 256) as u8
                        }
                    })
                    .collect();
                Frame::new(SIDE, SIDE, PixelFormat::Gray8, data, i, i as f64 * 0.5)
            })
            .collect()
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig {
            sampling_fps: 2.0,
            worker_count: 3,
            poll_interval_ms: 10,
            output_prefix: "talk".to_string(),
            ..Default::default()
        }
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".jpg"))
            .map(|n| n.trim_end_matches(".jpg").to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_threshold_dir_name() {
        assert_eq!(threshold_dir_name(0.95), "threshold_0.95");
        assert_eq!(threshold_dir_name(0.9), "threshold_0.9");
    }

    #[test]
    fn test_sweep_matches_direct_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let thresholds = vec![0.95, 0.9, 0.8, 0.5];
        let sweep = ThresholdSweep::new(config(), SweepConfig::new(thresholds.clone()))
            .unwrap()
            .with_diagnostics(Arc::new(CollectingDiagnostics::new()));

        let mut source = VecFrameSource::new(scene(24), 2.0);
        let report = sweep.run(&mut source, dir.path()).unwrap();

        assert_eq!(report.outputs.len(), 4);
        assert_eq!(report.records, 23);
        assert_eq!(files_in(&report.reference_dir).len(), 23);

        for &threshold in &thresholds {
            let pipeline = ExtractionPipeline::new(ExtractionConfig {
                similarity_threshold: threshold,
                ..config()
            })
            .unwrap();
            let sink = Arc::new(MemorySink::new());
            let mut source = VecFrameSource::new(scene(24), 2.0);
            pipeline
                .run(&mut source, sink.clone(), Arc::new(MemoryScoreCache::new()))
                .unwrap();

            let output = report.output_for(threshold).unwrap();
            assert_eq!(output.retained, sink.keys(), "threshold {}", threshold);
            assert_eq!(files_in(&output.directory), sink.keys());
            assert!(output.missing.is_empty());
        }
    }

    #[test]
    fn test_lower_threshold_keeps_subset() {
        let dir = tempfile::tempdir().unwrap();
        let sweep = ThresholdSweep::new(config(), SweepConfig::default()).unwrap();
        let mut source = VecFrameSource::new(scene(16), 2.0);
        let report = sweep.run(&mut source, dir.path()).unwrap();

        let thresholds: Vec<f64> = report.outputs.iter().map(|o| o.threshold).collect();
        assert_eq!(thresholds, vec![0.95, 0.9, 0.85, 0.8, 0.75, 0.7]);

        for pair in report.outputs.windows(2) {
            for key in &pair[1].retained {
                assert!(pair[0].retained.contains(key));
            }
        }
        // 首帧只做参考，任何阈值下都不输出
        for output in &report.outputs {
            assert!(!output.retained.contains(&"talk_frame_0000_0.000s".to_string()));
        }
    }

    #[test]
    fn test_replay_without_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let first = ThresholdSweep::new(config(), SweepConfig::new(vec![0.9])).unwrap();
        let mut source = VecFrameSource::new(scene(12), 2.0);
        let first_report = first.run(&mut source, dir.path()).unwrap();

        let second = ThresholdSweep::new(config(), SweepConfig::new(vec![0.9, 0.6])).unwrap();
        let replayed = second.replay(dir.path()).unwrap();

        assert!(replayed.extraction.is_none());
        assert_eq!(replayed.records, 11);
        assert_eq!(
            replayed.output_for(0.9).unwrap().retained,
            first_report.output_for(0.9).unwrap().retained
        );
        assert!(replayed.output_for(0.6).is_some());
    }

    #[test]
    fn test_rerun_into_same_root_leaves_no_stale_frames() {
        let dir = tempfile::tempdir().unwrap();
        let thresholds = SweepConfig::new(vec![0.9, 0.5]);

        let old = ThresholdSweep::new(
            ExtractionConfig {
                output_prefix: "old".to_string(),
                ..config()
            },
            thresholds.clone(),
        )
        .unwrap();
        old.run(&mut VecFrameSource::new(scene(8), 2.0), dir.path())
            .unwrap();

        let new = ThresholdSweep::new(
            ExtractionConfig {
                output_prefix: "new".to_string(),
                ..config()
            },
            thresholds,
        )
        .unwrap();
        let report = new
            .run(&mut VecFrameSource::new(scene(3), 2.0), dir.path())
            .unwrap();

        assert_eq!(report.records, 2);
        let reference = files_in(&report.reference_dir);
        assert_eq!(reference, vec!["new_frame_0001_0.500s", "new_frame_0002_1.000s"]);
        for output in &report.outputs {
            assert_eq!(files_in(&output.directory), output.retained);
        }

        // 重放同样只留下本次的结果
        let replayed = new.replay(dir.path()).unwrap();
        for output in &replayed.outputs {
            assert_eq!(files_in(&output.directory), output.retained);
        }
    }

    #[test]
    fn test_missing_reference_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(REFERENCE_DIR)).unwrap();
        fs::write(
            dir.path().join(SCORE_LOG_FILE),
            "{\"output_key\":\"gone\",\"score\":-1.0}\n",
        )
        .unwrap();

        let diagnostics = Arc::new(CollectingDiagnostics::new());
        let sweep = ThresholdSweep::new(config(), SweepConfig::new(vec![0.9]))
            .unwrap()
            .with_diagnostics(diagnostics.clone());
        let report = sweep.replay(dir.path()).unwrap();

        let output = report.output_for(0.9).unwrap();
        assert!(output.retained.is_empty());
        assert_eq!(output.missing, vec!["gone"]);
        assert_eq!(diagnostics.count_at(log::Level::Warn), 1);
    }

    #[test]
    fn test_invalid_sweep_set_rejected() {
        assert!(ThresholdSweep::new(config(), SweepConfig::new(vec![]))
            .err()
            .unwrap()
            .is_config());
        assert!(ThresholdSweep::new(config(), SweepConfig::new(vec![1.2])).is_err());
    }
}
