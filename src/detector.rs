use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::frame::{Frame, FrameSource};
use crate::slate_classifier::{ClassificationScore, SlateClassifier};

/// 单个视频的检测状态：SCANNING -> FOUND 或 SCANNING -> EXHAUSTED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Scanning,
    Found,
    Exhausted,
}

/// 迄今最佳的候选帧
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: u64,
    pub timestamp: f64,
    pub score: ClassificationScore,
    /// 仅在需要写出图片时保留像素数据
    pub frame: Option<Frame>,
}

/// 单个视频的检测结果
#[derive(Debug, Clone)]
pub struct Detection {
    pub state: DetectorState,
    /// FOUND 时为命中帧；EXHAUSTED 时为置信度最高（同分取最早）的帧，没有正分帧则为 None
    pub best: Option<Candidate>,
    pub frames_decoded: u64,
    pub error: Option<DecodeError>,
}

impl Detection {
    /// 打开失败或工作线程异常时的结果
    pub fn failed(error: DecodeError) -> Self {
        Self {
            state: DetectorState::Exhausted,
            best: None,
            frames_decoded: 0,
            error: Some(error),
        }
    }

    pub fn slate_found(&self) -> bool {
        self.state == DetectorState::Found
    }
}

/// 单视频检测器：驱动帧采样 + 分类，首个达到阈值的帧立即返回
pub struct SlateDetector<'a> {
    classifier: &'a SlateClassifier,
    threshold: f64,
    keep_best_frame: bool,
}

impl<'a> SlateDetector<'a> {
    pub fn new(classifier: &'a SlateClassifier, threshold: f64) -> Self {
        Self {
            classifier,
            threshold,
            keep_best_frame: false,
        }
    }

    /// 未达阈值时也保留最佳候选帧的像素（用于人工复核时写出图片）
    pub fn keep_best_frame(mut self, keep: bool) -> Self {
        self.keep_best_frame = keep;
        self
    }

    /// 按帧序号依次打分
    ///
    /// 命中后不再从 `frames` 拉取任何帧；`cancel` 在每次拉取前检查。
    pub fn run<I>(&self, frames: I, cancel: &AtomicBool) -> Detection
    where
        I: IntoIterator<Item = Result<Frame, DecodeError>>,
    {
        let mut state = DetectorState::Scanning;
        let mut best: Option<Candidate> = None;
        let mut frames_decoded = 0u64;
        let mut error = None;
        let mut frames = frames.into_iter();

        while state == DetectorState::Scanning {
            if cancel.load(Ordering::Relaxed) {
                error = Some(DecodeError::Cancelled);
                state = DetectorState::Exhausted;
                break;
            }

            let frame = match frames.next() {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    error = Some(e);
                    state = DetectorState::Exhausted;
                    break;
                }
                None => {
                    state = DetectorState::Exhausted;
                    break;
                }
            };
            frames_decoded += 1;

            let score = self.classifier.classify(&frame);
            debug!(
                "帧 {}: confidence={:.3} black={:.3} white={:.3} edge={}",
                frame.index,
                score.confidence,
                score.black_ratio,
                score.white_ratio,
                score
                    .edge_score
                    .map_or_else(|| "-".to_string(), |e| format!("{:.3}", e))
            );

            if score.confidence >= self.threshold {
                best = Some(Candidate {
                    index: frame.index,
                    timestamp: frame.timestamp,
                    score,
                    frame: Some(frame),
                });
                state = DetectorState::Found;
            } else if score.confidence > 0.0
                && best
                    .as_ref()
                    .map_or(true, |b| score.confidence > b.score.confidence)
            {
                // 严格大于：同分时保留更早的帧
                best = Some(Candidate {
                    index: frame.index,
                    timestamp: frame.timestamp,
                    score,
                    frame: self.keep_best_frame.then_some(frame),
                });
            }
        }

        Detection {
            state,
            best,
            frames_decoded,
            error,
        }
    }
}

/// 打开视频并运行检测；打开失败转换为带错误原因的结果
pub fn detect_video<S: FrameSource + ?Sized>(
    source: &S,
    path: &Path,
    max_frames: usize,
    detector: &SlateDetector<'_>,
    cancel: &AtomicBool,
) -> Detection {
    let start = Instant::now();
    let detection = match source.open(path, max_frames) {
        Ok(frames) => detector.run(frames, cancel),
        Err(e) => {
            warn!("⚠️  [检测] 无法打开视频 {}: {}", path.display(), e);
            return Detection::failed(e);
        }
    };

    debug!(
        "[检测] {} -> {:?}，解码 {} 帧，耗时 {:.2}秒",
        path.display(),
        detection.state,
        detection.frames_decoded,
        start.elapsed().as_secs_f64()
    );
    detection
}
