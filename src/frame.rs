use image::DynamicImage;
use std::path::Path;

use crate::error::DecodeError;

/// 解码后的单帧
///
/// 由处理该视频的工作线程独占，打分后即丢弃（除非它是需要写出的候选帧）。
#[derive(Debug, Clone)]
pub struct Frame {
    /// 在采样窗口内的位置（从 0 开始）
    pub index: u64,
    /// 名义时间戳（秒）= index / fps
    pub timestamp: f64,
    /// 帧图像（RGB24）
    pub image: DynamicImage,
}

impl Frame {
    pub fn new(index: u64, fps: f64, image: DynamicImage) -> Self {
        let fps = if fps > 0.0 { fps } else { DEFAULT_FPS };
        Self {
            index,
            timestamp: index as f64 / fps,
            image,
        }
    }
}

/// 容器未声明帧率时使用的名义帧率
pub const DEFAULT_FPS: f64 = 30.0;

/// 帧来源：为单个视频打开一个惰性、只进、有上限的帧序列
///
/// 生产环境使用 [`crate::FfmpegSource`]；重新调用 `open` 会从头重新解码。
pub trait FrameSource: Send + Sync + 'static {
    type Frames: Iterator<Item = Result<Frame, DecodeError>>;

    fn open(&self, path: &Path, max_frames: usize) -> Result<Self::Frames, DecodeError>;
}
