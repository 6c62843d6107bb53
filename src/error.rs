//! 错误类型
//!
//! - `ScanError`：整个批次级别的错误（输入目录、配置、写入），会终止本次运行
//! - `DecodeError`：单个视频级别的错误，只影响该视频，记录到结果中后批次继续

use std::path::{Path, PathBuf};
use thiserror::Error;

/// 批次级别结果类型
pub type ScanResult<T> = Result<T, ScanError>;

/// 终止本次运行的错误
#[derive(Debug, Error)]
pub enum ScanError {
    /// 输入目录不存在或不可读，在任何处理开始前返回
    #[error("输入目录无效: {}: {reason}", path.display())]
    Input { path: PathBuf, reason: String },

    /// 配置校验失败
    #[error("配置无效: {0}")]
    Config(String),

    /// 图片或 JSON 无法写入输出目录
    #[error("写入失败: {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

impl ScanError {
    pub fn input(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::Input {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn write(path: impl AsRef<Path>, message: impl ToString) -> Self {
        Self::Write {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }
}

/// 单个视频的解码错误，记录到 `DetectionResult.error` 后不影响其它视频
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("无法打开视频文件: {0}")]
    Open(String),

    #[error("未找到视频流")]
    NoVideoStream,

    #[error("解码失败: {0}")]
    Decoder(String),

    #[error("未能解码出任何视频帧")]
    NoFrames,

    #[error("处理超时（{0} 秒）")]
    Timeout(u64),

    #[error("工作线程异常退出: {0}")]
    WorkerPanicked(String),

    #[error("处理已取消")]
    Cancelled,
}

impl From<ffmpeg_next::Error> for DecodeError {
    fn from(e: ffmpeg_next::Error) -> Self {
        Self::Decoder(e.to_string())
    }
}
