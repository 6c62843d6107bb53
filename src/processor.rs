use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::detector::{detect_video, Detection, SlateDetector};
use crate::enumerator::{find_videos, VideoEntry};
use crate::error::{DecodeError, ScanError, ScanResult};
use crate::frame::FrameSource;
use crate::metadata::RunMetadata;
use crate::naming::assign_stems;
use crate::slate_classifier::{ClassifierConfig, SlateClassifier};
use crate::video_processor::FfmpegSource;
use crate::writer::{ResultWriter, VideoOutcome, MAPPING_FILENAME, METADATA_FILENAME};

/// 工作线程数上限；结果 channel 容量为 workers * 2，不能超过 tokio 的许可数上限
pub const MAX_WORKERS: usize = Semaphore::MAX_PERMITS / 2;

/// 扫描配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 每个视频最多检查的帧数
    pub frames: usize,
    /// 判定为场记板的置信度阈值，范围 (0,1]
    pub threshold: f64,
    /// 并行工作线程数
    pub workers: usize,
    /// 单个视频的最长处理时间（秒）
    pub video_timeout: u64,
    /// 未达阈值时也写出最佳候选帧（人工复核）
    pub save_unconfirmed: bool,
    /// Webhook URL（扫描完成后回调）
    pub webhook_url: Option<String>,
    pub classifier: ClassifierConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            frames: 60,
            threshold: 0.8,
            workers: num_cpus::get(),
            video_timeout: 300,
            save_unconfirmed: false,
            webhook_url: None,
            classifier: ClassifierConfig::default(),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> ScanResult<()> {
        if self.frames == 0 {
            return Err(ScanError::Config("frames 必须大于 0".to_string()));
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ScanError::Config(format!(
                "threshold 必须在 (0,1] 范围内: {}",
                self.threshold
            )));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ScanError::Config(format!(
                "workers 必须在 1..={} 范围内: {}",
                MAX_WORKERS, self.workers
            )));
        }
        if self.video_timeout == 0 {
            return Err(ScanError::Config("video_timeout 必须大于 0".to_string()));
        }
        self.classifier.validate().map_err(ScanError::Config)
    }
}

/// 扫描结果
#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub output_dir: PathBuf,
    pub metadata: RunMetadata,
    pub metadata_file: PathBuf,
    pub mapping_file: PathBuf,
}

/// 工作线程共享的只读上下文
struct WorkerContext<S> {
    source: S,
    classifier: SlateClassifier,
    frames: usize,
    threshold: f64,
    video_timeout: Duration,
    keep_best_frame: bool,
}

/// 使用 FFmpeg 扫描目录
pub async fn scan_folder(
    input_folder: impl AsRef<Path>,
    output_folder: impl AsRef<Path>,
    config: ScanConfig,
) -> ScanResult<ScanOutput> {
    scan_folder_with(FfmpegSource, input_folder, output_folder, config).await
}

/// 扫描目录下所有视频，查找场记板
///
/// 每个视频由一个工作线程独立处理，并发数受 `workers` 限制；单个视频失败或超时
/// 只记录到该视频的结果中。结果经 channel 交给唯一的写入端，按枚举顺序输出。
pub async fn scan_folder_with<S: FrameSource>(
    source: S,
    input_folder: impl AsRef<Path>,
    output_folder: impl AsRef<Path>,
    config: ScanConfig,
) -> ScanResult<ScanOutput> {
    let input_folder = input_folder.as_ref();
    let output_folder = output_folder.as_ref();
    config.validate()?;

    let total_start = Instant::now();
    info!("🎬 [场记板扫描] 开始扫描: {}", input_folder.display());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. 枚举视频
    let enumeration = find_videos(input_folder)?;
    let input_dir = input_folder
        .canonicalize()
        .map_err(|e| ScanError::input(input_folder, e.to_string()))?;
    let total = enumeration.entries.len();
    if total == 0 {
        warn!("⚠️  [场记板扫描] 未找到视频文件");
    } else {
        info!("✅ [场记板扫描] 找到 {} 个视频文件", total);
    }
    if !enumeration.unreadable.is_empty() {
        warn!(
            "⚠️  [场记板扫描] {} 个路径无法读取，已跳过",
            enumeration.unreadable.len()
        );
    }

    // 2. 输出目录与文件名前缀
    std::fs::create_dir_all(output_folder).map_err(|e| ScanError::write(output_folder, e))?;
    let output_dir = output_folder
        .canonicalize()
        .map_err(|e| ScanError::write(output_folder, e))?;
    let stems = assign_stems(&enumeration.entries);
    let writer = ResultWriter::new(
        &input_dir,
        &output_dir,
        &enumeration.entries,
        config.save_unconfirmed,
    )?;

    info!(
        "  • 每个视频检查帧数: {} | 阈值: {:.2} | 工作线程: {} | 单视频超时: {}秒",
        config.frames, config.threshold, config.workers, config.video_timeout
    );

    // 3. 写入端：唯一的结果所有者
    let (tx, mut rx) = mpsc::channel::<VideoOutcome>(config.workers * 2);
    let unreadable = enumeration.unreadable.clone();
    let writer_task = tokio::task::spawn_blocking(move || -> ScanResult<RunMetadata> {
        let mut writer = writer;
        while let Some(outcome) = rx.blocking_recv() {
            writer.record(outcome)?;
        }
        writer.finish(&unreadable)
    });

    // 4. 分发任务
    let scan_start = Instant::now();
    let context = Arc::new(WorkerContext {
        source,
        classifier: SlateClassifier::new(config.classifier.clone()),
        frames: config.frames,
        threshold: config.threshold,
        video_timeout: Duration::from_secs(config.video_timeout),
        keep_best_frame: config.save_unconfirmed,
    });
    let semaphore = Arc::new(Semaphore::new(config.workers));
    let mut tasks = JoinSet::new();

    for (index, (entry, stem)) in enumeration.entries.into_iter().zip(stems).enumerate() {
        if tx.is_closed() {
            // 写入端已失败，不再提交新任务
            break;
        }
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let context = context.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let detection = run_video(context, &entry).await;
            drop(permit);
            let outcome = VideoOutcome {
                index,
                entry,
                stem,
                detection,
            };
            if tx.send(outcome).await.is_err() {
                debug!("写入端已关闭，丢弃结果: {}", index);
            }
        });
    }
    drop(tx);

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("❌ [场记板扫描] 任务异常退出: {}", e);
        }
    }
    let scan_duration = scan_start.elapsed();

    // 5. 等待写入端完成
    let metadata = match writer_task.await {
        Ok(result) => result?,
        Err(e) => return Err(ScanError::write(&output_dir, format!("写入线程异常退出: {}", e))),
    };

    let total_duration = total_start.elapsed();
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "🎉 [场记板扫描] 完成！总耗时: {:.2}秒 (检测 {:.2}秒)",
        total_duration.as_secs_f64(),
        scan_duration.as_secs_f64()
    );
    info!(
        "  • 扫描视频: {} 个 | 发现场记板: {} 个",
        metadata.total_videos_scanned, metadata.slates_found
    );
    if metadata.total_videos_scanned > 0 {
        info!(
            "  • 平均每个视频耗时: {:.2}ms",
            scan_duration.as_millis() as f64 / metadata.total_videos_scanned as f64
        );
    }

    let output = ScanOutput {
        metadata_file: output_dir.join(METADATA_FILENAME),
        mapping_file: output_dir.join(MAPPING_FILENAME),
        output_dir,
        metadata,
    };

    // 调用 webhook 回调（如果配置了）
    if let Some(webhook_url) = &config.webhook_url {
        info!("⏳ [场记板扫描] 正在调用 Webhook 回调...");
        if let Err(e) = call_webhook(webhook_url, &output).await {
            warn!("⚠️  [场记板扫描] Webhook 回调失败: {:#}", e);
        } else {
            info!("✅ [场记板扫描] Webhook 回调成功");
        }
    }

    Ok(output)
}

/// 在阻塞线程上检测单个视频，超时或线程异常时转换为失败结果
async fn run_video<S: FrameSource>(context: Arc<WorkerContext<S>>, entry: &VideoEntry) -> Detection {
    let cancel = Arc::new(AtomicBool::new(false));
    let video_timeout = context.video_timeout;

    let handle = {
        let cancel = cancel.clone();
        let path = entry.absolute_path.clone();
        tokio::task::spawn_blocking(move || {
            let detector = SlateDetector::new(&context.classifier, context.threshold)
                .keep_best_frame(context.keep_best_frame);
            detect_video(&context.source, &path, context.frames, &detector, &cancel)
        })
    };

    match tokio::time::timeout(video_timeout, handle).await {
        Ok(Ok(detection)) => detection,
        Ok(Err(e)) => {
            error!("❌ [场记板扫描] 工作线程异常: {} - {}", entry.relative_path, e);
            Detection::failed(DecodeError::WorkerPanicked(e.to_string()))
        }
        Err(_) => {
            // 解码线程在下一帧之前观察到取消标志后退出并释放解码会话
            cancel.store(true, Ordering::Relaxed);
            warn!(
                "⚠️  [场记板扫描] 处理超时: {} ({} 秒)",
                entry.relative_path,
                video_timeout.as_secs()
            );
            Detection::failed(DecodeError::Timeout(video_timeout.as_secs()))
        }
    }
}

/// Webhook 回调数据结构
#[derive(Debug, serde::Serialize)]
struct WebhookPayload {
    /// 处理状态
    status: String,
    input_folder: String,
    output_folder: String,
    total_videos_scanned: usize,
    slates_found: usize,
    metadata_file: String,
    mapping_file: String,
    /// 回调时间戳
    timestamp: String,
}

/// 调用 webhook 回调
async fn call_webhook(webhook_url: &str, output: &ScanOutput) -> anyhow::Result<()> {
    let payload = WebhookPayload {
        status: "success".to_string(),
        input_folder: output.metadata.input_folder.clone(),
        output_folder: output.metadata.output_folder.clone(),
        total_videos_scanned: output.metadata.total_videos_scanned,
        slates_found: output.metadata.slates_found,
        metadata_file: output.metadata_file.to_string_lossy().to_string(),
        mapping_file: output.mapping_file.to_string_lossy().to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    let client = reqwest::Client::new();
    let response = client
        .post(webhook_url)
        .json(&payload)
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .context("Webhook 请求失败")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("Webhook 返回错误状态: {} - {}", status, error_text);
    }

    debug!("Webhook 回调成功: {}", webhook_url);
    Ok(())
}
