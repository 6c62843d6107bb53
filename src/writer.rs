use image::{DynamicImage, ImageOutputFormat};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::detector::Detection;
use crate::enumerator::VideoEntry;
use crate::error::{ScanError, ScanResult};
use crate::metadata::{DetectionResult, RunMetadata};
use crate::naming;

pub const METADATA_FILENAME: &str = "slate_metadata.json";
pub const MAPPING_FILENAME: &str = "slate_mapping.json";

/// 工作线程交给写入端的单个视频结果
#[derive(Debug)]
pub struct VideoOutcome {
    /// 枚举顺序中的位置
    pub index: usize,
    pub entry: VideoEntry,
    /// 文件名哈希前缀
    pub stem: String,
    pub detection: Detection,
}

/// 已写入输出目录下的临时文件、等待提交的输出
struct StagedFile {
    temp: TempPath,
    target: PathBuf,
    /// 暂存时目标已存在（上一次运行的输出）
    existed: bool,
}

/// 结果汇总与写入
///
/// 运行期间唯一修改结果状态的所有者：按到达顺序接收结果，图片先暂存为临时文件，
/// 全部视频处理完成、两个 JSON 都序列化成功后才统一 rename 到目标文件名。
/// 提交前失败不改动输出目录中的任何已有文件；提交中途失败只删除本次运行新建的文件。
pub struct ResultWriter {
    input_dir: PathBuf,
    output_dir: PathBuf,
    save_unconfirmed: bool,
    video_paths: Vec<String>,
    results: Vec<Option<DetectionResult>>,
    staged: Vec<StagedFile>,
    received: usize,
}

impl ResultWriter {
    pub fn new(
        input_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        entries: &[VideoEntry],
        save_unconfirmed: bool,
    ) -> ScanResult<Self> {
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir).map_err(|e| ScanError::write(output_dir, e))?;

        Ok(Self {
            input_dir: input_dir.as_ref().to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            save_unconfirmed,
            video_paths: entries.iter().map(|e| e.relative_path.clone()).collect(),
            results: vec![None; entries.len()],
            staged: Vec::new(),
            received: 0,
        })
    }

    /// 记录一个视频的结果；命中时暂存 PNG
    pub fn record(&mut self, outcome: VideoOutcome) -> ScanResult<()> {
        let result = match self.build_result(&outcome) {
            Ok(result) => result,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };
        self.received += 1;

        if result.slate_found {
            info!(
                "🎬 [{}/{}] 发现场记板: {} 第 {} 帧 (confidence: {:.2})",
                self.received,
                self.results.len(),
                result.video_path,
                result.frame_number,
                result.confidence
            );
        } else if let Some(error) = &result.error {
            warn!(
                "⚠️  [{}/{}] 处理失败: {} - {}",
                self.received,
                self.results.len(),
                result.video_path,
                error
            );
        } else {
            info!(
                "[{}/{}] 未发现场记板: {}",
                self.received,
                self.results.len(),
                result.video_path
            );
        }

        match self.results.get_mut(outcome.index) {
            Some(slot) => *slot = Some(result),
            None => warn!("忽略越界的结果序号: {}", outcome.index),
        }
        Ok(())
    }

    fn build_result(&mut self, outcome: &VideoOutcome) -> ScanResult<DetectionResult> {
        let detection = &outcome.detection;
        let found = detection.slate_found();

        let mut png_filename = None;
        if let Some(best) = &detection.best {
            if found || self.save_unconfirmed {
                if let Some(frame) = &best.frame {
                    let filename = naming::png_filename(&outcome.stem, best.index);
                    self.write_png(&filename, &frame.image)?;
                    png_filename = Some(filename);
                }
            }
        }

        Ok(DetectionResult {
            video_path: outcome.entry.relative_path.clone(),
            slate_found: found,
            confidence: detection
                .best
                .as_ref()
                .map(|b| b.score.confidence)
                .unwrap_or(0.0),
            frame_number: detection.best.as_ref().map(|b| b.index as i64).unwrap_or(-1),
            timestamp: detection.best.as_ref().map(|b| b.timestamp),
            png_filename,
            error: detection.error.as_ref().map(|e| e.to_string()),
        })
    }

    /// 提交暂存的图片和两个 JSON，返回本次运行的元数据
    pub fn finish(mut self, unreadable: &[PathBuf]) -> ScanResult<RunMetadata> {
        let videos: Vec<DetectionResult> = std::mem::take(&mut self.results)
            .into_iter()
            .zip(&self.video_paths)
            .map(|(result, video_path)| {
                result.unwrap_or_else(|| DetectionResult {
                    video_path: video_path.clone(),
                    slate_found: false,
                    confidence: 0.0,
                    frame_number: -1,
                    timestamp: None,
                    png_filename: None,
                    error: Some("未收到处理结果".to_string()),
                })
            })
            .collect();

        let metadata = RunMetadata {
            scan_date: chrono::Local::now().to_rfc3339(),
            input_folder: self.input_dir.to_string_lossy().to_string(),
            output_folder: self.output_dir.to_string_lossy().to_string(),
            total_videos_scanned: videos.len(),
            slates_found: videos.iter().filter(|v| v.slate_found).count(),
            videos,
            unreadable_paths: unreadable
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect(),
        };

        if let Err(e) = self.stage_documents(&metadata) {
            self.abort();
            return Err(e);
        }

        // 图片在前，JSON 在后
        commit(std::mem::take(&mut self.staged))?;
        info!(
            "✅ [写入] 元数据已保存: {}",
            self.output_dir.join(METADATA_FILENAME).display()
        );
        info!(
            "✅ [写入] 映射文件已保存: {}",
            self.output_dir.join(MAPPING_FILENAME).display()
        );
        Ok(metadata)
    }

    fn stage_documents(&mut self, metadata: &RunMetadata) -> ScanResult<()> {
        let metadata_json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| ScanError::write(self.output_dir.join(METADATA_FILENAME), e))?;
        let mapping_json = serde_json::to_vec_pretty(&metadata.slate_mapping())
            .map_err(|e| ScanError::write(self.output_dir.join(MAPPING_FILENAME), e))?;

        self.stage(METADATA_FILENAME, &metadata_json)?;
        self.stage(MAPPING_FILENAME, &mapping_json)
    }

    fn write_png(&mut self, filename: &str, image: &DynamicImage) -> ScanResult<()> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .map_err(|e| ScanError::write(self.output_dir.join(filename), e))?;
        self.stage(filename, &buf)?;
        debug!("💾 [写入] 已暂存图片: {}", filename);
        Ok(())
    }

    /// 写入同目录的临时文件，提交时再 rename 到目标路径
    fn stage(&mut self, filename: &str, bytes: &[u8]) -> ScanResult<()> {
        let target = self.output_dir.join(filename);
        let mut tmp = tempfile::Builder::new()
            .prefix(".slate-")
            .suffix(".tmp")
            .tempfile_in(&self.output_dir)
            .map_err(|e| ScanError::write(&target, e))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| ScanError::write(&target, e))?;

        self.staged.push(StagedFile {
            temp: tmp.into_temp_path(),
            existed: target.exists(),
            target,
        });
        Ok(())
    }

    /// 丢弃所有暂存文件，输出目录保持本次运行之前的状态
    pub fn abort(&mut self) {
        if !self.staged.is_empty() {
            debug!("清理 {} 个暂存文件", self.staged.len());
        }
        // TempPath 在 drop 时删除临时文件
        self.staged.clear();
    }
}

/// 按顺序 rename 到目标路径；失败时删除本次新建的目标文件，未提交的临时文件随 drop 删除
fn commit(staged: Vec<StagedFile>) -> ScanResult<()> {
    let mut created: Vec<PathBuf> = Vec::new();

    for StagedFile {
        temp,
        target,
        existed,
    } in staged
    {
        if let Err(e) = temp.persist(&target) {
            for path in &created {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("清理输出文件失败: {} - {}", path.display(), e);
                }
            }
            return Err(ScanError::write(&target, e.error));
        }
        if !existed {
            created.push(target);
        }
    }
    Ok(())
}
