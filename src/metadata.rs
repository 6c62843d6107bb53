use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单个视频的检测结果（`slate_metadata.json` 中 `videos` 的元素）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// 相对于输入目录的路径
    pub video_path: String,
    pub slate_found: bool,
    pub confidence: f64,
    /// 命中/最佳帧的序号；没有候选帧时为 -1
    pub frame_number: i64,
    /// 名义时间戳（秒）；没有候选帧时为 null
    pub timestamp: Option<f64>,
    pub png_filename: Option<String>,
    /// 解码失败原因；成功时为 null
    pub error: Option<String>,
}

/// 整次运行的元数据，写入 `slate_metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// ISO-8601 扫描时间
    pub scan_date: String,
    pub input_folder: String,
    pub output_folder: String,
    pub total_videos_scanned: usize,
    pub slates_found: usize,
    /// 按枚举顺序排列
    pub videos: Vec<DetectionResult>,
    /// 枚举时无法读取而跳过的路径
    #[serde(default)]
    pub unreadable_paths: Vec<String>,
}

/// `slate_mapping.json` 中的单条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub video_path: String,
    pub frame_number: i64,
    pub timestamp: Option<f64>,
    pub confidence: f64,
}

/// 图片文件名 -> 来源视频；键有序，保证重复运行输出一致
pub type SlateMapping = BTreeMap<String, MappingEntry>;

impl RunMetadata {
    /// 只包含 `slate_found == true` 的映射视图
    pub fn slate_mapping(&self) -> SlateMapping {
        self.videos
            .iter()
            .filter(|v| v.slate_found)
            .filter_map(|v| {
                let filename = v.png_filename.clone()?;
                Some((
                    filename,
                    MappingEntry {
                        video_path: v.video_path.clone(),
                        frame_number: v.frame_number,
                        timestamp: v.timestamp,
                        confidence: v.confidence,
                    },
                ))
            })
            .collect()
    }
}
