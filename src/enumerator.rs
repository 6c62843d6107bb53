use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{ScanError, ScanResult};

/// 支持的视频容器扩展名（大小写不敏感）
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mxf", "mov", "avi", "mkv", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "3gp", "f4v",
    "ogv", "vob", "ts", "m2ts", "mts",
];

/// 枚举到的视频文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEntry {
    pub absolute_path: PathBuf,
    /// 相对于输入目录、以 `/` 分隔的路径
    pub relative_path: String,
}

/// 枚举结果
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    /// 按相对路径排序
    pub entries: Vec<VideoEntry>,
    /// 无法读取而跳过的路径
    pub unreadable: Vec<PathBuf>,
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// 递归查找输入目录下的所有视频文件
///
/// 不读取文件内容。输入目录不存在或不可读时返回 `ScanError::Input`；
/// 其中个别无法读取的子目录/文件只记录警告并跳过。
pub fn find_videos(root: impl AsRef<Path>) -> ScanResult<Enumeration> {
    let root = root.as_ref();
    let root = root
        .canonicalize()
        .map_err(|e| ScanError::input(root, e.to_string()))?;
    if !root.is_dir() {
        return Err(ScanError::input(&root, "不是目录"));
    }
    fs::read_dir(&root).map_err(|e| ScanError::input(&root, e.to_string()))?;

    let mut enumeration = Enumeration::default();
    let mut pending = vec![root.clone()];

    while let Some(dir) = pending.pop() {
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                warn!("⚠️  [枚举] 无法读取目录，跳过: {} - {}", dir.display(), e);
                enumeration.unreadable.push(dir);
                continue;
            }
        };

        for entry in read_dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("⚠️  [枚举] 无法读取目录项，跳过: {} - {}", dir.display(), e);
                    enumeration.unreadable.push(dir.clone());
                    continue;
                }
            };
            let path = entry.path();

            // 不跟随目录符号链接，避免循环；文件符号链接按目标类型处理
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    warn!("⚠️  [枚举] 无法获取文件类型，跳过: {} - {}", path.display(), e);
                    enumeration.unreadable.push(path);
                    continue;
                }
            };

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }

            if !is_video_file(&path) {
                continue;
            }

            if file_type.is_symlink() && !path.is_file() {
                continue;
            }

            let relative_path = relative_path_string(&root, &path);
            enumeration.entries.push(VideoEntry {
                absolute_path: path,
                relative_path,
            });
        }
    }

    enumeration
        .entries
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    enumeration.unreadable.sort();
    enumeration.unreadable.dedup();

    Ok(enumeration)
}

fn relative_path_string(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
