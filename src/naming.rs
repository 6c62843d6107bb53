//! 输出文件命名
//!
//! 文件名只由输入决定：`slate_<hash>_<frame4>.png`，hash 为视频相对路径 SHA-1 的十六进制前缀。
//! 各工作线程无需共享计数器或加锁，重复运行得到相同的文件名。

use sha1::{Digest, Sha1};
use std::collections::HashMap;

use crate::enumerator::VideoEntry;

/// 默认的哈希前缀长度
pub const HASH_PREFIX_LEN: usize = 8;
/// 发生前缀冲突时每次加宽的长度
const HASH_WIDEN_STEP: usize = 4;

/// 相对路径的完整 SHA-1 十六进制摘要
pub fn path_digest(relative_path: &str) -> String {
    format!("{:x}", Sha1::digest(relative_path.as_bytes()))
}

/// 为一次枚举的所有视频分配文件名前缀
///
/// 默认取 8 位；若多个视频的前缀相同，则对这些视频逐步加宽，直到彼此区分（最多使用完整摘要）。
/// 整批一次性计算，与完成顺序无关。
pub fn assign_stems(entries: &[VideoEntry]) -> Vec<String> {
    let digests: Vec<String> = entries
        .iter()
        .map(|entry| path_digest(&entry.relative_path))
        .collect();
    assign_stems_from_digests(&digests)
}

fn assign_stems_from_digests(digests: &[String]) -> Vec<String> {
    let mut lengths = vec![HASH_PREFIX_LEN; digests.len()];

    loop {
        let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, digest) in digests.iter().enumerate() {
            let len = lengths[i].min(digest.len());
            groups.entry(&digest[..len]).or_default().push(i);
        }

        let mut widened = false;
        for members in groups.values().filter(|m| m.len() > 1) {
            for &i in members {
                if lengths[i] < digests[i].len() {
                    lengths[i] = (lengths[i] + HASH_WIDEN_STEP).min(digests[i].len());
                    widened = true;
                }
            }
        }

        // 完整摘要仍相同意味着相对路径相同，无需再加宽
        if !widened {
            break;
        }
    }

    digests
        .iter()
        .zip(lengths)
        .map(|(digest, len)| digest[..len.min(digest.len())].to_string())
        .collect()
}

/// 图片文件名：`slate_<stem>_<frame4>.png`
pub fn png_filename(stem: &str, frame_number: u64) -> String {
    format!("slate_{}_{:04}.png", stem, frame_number)
}
