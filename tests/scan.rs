use image::{DynamicImage, ImageBuffer, Luma};
use slate_scan::naming::path_digest;
use slate_scan::{
    scan_folder_with, DecodeError, Frame, FrameSource, RunMetadata, ScanConfig, ScanError,
    SlateMapping, MAPPING_FILENAME, METADATA_FILENAME,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn black_frame(index: u64) -> Frame {
    Frame::new(
        index,
        25.0,
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(100, 100, |_, _| Luma([0u8]))),
    )
}

/// 80% 黑色、10% 白色文字、10% 灰线
fn slate_frame(index: u64) -> Frame {
    Frame::new(
        index,
        25.0,
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(100, 100, |x, y| {
            if (y % 10 == 2 || y % 10 == 3) && (2..7).contains(&(x % 10)) {
                Luma([255u8])
            } else if y % 10 == 6 {
                Luma([100u8])
            } else {
                Luma([0u8])
            }
        })),
    )
}

#[derive(Debug, Clone)]
enum Script {
    /// 全黑帧
    Black { total: u64 },
    /// 第 `at` 帧是场记板
    SlateAt { at: u64, total: u64, delay: Duration },
    /// 无法打开
    Corrupt,
    /// 打开时 panic
    Panic,
}

/// 按文件名返回合成帧序列，并记录每个视频实际解码到的帧序号
#[derive(Clone, Default)]
struct SyntheticSource {
    scripts: Arc<HashMap<String, Script>>,
    decoded: Arc<Mutex<HashMap<String, Vec<u64>>>>,
}

impl SyntheticSource {
    fn new(scripts: Vec<(&str, Script)>) -> Self {
        Self {
            scripts: Arc::new(
                scripts
                    .into_iter()
                    .map(|(name, script)| (name.to_string(), script))
                    .collect(),
            ),
            decoded: Arc::default(),
        }
    }

    fn decoded(&self, name: &str) -> Vec<u64> {
        self.decoded
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl FrameSource for SyntheticSource {
    type Frames = Box<dyn Iterator<Item = Result<Frame, DecodeError>>>;

    fn open(&self, path: &Path, max_frames: usize) -> Result<Self::Frames, DecodeError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let script = self
            .scripts
            .get(&name)
            .cloned()
            .unwrap_or(Script::Black { total: 10 });

        let (slate_at, total, delay) = match script {
            Script::Black { total } => (None, total, Duration::ZERO),
            Script::SlateAt { at, total, delay } => (Some(at), total, delay),
            Script::Corrupt => return Err(DecodeError::Open("moov atom not found".to_string())),
            Script::Panic => panic!("decoder crashed on {}", name),
        };

        let decoded = self.decoded.clone();
        let limit = total.min(max_frames as u64);
        Ok(Box::new((0..limit).map(move |i| {
            std::thread::sleep(delay);
            decoded
                .lock()
                .unwrap()
                .entry(name.clone())
                .or_default()
                .push(i);
            if Some(i) == slate_at {
                Ok(slate_frame(i))
            } else {
                Ok(black_frame(i))
            }
        })))
    }
}

fn corpus(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        let path = dir.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"synthetic").unwrap();
    }
    dir
}

fn config(threshold: f64) -> ScanConfig {
    ScanConfig {
        threshold,
        workers: 4,
        video_timeout: 30,
        ..ScanConfig::default()
    }
}

fn read_mapping(output: &Path) -> SlateMapping {
    serde_json::from_slice(&std::fs::read(output.join(MAPPING_FILENAME)).unwrap()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_black_video_never_finds_slate() {
    let input = corpus(&["black.mp4"]);
    let out = tempfile::tempdir().unwrap();

    for threshold in [0.01, 0.5, 1.0] {
        let source = SyntheticSource::new(vec![("black.mp4", Script::Black { total: 10 })]);
        let output = scan_folder_with(source.clone(), input.path(), out.path(), config(threshold))
            .await
            .unwrap();

        let video = &output.metadata.videos[0];
        assert!(!video.slate_found);
        assert_eq!(video.frame_number, -1);
        assert!(video.png_filename.is_none());
        assert!(video.error.is_none());
        assert_eq!(source.decoded("black.mp4").len(), 10);
    }
    assert!(read_mapping(out.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slate_at_frame_three_exits_early() {
    let input = corpus(&["reel/a001.mov"]);
    let out = tempfile::tempdir().unwrap();
    let source = SyntheticSource::new(vec![(
        "a001.mov",
        Script::SlateAt {
            at: 3,
            total: 60,
            delay: Duration::ZERO,
        },
    )]);

    let output = scan_folder_with(source.clone(), input.path(), out.path(), config(0.8))
        .await
        .unwrap();

    let video = &output.metadata.videos[0];
    assert!(video.slate_found);
    assert_eq!(video.video_path, "reel/a001.mov");
    assert_eq!(video.frame_number, 3);
    assert!((video.timestamp.unwrap() - 3.0 / 25.0).abs() < 1e-9);
    assert!(video.confidence >= 0.8 && video.confidence <= 1.0);

    // 命中后不再解码后续帧
    assert_eq!(source.decoded("a001.mov"), vec![0, 1, 2, 3]);

    let expected = format!("slate_{}_0003.png", &path_digest("reel/a001.mov")[..8]);
    assert_eq!(video.png_filename.as_deref(), Some(expected.as_str()));
    assert!(out.path().join(&expected).is_file());

    let mapping = read_mapping(out.path());
    assert_eq!(mapping.len(), 1);
    assert_eq!(mapping[&expected].frame_number, 3);
    assert_eq!(output.metadata.slates_found, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_file_is_recorded_and_batch_continues() {
    let input = corpus(&["bad.mxf", "good.mp4"]);
    let out = tempfile::tempdir().unwrap();
    let source = SyntheticSource::new(vec![
        ("bad.mxf", Script::Corrupt),
        (
            "good.mp4",
            Script::SlateAt {
                at: 0,
                total: 5,
                delay: Duration::ZERO,
            },
        ),
    ]);

    let output = scan_folder_with(source, input.path(), out.path(), config(0.8))
        .await
        .unwrap();

    assert_eq!(output.metadata.total_videos_scanned, 2);
    assert_eq!(output.metadata.slates_found, 1);
    let bad = &output.metadata.videos[0];
    assert_eq!(bad.video_path, "bad.mxf");
    assert!(!bad.slate_found);
    assert!(bad.error.as_deref().unwrap().contains("moov atom not found"));
    assert!(output.metadata.videos[1].slate_found);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_worker_does_not_abort_batch() {
    let input = corpus(&["crash.avi", "fine.mkv"]);
    let out = tempfile::tempdir().unwrap();
    let source = SyntheticSource::new(vec![
        ("crash.avi", Script::Panic),
        (
            "fine.mkv",
            Script::SlateAt {
                at: 1,
                total: 5,
                delay: Duration::ZERO,
            },
        ),
    ]);

    let output = scan_folder_with(source, input.path(), out.path(), config(0.8))
        .await
        .unwrap();

    let crash = &output.metadata.videos[0];
    assert_eq!(crash.video_path, "crash.avi");
    assert!(!crash.slate_found);
    assert!(crash.error.is_some());
    assert!(output.metadata.videos[1].slate_found);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_video_times_out_and_stops_decoding() {
    let input = corpus(&["hung.ts", "quick.mp4"]);
    let out = tempfile::tempdir().unwrap();
    let source = SyntheticSource::new(vec![
        (
            "hung.ts",
            Script::SlateAt {
                at: 59,
                total: 60,
                delay: Duration::from_millis(200),
            },
        ),
        (
            "quick.mp4",
            Script::SlateAt {
                at: 2,
                total: 10,
                delay: Duration::ZERO,
            },
        ),
    ]);
    let config = ScanConfig {
        video_timeout: 1,
        ..config(0.8)
    };

    let output = scan_folder_with(source.clone(), input.path(), out.path(), config)
        .await
        .unwrap();

    let hung = &output.metadata.videos[0];
    assert_eq!(hung.video_path, "hung.ts");
    assert!(!hung.slate_found);
    assert_eq!(
        hung.error.as_deref(),
        Some(DecodeError::Timeout(1).to_string().as_str())
    );
    assert!(output.metadata.videos[1].slate_found);

    // 取消标志生效后不再继续解码
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(source.decoded("hung.ts").len() < 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn results_follow_enumeration_order_and_rerun_is_stable() {
    let names = ["d.mp4", "a.mp4", "c/b.mp4", "b.mp4", "e.mov"];
    let input = corpus(&names);
    let out = tempfile::tempdir().unwrap();

    // 排在前面的视频处理得更慢，完成顺序与枚举顺序相反
    let scripts = vec![
        ("a.mp4", Script::SlateAt { at: 4, total: 10, delay: Duration::from_millis(40) }),
        ("b.mp4", Script::SlateAt { at: 4, total: 10, delay: Duration::from_millis(20) }),
        ("d.mp4", Script::Black { total: 10 }),
        ("e.mov", Script::SlateAt { at: 0, total: 10, delay: Duration::ZERO }),
    ];

    let first = scan_folder_with(
        SyntheticSource::new(scripts.clone()),
        input.path(),
        out.path(),
        config(0.8),
    )
    .await
    .unwrap();
    let first_mapping = std::fs::read(out.path().join(MAPPING_FILENAME)).unwrap();

    let order: Vec<&str> = first
        .metadata
        .videos
        .iter()
        .map(|v| v.video_path.as_str())
        .collect();
    assert_eq!(order, vec!["a.mp4", "b.mp4", "c/b.mp4", "d.mp4", "e.mov"]);

    let second = scan_folder_with(
        SyntheticSource::new(scripts),
        input.path(),
        out.path(),
        config(0.8),
    )
    .await
    .unwrap();
    let second_mapping = std::fs::read(out.path().join(MAPPING_FILENAME)).unwrap();

    assert_eq!(first_mapping, second_mapping);
    assert_eq!(first.metadata.videos, second.metadata.videos);

    let on_disk: RunMetadata =
        serde_json::from_slice(&std::fs::read(out.path().join(METADATA_FILENAME)).unwrap())
            .unwrap();
    assert_eq!(on_disk.videos, second.metadata.videos);
    assert_eq!(on_disk.total_videos_scanned, 5);
    // c/b.mp4 与 b.mp4 同名，按文件名匹配脚本，也在第 4 帧命中
    assert_eq!(on_disk.slates_found, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn filenames_unique_across_similar_paths() {
    let names: Vec<String> = (0..200).map(|i| format!("cam/clip_{:03}.mp4", i)).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let input = corpus(&name_refs);
    let out = tempfile::tempdir().unwrap();

    let scripts: Vec<(&str, Script)> = names
        .iter()
        .map(|n| {
            (
                &n[4..],
                Script::SlateAt {
                    at: 0,
                    total: 3,
                    delay: Duration::ZERO,
                },
            )
        })
        .collect();

    let output = scan_folder_with(
        SyntheticSource::new(scripts),
        input.path(),
        out.path(),
        config(0.8),
    )
    .await
    .unwrap();

    assert_eq!(output.metadata.slates_found, 200);
    let mapping = read_mapping(out.path());
    assert_eq!(mapping.len(), 200);
    let pngs = std::fs::read_dir(out.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .is_some_and(|ext| ext == "png")
        })
        .count();
    assert_eq!(pngs, 200);
}

#[tokio::test]
async fn missing_input_folder_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let result = scan_folder_with(
        SyntheticSource::default(),
        dir.path().join("missing"),
        &out,
        config(0.8),
    )
    .await;

    assert!(matches!(result, Err(ScanError::Input { .. })));
    assert!(!out.exists());
}

#[tokio::test]
async fn invalid_threshold_is_rejected_before_scanning() {
    let input = corpus(&["a.mp4"]);
    let out = tempfile::tempdir().unwrap();

    let result = scan_folder_with(
        SyntheticSource::default(),
        input.path(),
        out.path().join("never"),
        config(1.5),
    )
    .await;

    assert!(matches!(result, Err(ScanError::Config(_))));
    assert!(!out.path().join("never").exists());
}

#[tokio::test]
async fn empty_folder_writes_empty_documents() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let output = scan_folder_with(SyntheticSource::default(), input.path(), out.path(), config(0.8))
        .await
        .unwrap();

    assert_eq!(output.metadata.total_videos_scanned, 0);
    assert!(output.metadata_file.is_file());
    assert!(read_mapping(out.path()).is_empty());
}

/// 接收一次 HTTP 请求，返回指定状态码，并交回请求体
async fn webhook_receiver(status: u16) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/hook", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let body = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the request was complete");
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..end]).to_string();
            let length = headers
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break String::from_utf8(buf[end + 4..end + 4 + length].to_vec()).unwrap();
            }
        };

        let response = format!(
            "HTTP/1.1 {} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            status
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        body
    });

    (url, handle)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn webhook_error_status_does_not_fail_scan() {
    let input = corpus(&["a.mp4"]);
    let out = tempfile::tempdir().unwrap();
    let source = SyntheticSource::new(vec![(
        "a.mp4",
        Script::SlateAt {
            at: 0,
            total: 5,
            delay: Duration::ZERO,
        },
    )]);
    let (url, received) = webhook_receiver(500).await;
    let config = ScanConfig {
        webhook_url: Some(url),
        ..config(0.8)
    };

    let output = scan_folder_with(source, input.path(), out.path(), config)
        .await
        .unwrap();
    assert_eq!(output.metadata.slates_found, 1);

    let payload: serde_json::Value = serde_json::from_str(&received.await.unwrap()).unwrap();
    assert_eq!(payload["status"], "success");
    assert_eq!(payload["total_videos_scanned"], 1);
    assert_eq!(payload["slates_found"], 1);
    assert_eq!(
        payload["metadata_file"].as_str().unwrap(),
        output.metadata_file.to_string_lossy()
    );
    assert_eq!(
        payload["mapping_file"].as_str().unwrap(),
        output.mapping_file.to_string_lossy()
    );
    assert_eq!(payload["output_folder"], output.metadata.output_folder.as_str());
    assert!(payload["timestamp"].as_str().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_webhook_does_not_fail_scan() {
    let input = corpus(&["a.mp4"]);
    let out = tempfile::tempdir().unwrap();

    // 绑定后立即释放端口，连接会被拒绝
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/hook", listener.local_addr().unwrap());
    drop(listener);

    let config = ScanConfig {
        webhook_url: Some(url),
        ..config(0.8)
    };
    let output = scan_folder_with(SyntheticSource::default(), input.path(), out.path(), config)
        .await
        .unwrap();

    assert_eq!(output.metadata.total_videos_scanned, 1);
    assert!(output.metadata_file.is_file());
}
