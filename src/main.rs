use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use slate_scan::{scan_folder, CliOverrides, ConfigLoader, ScanOutput};

/// 场记板扫描工具 - 在视频开头查找黑底白字的场记板并导出为 PNG
#[derive(Parser, Debug)]
#[command(name = "slate-scan")]
#[command(about = "场记板扫描工具：递归扫描视频目录，导出场记板图片和元数据", long_about = None)]
struct Args {
    /// 输入目录（递归查找视频文件）
    #[arg(required_unless_present = "init_config")]
    input_folder: Option<PathBuf>,

    /// 输出目录（PNG 图片和元数据）
    #[arg(short, long, default_value = "./slate_output")]
    output: PathBuf,

    /// 每个视频检查的帧数（默认 60）
    /// 可通过环境变量 SLATE_SCAN_FRAMES 或配置文件设置
    #[arg(short, long)]
    frames: Option<usize>,

    /// 场记板置信度阈值 (0-1]，默认 0.8
    /// 可通过环境变量 SLATE_SCAN_THRESHOLD 或配置文件设置
    #[arg(short, long)]
    threshold: Option<f64>,

    /// 并行工作线程数（默认 CPU 核数）
    /// 可通过环境变量 SLATE_SCAN_WORKERS 或配置文件设置
    #[arg(short, long)]
    workers: Option<usize>,

    /// 单个视频的最长处理时间（秒，默认 300）
    #[arg(long)]
    video_timeout: Option<u64>,

    /// 未达阈值时也导出最佳候选帧，供人工复核
    #[arg(long)]
    save_unconfirmed: bool,

    /// 扫描完成后回调的 Webhook URL
    /// 可通过环境变量 SLATE_SCAN_WEBHOOK_URL 或配置文件设置
    #[arg(long)]
    webhook_url: Option<String>,

    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long)]
    config: Option<PathBuf>,

    /// 生成默认配置文件后退出
    #[arg(long, value_name = "PATH")]
    init_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.init_config {
        ConfigLoader::create_default_config(path)?;
        println!("已生成默认配置文件: {}", path.display());
        return Ok(());
    }

    let overrides = CliOverrides {
        frames: args.frames,
        threshold: args.threshold,
        workers: args.workers,
        video_timeout: args.video_timeout,
        save_unconfirmed: args.save_unconfirmed.then_some(true),
        webhook_url: args.webhook_url.clone(),
    };
    let config = ConfigLoader::load_config(args.config.as_deref(), &overrides)
        .context("加载配置失败")?;

    // 初始化日志
    let level = config.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let input_folder = args
        .input_folder
        .context("缺少输入目录参数")?;

    println!(
        "使用配置: frames={}, threshold={:.2}, workers={}, video_timeout={}s",
        config.scan.frames, config.scan.threshold, config.scan.workers, config.scan.video_timeout
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("创建 tokio 运行时失败")?;
    let result = runtime.block_on(scan_folder(&input_folder, &args.output, config.scan));
    // 超时的解码线程不阻塞进程退出
    runtime.shutdown_timeout(Duration::from_secs(5));

    let output = result.context("扫描失败")?;
    print_summary(&output);

    Ok(())
}

fn print_summary(output: &ScanOutput) {
    let metadata = &output.metadata;

    println!();
    println!("{}", "=".repeat(50));
    println!("处理摘要");
    println!("{}", "=".repeat(50));
    println!("扫描视频总数: {}", metadata.total_videos_scanned);
    println!("发现场记板: {}", metadata.slates_found);
    println!("输出目录: {}", output.output_dir.display());
    println!("元数据文件: {}", output.metadata_file.display());
    println!("映射文件: {}", output.mapping_file.display());

    if metadata.slates_found > 0 {
        println!();
        println!("检测到场记板的视频:");
        for video in metadata.videos.iter().filter(|v| v.slate_found) {
            println!(
                "  - {} (第 {} 帧, confidence: {:.2})",
                video.video_path, video.frame_number, video.confidence
            );
        }
    }

    let failed = metadata.videos.iter().filter(|v| v.error.is_some()).count();
    if failed > 0 {
        println!();
        println!("处理失败的视频: {} 个（详见元数据文件中的 error 字段）", failed);
    }
}
