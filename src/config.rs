use anyhow::{Context, Result};
use configparser::ini::Ini;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::processor::ScanConfig;
use crate::slate_classifier::ClassifierConfig;

/// 扩展配置（扫描配置 + 日志级别）
#[derive(Debug, Clone)]
pub struct ExtendedConfig {
    pub scan: ScanConfig,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

/// 命令行参数中显式给出的值
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub frames: Option<usize>,
    pub threshold: Option<f64>,
    pub workers: Option<usize>,
    pub video_timeout: Option<u64>,
    pub save_unconfirmed: Option<bool>,
    pub webhook_url: Option<String>,
}

/// 来自单一来源（环境变量或配置文件）的部分配置
#[derive(Debug, Clone, Default)]
struct PartialConfig {
    frames: Option<usize>,
    threshold: Option<f64>,
    workers: Option<usize>,
    video_timeout: Option<u64>,
    save_unconfirmed: Option<bool>,
    webhook_url: Option<String>,
    log_level: Option<String>,
    classifier: Option<ClassifierConfig>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    ///
    /// 显式指定的配置文件读取失败会返回错误；默认位置的配置文件不存在时忽略。
    pub fn load_config(config_file: Option<&Path>, cli: &CliOverrides) -> Result<ExtendedConfig> {
        let file_config = match config_file {
            Some(config_path) => Some(Self::load_from_file(config_path)?),
            None => Self::load_from_default_locations()?,
        };

        Ok(Self::merge(cli, Self::load_from_env(), file_config.unwrap_or_default()))
    }

    fn merge(cli: &CliOverrides, env: PartialConfig, file: PartialConfig) -> ExtendedConfig {
        let defaults = ScanConfig::default();

        let scan = ScanConfig {
            frames: cli
                .frames
                .or(env.frames)
                .or(file.frames)
                .unwrap_or(defaults.frames),
            threshold: cli
                .threshold
                .or(env.threshold)
                .or(file.threshold)
                .unwrap_or(defaults.threshold),
            workers: cli
                .workers
                .or(env.workers)
                .or(file.workers)
                .unwrap_or(defaults.workers),
            video_timeout: cli
                .video_timeout
                .or(env.video_timeout)
                .or(file.video_timeout)
                .unwrap_or(defaults.video_timeout),
            save_unconfirmed: cli
                .save_unconfirmed
                .or(env.save_unconfirmed)
                .or(file.save_unconfirmed)
                .unwrap_or(defaults.save_unconfirmed),
            webhook_url: cli
                .webhook_url
                .clone()
                .or(env.webhook_url)
                .or(file.webhook_url),
            classifier: file.classifier.unwrap_or(defaults.classifier),
        };

        ExtendedConfig {
            scan,
            log_level: env
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
        }
    }

    /// 从环境变量加载配置（无法解析的值忽略）
    fn load_from_env() -> PartialConfig {
        fn parsed<T: FromStr>(key: &str) -> Option<T> {
            env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        PartialConfig {
            frames: parsed("SLATE_SCAN_FRAMES"),
            threshold: parsed("SLATE_SCAN_THRESHOLD"),
            workers: parsed("SLATE_SCAN_WORKERS"),
            video_timeout: parsed("SLATE_SCAN_VIDEO_TIMEOUT"),
            save_unconfirmed: env::var("SLATE_SCAN_SAVE_UNCONFIRMED")
                .ok()
                .map(|v| v.to_lowercase() == "true"),
            webhook_url: env::var("SLATE_SCAN_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            log_level: env::var("LOG_LEVEL").ok().filter(|v| !v.is_empty()),
            classifier: None,
        }
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<PartialConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut ini = Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        Self::parse_ini(&ini).with_context(|| format!("配置文件无效: {}", config_path.display()))
    }

    fn parse_ini(ini: &Ini) -> Result<PartialConfig> {
        let defaults = ClassifierConfig::default();
        let classifier = ClassifierConfig {
            dark_threshold: value(ini, "classifier", "dark_threshold")?
                .unwrap_or(defaults.dark_threshold),
            bright_threshold: value(ini, "classifier", "bright_threshold")?
                .unwrap_or(defaults.bright_threshold),
            min_black_ratio: value(ini, "classifier", "min_black_ratio")?
                .unwrap_or(defaults.min_black_ratio),
            min_white_ratio: value(ini, "classifier", "min_white_ratio")?
                .unwrap_or(defaults.min_white_ratio),
            max_white_ratio: value(ini, "classifier", "max_white_ratio")?
                .unwrap_or(defaults.max_white_ratio),
            target_white_ratio: value(ini, "classifier", "target_white_ratio")?
                .unwrap_or(defaults.target_white_ratio),
            white_falloff: value(ini, "classifier", "white_falloff")?
                .unwrap_or(defaults.white_falloff),
            edge_threshold: value(ini, "classifier", "edge_threshold")?
                .unwrap_or(defaults.edge_threshold),
            edge_saturation: value(ini, "classifier", "edge_saturation")?
                .unwrap_or(defaults.edge_saturation),
            black_weight: value(ini, "classifier", "black_weight")?
                .unwrap_or(defaults.black_weight),
            white_weight: value(ini, "classifier", "white_weight")?
                .unwrap_or(defaults.white_weight),
            edge_weight: value(ini, "classifier", "edge_weight")?.unwrap_or(defaults.edge_weight),
        };

        Ok(PartialConfig {
            frames: value(ini, "slate_scan", "frames")?,
            threshold: value(ini, "slate_scan", "threshold")?,
            workers: value(ini, "slate_scan", "workers")?,
            video_timeout: value(ini, "slate_scan", "video_timeout")?,
            save_unconfirmed: raw(ini, "slate_scan", "save_unconfirmed")
                .map(|v| v.to_lowercase() == "true"),
            webhook_url: raw(ini, "slate_scan", "webhook_url"),
            log_level: raw(ini, "logging", "level"),
            classifier: Some(classifier),
        })
    }

    /// 从默认位置加载配置文件，都不存在时返回 None
    fn load_from_default_locations() -> Result<Option<PartialConfig>> {
        let mut candidates = vec![
            // 1. 当前目录的 slate-scan.ini
            PathBuf::from("slate-scan.ini"),
            // 2. 当前目录的 .slate-scan.ini
            PathBuf::from(".slate-scan.ini"),
        ];
        // 3. 用户主目录的 .slate-scan.ini
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".slate-scan.ini"));
        }
        // 4. /etc/slate-scan.ini (Linux/macOS)
        candidates.push(PathBuf::from("/etc/slate-scan.ini"));

        match candidates.iter().find(|path| path.exists()) {
            Some(path) => Self::load_from_file(path).map(Some),
            None => Ok(None),
        }
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let scan = ScanConfig::default();
        let c = ClassifierConfig::default();
        let mut ini = Ini::new();

        ini.set("slate_scan", "frames", Some(scan.frames.to_string()));
        ini.set("slate_scan", "threshold", Some(scan.threshold.to_string()));
        ini.set("slate_scan", "workers", Some(scan.workers.to_string()));
        ini.set("slate_scan", "video_timeout", Some(scan.video_timeout.to_string()));
        ini.set("slate_scan", "save_unconfirmed", Some("false".to_string()));
        ini.set("slate_scan", "webhook_url", Some(String::new()));

        ini.set("classifier", "dark_threshold", Some(c.dark_threshold.to_string()));
        ini.set("classifier", "bright_threshold", Some(c.bright_threshold.to_string()));
        ini.set("classifier", "min_black_ratio", Some(c.min_black_ratio.to_string()));
        ini.set("classifier", "min_white_ratio", Some(c.min_white_ratio.to_string()));
        ini.set("classifier", "max_white_ratio", Some(c.max_white_ratio.to_string()));
        ini.set("classifier", "target_white_ratio", Some(c.target_white_ratio.to_string()));
        ini.set("classifier", "white_falloff", Some(c.white_falloff.to_string()));
        ini.set("classifier", "edge_threshold", Some(c.edge_threshold.to_string()));
        ini.set("classifier", "edge_saturation", Some(c.edge_saturation.to_string()));
        ini.set("classifier", "black_weight", Some(c.black_weight.to_string()));
        ini.set("classifier", "white_weight", Some(c.white_weight.to_string()));
        ini.set("classifier", "edge_weight", Some(c.edge_weight.to_string()));

        ini.set("logging", "level", Some("info".to_string()));

        ini.write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

/// 读取原始字符串，先查指定节，再查 [DEFAULT]；空值视为未设置
fn raw(ini: &Ini, section: &str, key: &str) -> Option<String> {
    ini.get(section, key)
        .or_else(|| ini.get("DEFAULT", key))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn value<T: FromStr>(ini: &Ini, section: &str, key: &str) -> Result<Option<T>> {
    match raw(ini, section, key) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("无法解析配置项 [{}] {} = {}", section, key, v)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ini(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slate-scan.ini");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_from_file_reads_sections() {
        let (_dir, path) = write_ini(
            "[slate_scan]\nframes = 90\nthreshold = 0.7\nsave_unconfirmed = TRUE\n\n\
             [classifier]\nedge_weight = 0.3\ndark_threshold = 40\n\n[logging]\nlevel = debug\n",
        );

        let partial = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(partial.frames, Some(90));
        assert_eq!(partial.threshold, Some(0.7));
        assert_eq!(partial.workers, None);
        assert_eq!(partial.save_unconfirmed, Some(true));
        assert_eq!(partial.log_level.as_deref(), Some("debug"));

        let classifier = partial.classifier.unwrap();
        assert_eq!(classifier.edge_weight, 0.3);
        assert_eq!(classifier.dark_threshold, 40);
        assert_eq!(classifier.black_weight, ClassifierConfig::default().black_weight);
    }

    #[test]
    fn test_cli_overrides_file() {
        let (_dir, path) = write_ini("[slate_scan]\nframes = 90\nthreshold = 0.7\n");
        let file = ConfigLoader::load_from_file(&path).unwrap();
        let cli = CliOverrides {
            threshold: Some(0.95),
            ..CliOverrides::default()
        };

        let config = ConfigLoader::merge(&cli, PartialConfig::default(), file);
        assert_eq!(config.scan.threshold, 0.95);
        assert_eq!(config.scan.frames, 90);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_env_overrides_file_but_not_cli() {
        let file = PartialConfig {
            frames: Some(30),
            workers: Some(2),
            ..PartialConfig::default()
        };
        let env = PartialConfig {
            frames: Some(45),
            workers: Some(3),
            ..PartialConfig::default()
        };
        let cli = CliOverrides {
            workers: Some(8),
            ..CliOverrides::default()
        };

        let config = ConfigLoader::merge(&cli, env, file);
        assert_eq!(config.scan.frames, 45);
        assert_eq!(config.scan.workers, 8);
    }

    #[test]
    fn test_invalid_value_is_error() {
        let (_dir, path) = write_ini("[slate_scan]\nframes = lots\n");
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = ConfigLoader::load_config(
            Some(Path::new("/nonexistent/slate-scan.ini")),
            &CliOverrides::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_default_config_file_loads_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generated.ini");
        ConfigLoader::create_default_config(&path).unwrap();

        let partial = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(partial.frames, Some(60));
        assert_eq!(partial.threshold, Some(0.8));
        assert_eq!(partial.webhook_url, None);
        assert_eq!(partial.classifier, Some(ClassifierConfig::default()));
    }
}
