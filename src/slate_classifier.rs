use image::GrayImage;
use serde::Serialize;

use crate::frame::Frame;

/// 场记板分类策略参数
///
/// 所有阈值和权重都是可调的策略常量，通过配置文件/环境变量覆盖。
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// 亮度低于该值的像素计为黑色
    pub dark_threshold: u8,
    /// 亮度高于该值的像素计为白色（候选文字）
    pub bright_threshold: u8,
    /// 黑色像素占比下限
    pub min_black_ratio: f64,
    /// 白色像素占比下限（过少说明没有文字）
    pub min_white_ratio: f64,
    /// 白色像素占比上限（过多说明是明亮画面而非场记板）
    pub max_white_ratio: f64,
    /// 理想的文字覆盖率
    pub target_white_ratio: f64,
    /// 白色占比偏离理想值时的衰减系数
    pub white_falloff: f64,
    /// Sobel 梯度幅值超过该值计为边缘像素
    pub edge_threshold: f64,
    /// 边缘密度达到该值时 edge_score 饱和为 1
    pub edge_saturation: f64,
    pub black_weight: f64,
    pub white_weight: f64,
    pub edge_weight: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            dark_threshold: 30,
            bright_threshold: 200,
            min_black_ratio: 0.7,
            min_white_ratio: 0.01,
            max_white_ratio: 0.3,
            target_white_ratio: 0.1,
            white_falloff: 5.0,
            edge_threshold: 100.0,
            edge_saturation: 0.05,
            black_weight: 0.4,
            white_weight: 0.4,
            edge_weight: 0.2,
        }
    }
}

impl ClassifierConfig {
    /// 校验参数组合，返回第一条不满足的约束
    pub fn validate(&self) -> Result<(), String> {
        if self.dark_threshold >= self.bright_threshold {
            return Err(format!(
                "dark_threshold ({}) 必须小于 bright_threshold ({})",
                self.dark_threshold, self.bright_threshold
            ));
        }
        if !(0.0..1.0).contains(&self.min_black_ratio) {
            return Err(format!("min_black_ratio 超出 [0,1): {}", self.min_black_ratio));
        }
        if !(0.0 <= self.min_white_ratio
            && self.min_white_ratio < self.target_white_ratio
            && self.target_white_ratio < self.max_white_ratio
            && self.max_white_ratio <= 1.0)
        {
            return Err(format!(
                "白色占比窗口必须满足 0 <= min ({}) < target ({}) < max ({}) <= 1",
                self.min_white_ratio, self.target_white_ratio, self.max_white_ratio
            ));
        }
        if !(self.white_falloff >= 0.0) {
            return Err(format!("white_falloff 不能为负: {}", self.white_falloff));
        }
        if !(self.edge_threshold >= 0.0) {
            return Err(format!("edge_threshold 不能为负: {}", self.edge_threshold));
        }
        if !(self.edge_saturation > 0.0 && self.edge_saturation <= 1.0) {
            return Err(format!("edge_saturation 超出 (0,1]: {}", self.edge_saturation));
        }
        let weights = [self.black_weight, self.white_weight, self.edge_weight];
        if weights.iter().any(|w| !(*w >= 0.0)) {
            return Err(format!("权重不能为负: {:?}", weights));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err("权重不能全部为 0".to_string());
        }
        Ok(())
    }
}

/// 单帧的分类得分
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ClassificationScore {
    /// 综合置信度，范围 [0,1]
    pub confidence: f64,
    pub black_ratio: f64,
    pub white_ratio: f64,
    /// 归一化的边缘密度，范围 [0,1]；未通过黑/白占比门限的帧不计算，为 None
    pub edge_score: Option<f64>,
}

/// 场记板分类器：黑底白字检测
///
/// 纯计算，无副作用，可在多个工作线程间共享。
#[derive(Debug, Clone, Default)]
pub struct SlateClassifier {
    config: ClassifierConfig,
}

impl SlateClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// 计算一帧是场记板的置信度
    ///
    /// 1. 黑色占比：暗像素比例，场记板应以黑色为主
    /// 2. 白色占比：亮像素比例，代表文字，需落在目标窗口内
    /// 3. 边缘密度：Sobel 梯度幅值超过阈值的像素比例，文字区域会产生大量短边缘
    /// 4. 按权重组合并裁剪到 [0,1]
    pub fn classify(&self, frame: &Frame) -> ClassificationScore {
        let gray = frame.image.to_luma8();
        self.classify_gray(&gray)
    }

    pub fn classify_gray(&self, gray: &GrayImage) -> ClassificationScore {
        let (black_ratio, white_ratio) = self.calculate_black_white_ratio(gray);

        if !self.passes_gate(black_ratio, white_ratio) {
            return ClassificationScore {
                confidence: 0.0,
                black_ratio,
                white_ratio,
                edge_score: None,
            };
        }

        let edge_score = self.calculate_edge_score(gray);
        ClassificationScore {
            confidence: self.combine(black_ratio, white_ratio, edge_score),
            black_ratio,
            white_ratio,
            edge_score: Some(edge_score),
        }
    }

    /// 将三个信号组合为置信度
    ///
    /// 在门限内对 black_ratio 与 edge_score 单调不减；白色占比越出窗口时直接为 0。
    pub fn combine(&self, black_ratio: f64, white_ratio: f64, edge_score: f64) -> f64 {
        if !self.passes_gate(black_ratio, white_ratio) {
            return 0.0;
        }

        let c = &self.config;
        let white_fit =
            (1.0 - (white_ratio - c.target_white_ratio).abs() * c.white_falloff).clamp(0.0, 1.0);
        let confidence = black_ratio * c.black_weight
            + white_fit * c.white_weight
            + edge_score.clamp(0.0, 1.0) * c.edge_weight;

        if confidence.is_nan() {
            return 0.0;
        }
        confidence.clamp(0.0, 1.0)
    }

    fn passes_gate(&self, black_ratio: f64, white_ratio: f64) -> bool {
        let c = &self.config;
        black_ratio > c.min_black_ratio
            && white_ratio > c.min_white_ratio
            && white_ratio < c.max_white_ratio
    }

    /// 通过亮度直方图计算黑色/白色像素占比
    fn calculate_black_white_ratio(&self, gray: &GrayImage) -> (f64, f64) {
        let total_pixels = gray.width() as u64 * gray.height() as u64;
        if total_pixels == 0 {
            return (0.0, 0.0);
        }

        let mut hist = [0u64; 256];
        for pixel in gray.pixels() {
            hist[pixel[0] as usize] += 1;
        }

        let dark = self.config.dark_threshold as usize;
        let bright = self.config.bright_threshold as usize;
        let black: u64 = hist[..dark].iter().sum();
        let white: u64 = hist[bright + 1..].iter().sum();

        (
            black as f64 / total_pixels as f64,
            white as f64 / total_pixels as f64,
        )
    }

    /// 边缘密度（Sobel 算子），按 edge_saturation 归一化到 [0,1]
    fn calculate_edge_score(&self, gray: &GrayImage) -> f64 {
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        if width < 3 || height < 3 {
            return 0.0;
        }

        let data = gray.as_raw();
        let px = |x: usize, y: usize| data[y * width + x] as i32;
        let threshold_squared = self.config.edge_threshold * self.config.edge_threshold;

        let mut edge_pixels = 0u64;
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let gx = (px(x + 1, y - 1) + 2 * px(x + 1, y) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x - 1, y) + px(x - 1, y + 1));
                let gy = (px(x - 1, y + 1) + 2 * px(x, y + 1) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x, y - 1) + px(x + 1, y - 1));
                let magnitude_squared = (gx * gx + gy * gy) as f64;
                if magnitude_squared > threshold_squared {
                    edge_pixels += 1;
                }
            }
        }

        let interior = ((width - 2) * (height - 2)) as f64;
        let density = edge_pixels as f64 / interior;
        (density / self.config.edge_saturation).min(1.0)
    }
}
