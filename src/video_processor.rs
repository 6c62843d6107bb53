use ffmpeg_next as ffmpeg;
use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::DecodeError;
use crate::frame::{Frame, FrameSource, DEFAULT_FPS};

/// 视频处理器，负责打开视频并按顺序解码开头的若干帧
pub struct VideoProcessor {
    input_path: PathBuf,
}

impl VideoProcessor {
    pub fn new(input_path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        ffmpeg::init().map_err(|e| DecodeError::Open(format!("初始化 FFmpeg 失败: {}", e)))?;

        // 只保留 FFmpeg 的错误日志，损坏文件的警告由我们自己的日志汇报
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);

        Ok(Self {
            input_path: input_path.as_ref().to_path_buf(),
        })
    }

    /// 打开一个最多产出 `limit` 帧的顺序采样器
    ///
    /// 只做顺序解码，不做 seek；采样器在达到上限、流结束、出错或被丢弃时立即释放解码会话。
    pub fn frames(&self, limit: usize) -> Result<FrameSampler, DecodeError> {
        let input = self.open_input()?;

        let (stream_index, fps, decoder) = {
            let video_stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or(DecodeError::NoVideoStream)?;

            let decoder =
                ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?
                    .decoder()
                    .video()?;

            (video_stream.index(), frame_rate(&video_stream), decoder)
        };

        debug!(
            "🎞️  [帧采样] 打开解码会话: {} (stream={}, fps={:.2}, 上限={} 帧)",
            self.input_path.display(),
            stream_index,
            fps,
            limit
        );

        Ok(FrameSampler {
            session: Some(DecodeSession {
                input,
                decoder,
                scaler: None,
                stream_index,
                decoded: ffmpeg::frame::Video::empty(),
                eof_sent: false,
            }),
            path: self.input_path.clone(),
            limit: limit as u64,
            produced: 0,
            fps,
        })
    }

    fn open_input(&self) -> Result<ffmpeg::format::context::Input, DecodeError> {
        ffmpeg::format::input(&self.input_path).map_err(|e| DecodeError::Open(e.to_string()))
    }
}

fn frame_rate(stream: &ffmpeg::Stream) -> f64 {
    let fps = stream.avg_frame_rate();
    if fps.numerator() > 0 && fps.denominator() > 0 {
        fps.numerator() as f64 / fps.denominator() as f64
    } else {
        DEFAULT_FPS
    }
}

/// 顺序帧采样器：惰性、只进、不可重启
pub struct FrameSampler {
    session: Option<DecodeSession>,
    path: PathBuf,
    limit: u64,
    produced: u64,
    fps: f64,
}

struct DecodeSession {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    stream_index: usize,
    decoded: ffmpeg::frame::Video,
    eof_sent: bool,
}

impl FrameSampler {
    fn close(&mut self) {
        if self.session.take().is_some() {
            debug!(
                "🎞️  [帧采样] 释放解码会话: {} (已解码 {} 帧)",
                self.path.display(),
                self.produced
            );
        }
    }
}

impl Iterator for FrameSampler {
    type Item = Result<Frame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.produced >= self.limit {
            self.close();
            return None;
        }

        let session = self.session.as_mut()?;
        match session.next_image() {
            Ok(Some(image)) => {
                let frame = Frame::new(self.produced, self.fps, image);
                self.produced += 1;
                if self.produced >= self.limit {
                    self.close();
                }
                Some(Ok(frame))
            }
            Ok(None) => {
                let empty = self.produced == 0;
                self.close();
                if empty {
                    Some(Err(DecodeError::NoFrames))
                } else {
                    None
                }
            }
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.close();
    }
}

impl DecodeSession {
    /// 解码下一帧并转换为 RGB 图像；流结束返回 `Ok(None)`
    fn next_image(&mut self) -> Result<Option<DynamicImage>, DecodeError> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                return self.convert().map(Some);
            }

            if self.eof_sent {
                return Ok(None);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        // 单个损坏的数据包不终止会话
                        debug!("跳过无法解码的数据包: {}", e);
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
                Err(e) => return Err(DecodeError::Decoder(e.to_string())),
            }
        }
    }

    fn convert(&mut self) -> Result<DynamicImage, DecodeError> {
        let format = self.decoded.format();
        let width = self.decoded.width();
        let height = self.decoded.height();

        // 分辨率或像素格式变化时重建缩放器
        let stale = match &self.scaler {
            Some(scaler) => {
                let input = scaler.input();
                input.format != format || input.width != width || input.height != height
            }
            None => true,
        };
        if stale {
            self.scaler = Some(ffmpeg::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg::format::Pixel::RGB24,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )?);
        }

        let Some(scaler) = self.scaler.as_mut() else {
            return Err(DecodeError::Decoder("缩放器未初始化".to_string()));
        };

        let mut rgb_frame = ffmpeg::frame::Video::empty();
        scaler.run(&self.decoded, &mut rgb_frame)?;
        rgb_frame_to_image(&rgb_frame)
    }
}

/// 将 RGB24 的 FFmpeg 帧转换为 DynamicImage（按行拷贝，跳过行尾填充）
fn rgb_frame_to_image(frame: &ffmpeg::frame::Video) -> Result<DynamicImage, DecodeError> {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_len = width as usize * 3;

    let mut buf = Vec::with_capacity(row_len * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        let row = data
            .get(start..start + row_len)
            .ok_or_else(|| DecodeError::Decoder(format!("帧数据不完整（第 {} 行）", y)))?;
        buf.extend_from_slice(row);
    }

    RgbImage::from_raw(width, height, buf)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| DecodeError::Decoder("帧缓冲区大小不匹配".to_string()))
}

/// 基于 FFmpeg 的帧来源
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegSource;

impl FrameSource for FfmpegSource {
    type Frames = FrameSampler;

    fn open(&self, path: &Path, max_frames: usize) -> Result<FrameSampler, DecodeError> {
        VideoProcessor::new(path)?.frames(max_frames)
    }
}
