//! 编解码器参数.
//!
//! 对标 FFmpeg 的 `AVCodecParameters`, 描述编解码器的配置参数.

use vp8dec_core::{PixelFormat, Rational};

use crate::codec_id::CodecId;

/// 编解码器参数
///
/// 传递给 `Decoder::open` 的配置信息, 通常从容器格式中提取.
#[derive(Debug, Clone)]
pub struct CodecParameters {
    /// 编解码器标识
    pub codec_id: CodecId,
    /// 额外数据 (VP8 不使用)
    pub extra_data: Vec<u8>,
    /// 码率 (bits/s)
    pub bit_rate: u64,
    /// 媒体类型特定参数
    pub params: CodecParamsType,
}

/// 媒体类型特定参数
#[derive(Debug, Clone)]
pub enum CodecParamsType {
    /// 视频参数
    Video(VideoCodecParams),
    /// 无特定参数
    None,
}

/// 视频编解码器参数
#[derive(Debug, Clone)]
pub struct VideoCodecParams {
    /// 宽度 (像素, 0 表示未知)
    pub width: u32,
    /// 高度 (像素, 0 表示未知)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 帧率
    pub frame_rate: Rational,
    /// 采样宽高比 (SAR)
    pub sample_aspect_ratio: Rational,
}

impl CodecParameters {
    /// 构造只带尺寸提示的视频参数
    pub fn video_hint(codec_id: CodecId, width: u32, height: u32) -> Self {
        Self {
            codec_id,
            extra_data: Vec::new(),
            bit_rate: 0,
            params: CodecParamsType::Video(VideoCodecParams {
                width,
                height,
                pixel_format: PixelFormat::Yuv420p,
                frame_rate: Rational::UNDEFINED,
                sample_aspect_ratio: Rational::new(1, 1),
            }),
        }
    }

    /// 获取视频参数 (如果是视频流)
    pub fn video(&self) -> Option<&VideoCodecParams> {
        match &self.params {
            CodecParamsType::Video(v) => Some(v),
            CodecParamsType::None => None,
        }
    }
}
