//! 解码后的帧数据 (Frame).
//!
//! 对标 FFmpeg 的 `AVFrame`, 表示解码后的原始视频数据.

use vp8dec_core::{
    PixelFormat, Rational, Timestamp,
    color::{ColorRange, ColorSpace},
};

/// 视频帧
///
/// 包含解码后的原始像素数据, YUV420P 格式有 3 个平面: Y, U, V.
/// 输出帧按显示尺寸裁剪, 每个平面紧凑排列 (linesize 等于平面宽度).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// 各平面的像素数据
    pub data: Vec<Vec<u8>>,
    /// 各平面每行的字节数 (linesize / stride)
    pub linesize: Vec<usize>,
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
    /// 帧时长 (以 time_base 为单位)
    pub duration: i64,
    /// 是否为关键帧
    pub is_keyframe: bool,
    /// 图片类型 (I/P 帧)
    pub picture_type: PictureType,
    /// 采样宽高比 (SAR)
    pub sample_aspect_ratio: Rational,
    /// 色彩空间
    pub color_space: ColorSpace,
    /// 色彩范围
    pub color_range: ColorRange,
}

impl VideoFrame {
    /// 创建空的视频帧
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let plane_count = pixel_format.plane_count() as usize;
        Self {
            data: vec![Vec::new(); plane_count],
            linesize: vec![0; plane_count],
            width,
            height,
            pixel_format,
            pts: vp8dec_core::timestamp::NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
            duration: 0,
            is_keyframe: false,
            picture_type: PictureType::None,
            sample_aspect_ratio: Rational::new(1, 1),
            color_space: ColorSpace::default(),
            color_range: ColorRange::default(),
        }
    }

    /// 显示时间戳 (pts + 时间基)
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.pts, self.time_base)
    }

    /// 读取指定平面 (x, y) 处的像素, 越界返回 None
    pub fn pixel(&self, plane: usize, x: usize, y: usize) -> Option<u8> {
        let stride = *self.linesize.get(plane)?;
        if x >= stride {
            return None;
        }
        self.data.get(plane)?.get(y * stride + x).copied()
    }
}

/// 帧 (解码输出的统一包装)
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Frame {
    /// 视频帧
    Video(VideoFrame),
}

impl Frame {
    /// 取出视频帧
    pub fn into_video(self) -> Option<VideoFrame> {
        match self {
            Self::Video(v) => Some(v),
        }
    }
}

/// 图片类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PictureType {
    /// 未指定
    #[default]
    None,
    /// I 帧 (VP8 关键帧)
    I,
    /// P 帧 (VP8 帧间帧)
    P,
}
