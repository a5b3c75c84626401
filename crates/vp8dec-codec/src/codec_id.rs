//! 编解码器标识符.
//!
//! 对标 FFmpeg 的 `AVCodecID`, 为每种编解码算法分配唯一标识.

use std::fmt;
use vp8dec_core::MediaType;

/// 编解码器标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecId {
    /// 未知编解码器
    None,
    /// VP8 (On2 TrueMotion VP8, WebM 视频轨默认编码)
    Vp8,
}

impl CodecId {
    /// 获取编解码器对应的媒体类型
    pub const fn media_type(&self) -> MediaType {
        match self {
            Self::None => MediaType::Data,
            Self::Vp8 => MediaType::Video,
        }
    }

    /// 获取编解码器的人类可读名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Vp8 => "vp8",
        }
    }

    /// 由容器中的 FourCC / 编解码器字符串查找标识符
    ///
    /// 支持 IVF/AVI 的 `VP80` 与 Matroska 的 `V_VP8`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "VP80" | "vp80" | "V_VP8" | "vp8" => Self::Vp8,
            _ => Self::None,
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
