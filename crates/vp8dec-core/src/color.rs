//! 色彩相关类型定义.
//!
//! 对标 FFmpeg 的 `AVColorSpace` / `AVColorRange`.
//! VP8 关键帧头部带有 1 位色彩空间标志, 取值 0 表示 BT.601 YCbCr, 1 为保留值.

/// YCbCr 色彩空间 (矩阵系数)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ColorSpace {
    /// 未指定
    #[default]
    Unspecified,
    /// ITU-R BT.470 BG / BT.601 (VP8 默认)
    Bt470bg,
    /// 码流声明的保留色彩空间
    Reserved,
}

impl ColorSpace {
    /// 由 VP8 关键帧头部的色彩空间标志位构造
    pub const fn from_vp8_bit(bit: bool) -> Self {
        if bit { Self::Reserved } else { Self::Bt470bg }
    }
}

/// 色彩范围
///
/// - Limited: Y 16-235, Cb/Cr 16-240 (8 位)
/// - Full: Y/Cb/Cr 0-255 (8 位)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorRange {
    /// 未指定
    #[default]
    Unspecified,
    /// 有限范围 (广播/TV)
    Limited,
    /// 完整范围 (JPEG/PC)
    Full,
}
