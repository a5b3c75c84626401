//! 像素格式定义.
//!
//! 对标 FFmpeg 的 `AVPixelFormat`. VP8 只产出 8 位 YUV 4:2:0 平面数据,
//! 这里仅保留解码输出需要的格式.

use std::fmt;

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// 未指定
    None,
    /// YUV 4:2:0 平面格式, 8 位 (VP8 唯一的输出格式)
    Yuv420p,
    /// 灰度 8 位 (单平面, 仅亮度)
    Gray8,
}

impl PixelFormat {
    /// 获取色度子采样 (log2 水平, log2 垂直)
    pub const fn chroma_subsampling(&self) -> (u32, u32) {
        match self {
            Self::Yuv420p => (1, 1),
            _ => (0, 0),
        }
    }

    /// 平面数量
    pub const fn plane_count(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Yuv420p => 3,
            Self::Gray8 => 1,
        }
    }

    /// 计算指定平面的宽度 (像素)
    ///
    /// 色度平面按向上取整计算, 奇数宽度的最后一列色度仍然有效.
    pub fn plane_width(&self, plane: usize, width: u32) -> Option<usize> {
        if plane >= self.plane_count() as usize {
            return None;
        }
        let (sub_h, _) = self.chroma_subsampling();
        let w = width as usize;
        Some(if plane == 0 {
            w
        } else {
            (w + (1 << sub_h) - 1) >> sub_h
        })
    }

    /// 计算指定平面的行数
    pub fn plane_height(&self, plane: usize, height: u32) -> Option<usize> {
        if plane >= self.plane_count() as usize {
            return None;
        }
        let (_, sub_v) = self.chroma_subsampling();
        let h = height as usize;
        Some(if plane == 0 {
            h
        } else {
            (h + (1 << sub_v) - 1) >> sub_v
        })
    }

    /// 计算整帧 (紧凑排列) 的字节数
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        if *self == Self::None {
            return None;
        }
        let mut total = 0usize;
        for plane in 0..self.plane_count() as usize {
            total += self.plane_width(plane, width)? * self.plane_height(plane, height)?;
        }
        Some(total)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Yuv420p => "yuv420p",
            Self::Gray8 => "gray8",
        };
        write!(f, "{name}")
    }
}
