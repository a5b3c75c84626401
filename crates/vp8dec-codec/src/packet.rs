//! 压缩数据包 (Packet).
//!
//! 对标 FFmpeg 的 `AVPacket`. 对 VP8 而言, 一个 Packet 恰好承载一帧压缩数据
//! (由容器负责切分, 不属于解码器的职责).

use bytes::Bytes;
use vp8dec_core::Rational;

/// 压缩数据包
#[derive(Debug, Clone)]
pub struct Packet {
    /// 压缩数据
    pub data: Bytes,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 解码时间戳 (DTS)
    pub dts: i64,
    /// 数据包时长 (以 time_base 为单位)
    pub duration: i64,
    /// 时间基
    pub time_base: Rational,
    /// 容器标记的关键帧标志 (解码器以码流帧标签为准)
    pub is_keyframe: bool,
}

impl Packet {
    /// 创建空数据包 (flush 信号)
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            pts: vp8dec_core::timestamp::NOPTS_VALUE,
            dts: vp8dec_core::timestamp::NOPTS_VALUE,
            duration: 0,
            time_base: Rational::UNDEFINED,
            is_keyframe: false,
        }
    }

    /// 从数据创建数据包
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::empty()
        }
    }

    /// 设置时间戳 (builder 风格)
    pub fn with_pts(mut self, pts: i64, time_base: Rational) -> Self {
        self.pts = pts;
        self.dts = pts;
        self.time_base = time_base;
        self
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为空包 (flush packet)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
