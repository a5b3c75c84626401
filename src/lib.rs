//! # vp8dec
//!
//! 纯 Rust 实现的 VP8 视频解码器.
//!
//! 解码器按 FFmpeg 的分层方式组织: `vp8dec-core` 提供基础类型与错误,
//! `vp8dec-codec` 提供 Packet/Frame 抽象、解码器 trait 与 VP8 解码器本身.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use vp8dec::codec::{CodecId, CodecParameters, Packet};
//!
//! let registry = vp8dec::default_codec_registry();
//! let mut decoder = registry.create_decoder(CodecId::Vp8).unwrap();
//! decoder.open(&CodecParameters::video_hint(CodecId::Vp8, 640, 480)).unwrap();
//!
//! // 每个 Packet 承载一帧压缩数据 (通常来自 IVF / WebM 解封装)
//! let compressed: Vec<u8> = Vec::new();
//! decoder.send_packet(&Packet::from_data(compressed)).unwrap();
//! while let Ok(frame) = decoder.receive_frame() {
//!     let _video = frame.into_video();
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `vp8dec-core` | 核心类型与错误 |
//! | `vp8dec-codec` | 解码器框架与 VP8 解码器 |

pub mod logging;

/// 核心类型与工具 (对标 libavutil)
pub use vp8dec_core as core;

/// 解码器框架 (对标 libavcodec)
pub use vp8dec_codec as codec;

/// 获取 vp8dec 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置解码器的注册表
pub fn default_codec_registry() -> vp8dec_codec::CodecRegistry {
    let mut registry = vp8dec_codec::CodecRegistry::new();
    vp8dec_codec::register_all(&mut registry);
    registry
}
