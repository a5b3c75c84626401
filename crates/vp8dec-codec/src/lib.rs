//! # vp8dec-codec
//!
//! vp8dec 编解码器库, 提供解码器框架与 Packet/Frame 抽象, 以及纯 Rust 的 VP8 解码器.
//!
//! 本 crate 对标 FFmpeg 的 libavcodec: 解码器通过 [`CodecRegistry`] 注册,
//! 统一实现 [`Decoder`] trait.
//!
//! ## 使用示例
//!
//! ```rust
//! use vp8dec_codec::{CodecId, CodecRegistry};
//!
//! let mut reg = CodecRegistry::new();
//! vp8dec_codec::register_all(&mut reg);
//!
//! // 按 CodecId 创建解码器实例
//! let decoder = reg.create_decoder(CodecId::Vp8).unwrap();
//! assert_eq!(decoder.name(), "vp8");
//! ```

pub mod codec_id;
pub mod codec_parameters;
pub mod decoder;
pub mod decoders;
pub mod frame;
pub mod packet;
pub mod registry;

// 重导出常用类型
pub use codec_id::CodecId;
pub use codec_parameters::{CodecParameters, CodecParamsType, VideoCodecParams};
pub use decoder::Decoder;
pub use frame::{Frame, PictureType, VideoFrame};
pub use packet::Packet;
pub use registry::CodecRegistry;

/// 注册所有内置编解码器
pub fn register_all(registry: &mut CodecRegistry) {
    decoders::register_all_decoders(registry);
}
