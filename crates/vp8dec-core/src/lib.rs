//! # vp8dec-core
//!
//! vp8dec 核心库, 提供基础类型定义、错误处理和工具函数.
//!
//! 本 crate 对标 FFmpeg 的 libavutil, 为解码器提供像素格式、时间基、色彩元数据等底层设施.

pub mod color;
pub mod error;
pub mod media_type;
pub mod pixel_format;
pub mod rational;
pub mod timestamp;

// 重导出常用类型
pub use error::{Vp8Error, Vp8Result};
pub use media_type::MediaType;
pub use pixel_format::PixelFormat;
pub use rational::Rational;
pub use timestamp::Timestamp;
