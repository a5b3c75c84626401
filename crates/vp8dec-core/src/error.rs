//! 统一错误类型定义.
//!
//! 所有 vp8dec crate 共用的错误类型, 支持跨模块传播.
//!
//! 解码相关的错误分三类:
//! - 码流结构错误 (`InvalidData` / `Unsupported`): 当前帧作废, 无部分输出.
//! - 状态错误 (`MissingReference`): 关键帧之前收到帧间帧, 等待下一个关键帧即可恢复.
//! - 分配错误 (`OutOfMemory`): 尺寸变化时缓冲区分配失败, 持久状态保持不变.

use thiserror::Error;

/// vp8dec 统一错误类型
#[derive(Debug, Error)]
pub enum Vp8Error {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作或码流特性
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 内存分配失败
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 未找到指定的编解码器
    #[error("未找到编解码器: {0}")]
    CodecNotFound(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 缺少参考帧 (例如关键帧之前的帧间帧)
    #[error("缺少参考帧: {0}")]
    MissingReference(String),
}

impl Vp8Error {
    /// 是否为码流损坏类错误
    ///
    /// 调用方据此区分 "输入损坏" 与 "暂时无法产出帧".
    pub fn is_corrupt_input(&self) -> bool {
        matches!(self, Self::InvalidData(_) | Self::Unsupported(_))
    }
}

/// vp8dec 统一 Result 类型
pub type Vp8Result<T> = Result<T, Vp8Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_错误分类() {
        assert!(Vp8Error::InvalidData("起始码错误".into()).is_corrupt_input());
        assert!(Vp8Error::Unsupported("profile 5".into()).is_corrupt_input());
        assert!(!Vp8Error::MissingReference("无关键帧".into()).is_corrupt_input());
        assert!(!Vp8Error::OutOfMemory("帧缓冲".into()).is_corrupt_input());
    }

    #[test]
    fn test_错误信息格式() {
        let err = Vp8Error::MissingReference("VP8: 丢弃帧间帧".into());
        assert_eq!(err.to_string(), "缺少参考帧: VP8: 丢弃帧间帧");
    }
}
