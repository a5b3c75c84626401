//! 编解码器注册表.
//!
//! 对标 FFmpeg 的编解码器注册机制, 支持按 CodecId 查找并实例化解码器.

use std::collections::HashMap;

use vp8dec_core::Vp8Result;

use crate::codec_id::CodecId;
use crate::decoder::Decoder;

/// 解码器工厂函数类型
pub type DecoderFactory = fn() -> Vp8Result<Box<dyn Decoder>>;

/// 编解码器注册表
pub struct CodecRegistry {
    /// 解码器工厂映射, 同一 CodecId 可注册多个实现, 先注册者优先
    decoders: HashMap<CodecId, Vec<DecoderEntry>>,
}

/// 解码器注册条目
struct DecoderEntry {
    /// 解码器名称
    name: String,
    /// 工厂函数
    factory: DecoderFactory,
}

impl CodecRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// 注册一个解码器
    pub fn register_decoder(
        &mut self,
        codec_id: CodecId,
        name: impl Into<String>,
        factory: DecoderFactory,
    ) {
        self.decoders
            .entry(codec_id)
            .or_default()
            .push(DecoderEntry {
                name: name.into(),
                factory,
            });
    }

    /// 创建指定编解码器 ID 的解码器实例
    pub fn create_decoder(&self, codec_id: CodecId) -> Vp8Result<Box<dyn Decoder>> {
        let entry = self
            .decoders
            .get(&codec_id)
            .and_then(|entries| entries.first())
            .ok_or_else(|| {
                vp8dec_core::Vp8Error::CodecNotFound(format!("未找到 {} 的解码器", codec_id))
            })?;
        (entry.factory)()
    }

    /// 按名称创建解码器实例
    pub fn create_decoder_by_name(&self, name: &str) -> Vp8Result<Box<dyn Decoder>> {
        let entry = self
            .decoders
            .values()
            .flatten()
            .find(|entry| entry.name == name)
            .ok_or_else(|| {
                vp8dec_core::Vp8Error::CodecNotFound(format!("未找到名为 {} 的解码器", name))
            })?;
        (entry.factory)()
    }

    /// 获取所有已注册的解码器名称
    pub fn list_decoders(&self) -> Vec<(CodecId, &str)> {
        let mut result = Vec::new();
        for (id, entries) in &self.decoders {
            for entry in entries {
                result.push((*id, entry.name.as_str()));
            }
        }
        result
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_注册所有编解码器() {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);

        let decoders = registry.list_decoders();
        assert_eq!(decoders, vec![(CodecId::Vp8, "vp8")]);
    }

    #[test]
    fn test_按codec_id创建解码器() {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);

        let dec = registry.create_decoder(CodecId::Vp8);
        assert!(dec.is_ok(), "创建 vp8 解码器失败");
        if let Ok(dec) = dec {
            assert_eq!(dec.codec_id(), CodecId::Vp8);
            assert_eq!(dec.name(), "vp8");
        }
        assert!(registry.create_decoder_by_name("vp8").is_ok());
    }

    #[test]
    fn test_未注册的编解码器返回错误() {
        let registry = CodecRegistry::new();
        assert!(registry.create_decoder(CodecId::Vp8).is_err());

        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);
        assert!(registry.create_decoder(CodecId::None).is_err());
        assert!(registry.create_decoder_by_name("h264").is_err());
    }
}
