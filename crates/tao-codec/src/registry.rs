//! 编解码器注册表.
//!
//! 按 [`CodecId`] 登记工厂函数. 同一标识可以登记多个实现, 先登记者优先;
//! 也可以按名称指定具体实现.

use std::collections::HashMap;

use tao_core::{TaoError, TaoResult};

use crate::codec_id::CodecId;
use crate::decoder::Decoder;
use crate::encoder::Encoder;

/// 解码器工厂函数类型
pub type DecoderFactory = fn() -> TaoResult<Box<dyn Decoder>>;

/// 编码器工厂函数类型
pub type EncoderFactory = fn() -> TaoResult<Box<dyn Encoder>>;

/// 注册条目
struct Entry<F> {
    name: String,
    factory: F,
}

/// 同一类工厂 (解码器或编码器) 的登记表
struct Table<F> {
    entries: HashMap<CodecId, Vec<Entry<F>>>,
}

impl<F: Copy> Table<F> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn register(&mut self, codec_id: CodecId, name: String, factory: F) {
        self.entries
            .entry(codec_id)
            .or_default()
            .push(Entry { name, factory });
    }

    fn first(&self, codec_id: CodecId) -> Option<F> {
        self.entries
            .get(&codec_id)
            .and_then(|v| v.first())
            .map(|e| e.factory)
    }

    fn by_name(&self, name: &str) -> Option<F> {
        self.entries
            .values()
            .flatten()
            .find(|e| e.name == name)
            .map(|e| e.factory)
    }

    fn list(&self) -> Vec<(CodecId, &str)> {
        let mut result: Vec<_> = self
            .entries
            .iter()
            .flat_map(|(id, v)| v.iter().map(move |e| (*id, e.name.as_str())))
            .collect();
        // HashMap 无序, 按标识排序后保持各标识内的登记顺序
        result.sort_by_key(|(id, _)| id.name());
        result
    }
}

/// 编解码器注册表
pub struct CodecRegistry {
    decoders: Table<DecoderFactory>,
    encoders: Table<EncoderFactory>,
}

impl CodecRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            decoders: Table::new(),
            encoders: Table::new(),
        }
    }

    /// 登记一个解码器
    pub fn register_decoder(
        &mut self,
        codec_id: CodecId,
        name: impl Into<String>,
        factory: DecoderFactory,
    ) {
        self.decoders.register(codec_id, name.into(), factory);
    }

    /// 登记一个编码器
    pub fn register_encoder(
        &mut self,
        codec_id: CodecId,
        name: impl Into<String>,
        factory: EncoderFactory,
    ) {
        self.encoders.register(codec_id, name.into(), factory);
    }

    /// 创建指定标识的解码器 (优先级最高的实现)
    pub fn create_decoder(&self, codec_id: CodecId) -> TaoResult<Box<dyn Decoder>> {
        let factory = self
            .decoders
            .first(codec_id)
            .ok_or_else(|| TaoError::CodecNotFound(format!("未找到 {} 的解码器", codec_id)))?;
        factory()
    }

    /// 创建指定标识的编码器 (优先级最高的实现)
    pub fn create_encoder(&self, codec_id: CodecId) -> TaoResult<Box<dyn Encoder>> {
        let factory = self
            .encoders
            .first(codec_id)
            .ok_or_else(|| TaoError::CodecNotFound(format!("未找到 {} 的编码器", codec_id)))?;
        factory()
    }

    /// 按实现名称创建解码器
    pub fn create_decoder_by_name(&self, name: &str) -> TaoResult<Box<dyn Decoder>> {
        let factory = self
            .decoders
            .by_name(name)
            .ok_or_else(|| TaoError::CodecNotFound(format!("未找到名为 '{}' 的解码器", name)))?;
        factory()
    }

    /// 按实现名称创建编码器
    pub fn create_encoder_by_name(&self, name: &str) -> TaoResult<Box<dyn Encoder>> {
        let factory = self
            .encoders
            .by_name(name)
            .ok_or_else(|| TaoError::CodecNotFound(format!("未找到名为 '{}' 的编码器", name)))?;
        factory()
    }

    /// 所有已登记的解码器 (标识, 名称)
    pub fn list_decoders(&self) -> Vec<(CodecId, &str)> {
        self.decoders.list()
    }

    /// 所有已登记的编码器 (标识, 名称)
    pub fn list_encoders(&self) -> Vec<(CodecId, &str)> {
        self.encoders.list()
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

    fn registry() -> CodecRegistry {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);
        registry
    }

    #[test]
    fn test_注册所有编解码器() {
        let registry = registry();
        assert_eq!(registry.list_decoders(), vec![(CodecId::Lc3, "lc3")]);
        assert_eq!(registry.list_encoders(), vec![(CodecId::Lc3, "lc3")]);
    }

    #[test]
    fn test_按codec_id创建编解码器() {
        let registry = registry();
        let dec = registry.create_decoder(CodecId::Lc3).unwrap();
        assert_eq!(dec.codec_id(), CodecId::Lc3);
        let enc = registry.create_encoder(CodecId::Lc3).unwrap();
        assert_eq!(enc.codec_id(), CodecId::Lc3);
    }

    #[test]
    fn test_后注册的同名实现优先级较低() {
        let mut registry = registry();
        registry.register_decoder(CodecId::Lc3, "lc3_alt", crate::Lc3Decoder::create);

        let names: Vec<_> = registry.list_decoders().into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["lc3", "lc3_alt"]);
        assert_eq!(registry.create_decoder(CodecId::Lc3).unwrap().name(), "lc3");
        assert!(registry.create_decoder_by_name("lc3_alt").is_ok());
    }

    #[test]
    fn test_未注册的编解码器返回错误() {
        let registry = CodecRegistry::new();
        assert!(matches!(
            registry.create_decoder(CodecId::Lc3),
            Err(TaoError::CodecNotFound(_))
        ));
        assert!(registry.create_encoder(CodecId::None).is_err());
        assert!(registry.create_encoder_by_name("opus").is_err());
    }
}
