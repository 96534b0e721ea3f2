//! # tao-codec
//!
//! Tao LC3 编解码器库, 提供 LC3 帧级编解码核心以及 Packet/Frame 编解码器框架.
//!
//! - [`lc3`]: 单声道帧编解码 (MDCT、SNS、TNS、LTPF、算术编码、丢帧隐藏)
//! - [`encoders`] / [`decoders`]: 基于 [`Encoder`] / [`Decoder`] trait 的多声道封装
//!
//! ## 使用示例
//!
//! ```rust
//! use tao_codec::{CodecRegistry, CodecId};
//!
//! let mut reg = CodecRegistry::new();
//! tao_codec::register_all(&mut reg);
//!
//! // 按 CodecId 创建编解码器实例
//! let decoder = reg.create_decoder(CodecId::Lc3).unwrap();
//! let encoder = reg.create_encoder(CodecId::Lc3).unwrap();
//! ```

pub mod codec_id;
pub mod codec_parameters;
pub mod decoder;
pub mod decoders;
pub mod encoder;
pub mod encoders;
pub mod frame;
pub mod lc3;
pub mod packet;
pub mod registry;

// 重导出常用类型
pub use codec_id::CodecId;
pub use codec_parameters::{AudioCodecParams, CodecParameters, CodecParamsType};
pub use decoder::Decoder;
pub use decoders::lc3::Lc3Decoder;
pub use encoder::Encoder;
pub use encoders::lc3::Lc3Encoder;
pub use frame::{AudioFrame, Frame};
pub use packet::Packet;
pub use registry::CodecRegistry;

/// 注册所有内置编解码器
pub fn register_all(registry: &mut CodecRegistry) {
    decoders::register_all_decoders(registry);
    encoders::register_all_encoders(registry);
}
