//! # Tao LC3
//!
//! 纯 Rust 实现的 LC3 (Low Complexity Communication Codec) 音频编解码器.
//!
//! - **帧级编解码**: 单声道帧编码器/解码器, 支持 2.5/5/7.5/10 ms 帧长,
//!   8 ~ 48 kHz 采样率, 每帧 20 ~ 400 字节
//! - **丢帧隐藏**: 帧丢失或码流损坏时输出隐藏结果
//! - **编解码器框架**: 多声道 [`codec::Lc3Encoder`] / [`codec::Lc3Decoder`], 可通过注册表创建
//!
//! # 快速开始
//!
//! ```rust
//! use tao::codec::lc3::{FrameDecoder, FrameEncoder, Lc3Config};
//!
//! let config = Lc3Config::new(10000, 48000, 0).unwrap();
//! let mut encoder = FrameEncoder::new(config).unwrap();
//! let mut decoder = FrameDecoder::new(config).unwrap();
//!
//! let pcm = vec![0.0f32; config.ns_pcm()];
//! let frame = encoder.encode(&pcm, 100).unwrap();
//! let mut out = vec![0.0f32; config.ns_pcm()];
//! decoder.decode(Some(&frame), &mut out).unwrap();
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tao-core` | 核心类型与错误定义 |
//! | `tao-codec` | LC3 编解码核心与编解码器框架 |

pub mod lc3bin;
pub mod logging;

/// 核心类型与工具
pub use tao_core as core;

/// LC3 编解码核心与编解码器框架
pub use tao_codec as codec;

/// 获取版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置编解码器的注册表
pub fn default_codec_registry() -> tao_codec::CodecRegistry {
    let mut registry = tao_codec::CodecRegistry::new();
    tao_codec::register_all(&mut registry);
    registry
}
