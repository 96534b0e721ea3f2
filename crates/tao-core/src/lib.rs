//! # tao-core
//!
//! Tao LC3 核心库, 提供编解码器框架共用的基础类型与统一错误类型.

pub mod channel_layout;
pub mod error;
pub mod media_type;
pub mod rational;
pub mod sample_format;
pub mod timestamp;

// 重导出常用类型
pub use channel_layout::ChannelLayout;
pub use error::{TaoError, TaoResult};
pub use media_type::MediaType;
pub use rational::Rational;
pub use sample_format::SampleFormat;
pub use timestamp::Timestamp;
