//! 编解码器参数.
//!
//! 描述打开编解码器所需的配置, 通常来自容器或命令行.

use tao_core::{ChannelLayout, SampleFormat};

use crate::codec_id::CodecId;

/// 编解码器参数
#[derive(Debug, Clone)]
pub struct CodecParameters {
    /// 编解码器标识
    pub codec_id: CodecId,
    /// 额外数据 (LC3 为帧时长与每声道帧字节数)
    pub extra_data: Vec<u8>,
    /// 码率 (bits/s, 所有声道合计)
    pub bit_rate: u64,
    /// 媒体类型特定参数
    pub params: CodecParamsType,
}

/// 媒体类型特定参数
#[derive(Debug, Clone)]
pub enum CodecParamsType {
    /// 音频参数
    Audio(AudioCodecParams),
    /// 无特定参数
    None,
}

/// 音频编解码器参数
#[derive(Debug, Clone)]
pub struct AudioCodecParams {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道布局
    pub channel_layout: ChannelLayout,
    /// 采样格式
    pub sample_format: SampleFormat,
    /// 每帧采样数 (0 表示由编解码器决定)
    pub frame_size: u32,
}

impl CodecParameters {
    /// 构造音频编解码器参数
    pub fn audio(
        codec_id: CodecId,
        sample_rate: u32,
        channels: u32,
        sample_format: SampleFormat,
    ) -> Self {
        Self {
            codec_id,
            extra_data: Vec::new(),
            bit_rate: 0,
            params: CodecParamsType::Audio(AudioCodecParams {
                sample_rate,
                channel_layout: ChannelLayout::from_channels(channels),
                sample_format,
                frame_size: 0,
            }),
        }
    }

    /// 获取音频参数 (如果是音频流)
    pub fn audio_params(&self) -> Option<&AudioCodecParams> {
        match &self.params {
            CodecParamsType::Audio(a) => Some(a),
            CodecParamsType::None => None,
        }
    }
}
