//! 解码器 trait 定义.

use tao_core::{TaoError, TaoResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::Frame;
use crate::packet::Packet;

/// 解码器 trait
///
/// 注册表中的工厂函数返回 `Box<dyn Decoder>`. 一个数据包解码为一帧:
/// `send_packet()` 之后必须先 `receive_frame()` 取走输出, 才能送入下一个包.
/// 送入空包表示刷新, 之后 `receive_frame()` 返回 `Eof`.
pub trait Decoder: Send {
    /// 获取解码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 使用参数配置解码器
    ///
    /// LC3 码流没有自描述的帧头, 采样率、声道数与帧时长都来自这里.
    fn open(&mut self, params: &CodecParameters) -> TaoResult<()>;

    /// 送入一个压缩数据包
    ///
    /// 上一帧输出尚未取走时返回 `NeedMoreData`.
    fn send_packet(&mut self, packet: &Packet) -> TaoResult<()>;

    /// 通知丢失一个数据包, 由丢帧隐藏生成该时段的输出帧
    ///
    /// 不支持丢帧隐藏的解码器返回 `Unsupported`.
    fn decode_lost(&mut self) -> TaoResult<()> {
        Err(TaoError::Unsupported(format!(
            "解码器 {} 不支持丢帧隐藏",
            self.name()
        )))
    }

    /// 取出一帧解码数据, 无输出时返回 `NeedMoreData`, 刷新后返回 `Eof`
    fn receive_frame(&mut self) -> TaoResult<Frame>;

    /// 丢弃缓存的帧和跨帧状态 (重叠缓冲、长时后置滤波与丢帧隐藏历史)
    fn flush(&mut self);
}
