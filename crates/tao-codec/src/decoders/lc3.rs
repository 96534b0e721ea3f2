//! LC3 音频解码器.
//!
//! 数据包为各声道 LC3 帧的顺序拼接, 每声道字节数相同.
//! 码流损坏的声道输出隐藏结果而不报错; 整帧丢失通过 [`Decoder::decode_lost`] 通知.

use log::{debug, warn};
use tao_core::timestamp::NOPTS_VALUE;
use tao_core::{ChannelLayout, Rational, SampleFormat, TaoError, TaoResult, Timestamp};

use crate::codec_id::CodecId;
use crate::codec_parameters::{CodecParameters, CodecParamsType};
use crate::decoder::Decoder;
use crate::frame::{AudioFrame, Frame};
use crate::lc3::{self, DecodeStatus, ExtraData, FrameDecoder, FrameDuration, Lc3Config, PcmFormat};
use crate::packet::Packet;

/// LC3 解码器
pub struct Lc3Decoder {
    /// 采样率
    sample_rate: u32,
    /// 声道布局
    channel_layout: ChannelLayout,
    /// 输出采样格式
    output_format: SampleFormat,
    /// 每帧每声道采样数
    frame_samples: usize,
    /// 每声道帧字节数, 0 表示由数据包长度推断
    frame_bytes: usize,
    /// 各声道的帧解码器
    decoders: Vec<FrameDecoder>,
    /// 输出帧缓冲
    output_frame: Option<Frame>,
    /// 下一帧的 PTS, 丢帧时沿用
    next_pts: i64,
    /// 连续隐藏的帧数
    concealed_frames: u64,
    /// 是否已打开
    opened: bool,
    /// 是否已收到刷新信号
    flushing: bool,
}

impl Default for Lc3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Lc3Decoder {
    /// 创建未打开的解码器
    ///
    /// 需要读取 [`Lc3Decoder::concealed_frames`] 时直接持有具体类型.
    pub fn new() -> Self {
        Self {
            sample_rate: 0,
            channel_layout: ChannelLayout::MONO,
            output_format: SampleFormat::S16,
            frame_samples: 0,
            frame_bytes: 0,
            decoders: Vec::new(),
            output_frame: None,
            next_pts: 0,
            concealed_frames: 0,
            opened: false,
            flushing: false,
        }
    }

    /// 创建 LC3 解码器实例
    pub fn create() -> TaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self::new()))
    }

    /// 连续隐藏的帧数 (正常解码一帧后清零)
    pub fn concealed_frames(&self) -> u64 {
        self.concealed_frames
    }

    fn check_ready(&self) -> TaoResult<()> {
        if !self.opened {
            return Err(TaoError::Codec("解码器未打开, 请先调用 open()".into()));
        }
        if self.output_frame.is_some() {
            return Err(TaoError::NeedMoreData);
        }
        Ok(())
    }

    fn pcm_format(&self) -> PcmFormat {
        match self.output_format {
            SampleFormat::F32 => PcmFormat::F32,
            // S32 输出先按 24 位写入, 再左移对齐
            SampleFormat::S32 => PcmFormat::S24,
            _ => PcmFormat::S16,
        }
    }

    /// 解码所有声道并生成交错输出帧, `data` 为 `None` 表示丢帧
    fn decode_channels(&mut self, data: Option<&[u8]>, pts: i64) -> TaoResult<()> {
        let channels = self.channel_layout.channels as usize;
        let fmt = self.pcm_format();
        let bps = fmt.bytes_per_sample();
        let mut out = vec![0u8; self.frame_samples * channels * bps];

        let per_channel = match data {
            Some(d) => {
                if d.len() % channels != 0 {
                    return Err(TaoError::InvalidData(format!(
                        "LC3 数据包长度 {} 不能按 {} 声道均分",
                        d.len(),
                        channels
                    )));
                }
                let n = d.len() / channels;
                if self.frame_bytes != 0 && n != self.frame_bytes {
                    return Err(TaoError::InvalidData(format!(
                        "LC3 每声道帧字节数应为 {}, 实际 {}",
                        self.frame_bytes, n
                    )));
                }
                lc3::check_frame_bytes(n)?;
                Some(n)
            }
            None => None,
        };

        let mut concealed = false;
        for (ch, dec) in self.decoders.iter_mut().enumerate() {
            let frame = match (data, per_channel) {
                (Some(d), Some(n)) => Some(&d[ch * n..(ch + 1) * n]),
                _ => None,
            };
            let status = dec.decode_pcm(frame, fmt, &mut out, ch, channels)?;
            concealed |= status == DecodeStatus::Concealed;
        }

        if concealed {
            self.concealed_frames += 1;
            if data.is_some() {
                let ts = Timestamp::new(pts, Rational::per_sample(self.sample_rate));
                warn!("LC3 数据包损坏, 已执行丢帧隐藏 ({})", ts);
            }
        } else {
            self.concealed_frames = 0;
        }

        if self.output_format == SampleFormat::S32 {
            for s in out.chunks_exact_mut(4) {
                let v = i32::from_le_bytes([s[0], s[1], s[2], s[3]]) << 8;
                s.copy_from_slice(&v.to_le_bytes());
            }
        }

        let mut frame = AudioFrame::new(
            self.frame_samples as u32,
            self.sample_rate,
            self.output_format,
            self.channel_layout,
        );
        frame.pts = pts;
        frame.time_base = Rational::per_sample(self.sample_rate);
        frame.duration = self.frame_samples as i64;
        frame.data[0] = out;

        self.next_pts = pts.saturating_add(self.frame_samples as i64);
        self.output_frame = Some(Frame::Audio(frame));
        Ok(())
    }
}

impl Decoder for Lc3Decoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Lc3
    }

    fn name(&self) -> &str {
        "lc3"
    }

    fn open(&mut self, params: &CodecParameters) -> TaoResult<()> {
        let audio = match &params.params {
            CodecParamsType::Audio(a) => a,
            _ => {
                return Err(TaoError::InvalidArgument("LC3 解码器需要音频参数".into()));
            }
        };

        let channels = audio.channel_layout.channels;
        if channels == 0 {
            return Err(TaoError::InvalidArgument("声道数不能为 0".into()));
        }

        let output_format = match audio.sample_format {
            SampleFormat::None | SampleFormat::S16 => SampleFormat::S16,
            SampleFormat::S32 => SampleFormat::S32,
            SampleFormat::F32 => SampleFormat::F32,
            other => {
                return Err(TaoError::Unsupported(format!(
                    "LC3 解码器不支持输出格式 {}",
                    other
                )));
            }
        };

        let (duration_us, frame_bytes) = if params.extra_data.is_empty() {
            let duration_us = match audio.frame_size {
                0 => 10000,
                n => {
                    let mut found = None;
                    for dt_us in FrameDuration::ALL.map(FrameDuration::us) {
                        if lc3::frame_samples(dt_us, audio.sample_rate)? == n as usize {
                            found = Some(dt_us);
                        }
                    }
                    found.ok_or_else(|| {
                        TaoError::InvalidArgument(format!(
                            "LC3 不支持的帧长: {} 采样 ({} Hz)",
                            n, audio.sample_rate
                        ))
                    })?
                }
            };
            let frame_bytes = if params.bit_rate == 0 {
                0
            } else {
                let per_channel = (params.bit_rate / channels as u64).min(u32::MAX as u64) as u32;
                lc3::frame_bytes(duration_us, per_channel)?
            };
            (duration_us, frame_bytes)
        } else {
            let extra = ExtraData::parse(&params.extra_data)?;
            (extra.duration_us, extra.frame_bytes)
        };

        let config = Lc3Config::new(duration_us, audio.sample_rate, 0)?;
        let decoders = (0..channels)
            .map(|_| FrameDecoder::new(config))
            .collect::<TaoResult<Vec<_>>>()?;

        self.sample_rate = audio.sample_rate;
        self.channel_layout = audio.channel_layout;
        self.output_format = output_format;
        self.frame_samples = config.ns_pcm();
        self.frame_bytes = frame_bytes;
        self.decoders = decoders;
        self.output_frame = None;
        self.next_pts = 0;
        self.concealed_frames = 0;
        self.opened = true;
        self.flushing = false;

        debug!(
            "打开 LC3 解码器: {} Hz, {} 声道, 帧长 {} us, 输出格式={}",
            self.sample_rate, channels, duration_us, self.output_format,
        );
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> TaoResult<()> {
        self.check_ready()?;

        // 空包 = flush
        if packet.is_empty() {
            self.flushing = true;
            return Ok(());
        }

        let pts = if packet.pts == NOPTS_VALUE {
            self.next_pts
        } else {
            packet.pts
        };
        self.decode_channels(Some(&packet.data), pts)
    }

    fn decode_lost(&mut self) -> TaoResult<()> {
        self.check_ready()?;
        let pts = self.next_pts;
        self.decode_channels(None, pts)
    }

    fn receive_frame(&mut self) -> TaoResult<Frame> {
        if let Some(frame) = self.output_frame.take() {
            return Ok(frame);
        }
        if self.flushing {
            return Err(TaoError::Eof);
        }
        Err(TaoError::NeedMoreData)
    }

    fn flush(&mut self) {
        self.output_frame = None;
        self.flushing = false;
        self.concealed_frames = 0;
        let config = self.decoders.first().map(|d| *d.config());
        if let Some(config) = config {
            self.decoders = (0..self.channel_layout.channels)
                .filter_map(|_| FrameDecoder::new(config).ok())
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec_parameters::AudioCodecParams;
    use crate::lc3::FrameEncoder;

    fn make_lc3_params(sample_rate: u32, channels: u32, sample_format: SampleFormat) -> CodecParameters {
        CodecParameters {
            codec_id: CodecId::Lc3,
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

    /// 用帧编码器生成一个 16 kHz / 10 ms 的数据包
    fn encode_packet(encoders: &mut [FrameEncoder], start: usize, nbytes: usize) -> Packet {
        let mut data = Vec::new();
        for (ch, enc) in encoders.iter_mut().enumerate() {
            let freq = 300.0 * (ch + 1) as f32;
            let x: Vec<f32> = (start..start + 160)
                .map(|i| 8000.0 * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
                .collect();
            data.extend(enc.encode(&x, nbytes).unwrap());
        }
        let mut pkt = Packet::from_data(data);
        pkt.pts = start as i64;
        pkt
    }

    fn frame_encoders(channels: usize) -> Vec<FrameEncoder> {
        let config = Lc3Config::new(10000, 16000, 0).unwrap();
        (0..channels)
            .map(|_| FrameEncoder::new(config).unwrap())
            .collect()
    }

    #[test]
    fn test_解码立体声() {
        let mut dec = Lc3Decoder::create().unwrap();
        dec.open(&make_lc3_params(16000, 2, SampleFormat::S16)).unwrap();
        let mut encoders = frame_encoders(2);

        for k in 0..3 {
            let pkt = encode_packet(&mut encoders, k * 160, 40);
            dec.send_packet(&pkt).unwrap();
            let Frame::Audio(af) = dec.receive_frame().unwrap();
            assert_eq!(af.nb_samples, 160);
            assert_eq!(af.sample_format, SampleFormat::S16);
            assert_eq!(af.data[0].len(), 160 * 2 * 2);
            assert_eq!(af.pts, (k * 160) as i64);
        }
        assert!(matches!(dec.receive_frame(), Err(TaoError::NeedMoreData)));

        dec.send_packet(&Packet::empty()).unwrap();
        assert!(matches!(dec.receive_frame(), Err(TaoError::Eof)));
    }

    #[test]
    fn test_丢帧通知() {
        let mut dec = Lc3Decoder::new();
        dec.open(&make_lc3_params(16000, 1, SampleFormat::F32)).unwrap();
        let mut encoders = frame_encoders(1);

        dec.send_packet(&encode_packet(&mut encoders, 0, 40)).unwrap();
        dec.receive_frame().unwrap();

        dec.decode_lost().unwrap();
        let Frame::Audio(af) = dec.receive_frame().unwrap();
        assert_eq!(af.pts, 160);
        assert_eq!(af.data[0].len(), 160 * 4);
        assert_eq!(dec.concealed_frames(), 1);

        dec.send_packet(&encode_packet(&mut encoders, 320, 40)).unwrap();
        dec.receive_frame().unwrap();
        assert_eq!(dec.concealed_frames(), 0);
    }

    #[test]
    fn test_数据包长度校验() {
        let mut dec = Lc3Decoder::create().unwrap();
        dec.open(&make_lc3_params(16000, 2, SampleFormat::S16)).unwrap();
        assert!(matches!(
            dec.send_packet(&Packet::from_data(vec![0u8; 81])),
            Err(TaoError::InvalidData(_))
        ));
        assert!(dec.send_packet(&Packet::from_data(vec![0u8; 20])).is_err());
    }

    #[test]
    fn test_额外数据与码率() {
        let mut params = make_lc3_params(48000, 1, SampleFormat::S32);
        params.extra_data = ExtraData::new(7500, 60).unwrap().to_bytes();
        let mut dec = Lc3Decoder::create().unwrap();
        dec.open(&params).unwrap();
        assert!(matches!(
            dec.send_packet(&Packet::from_data(vec![0u8; 40])),
            Err(TaoError::InvalidData(_))
        ));

        let config = Lc3Config::new(7500, 48000, 0).unwrap();
        let mut enc = FrameEncoder::new(config).unwrap();
        let frame = enc.encode(&vec![0.0; 360], 60).unwrap();
        dec.send_packet(&Packet::from_data(frame)).unwrap();
        let Frame::Audio(af) = dec.receive_frame().unwrap();
        assert_eq!(af.nb_samples, 360);
        assert_eq!(af.sample_format, SampleFormat::S32);
    }

    #[test]
    fn test_短帧由帧长推断() {
        // 16 kHz 下 80 采样为 5 ms
        let mut params = make_lc3_params(16000, 1, SampleFormat::S16);
        if let CodecParamsType::Audio(a) = &mut params.params {
            a.frame_size = 80;
        }
        let mut dec = Lc3Decoder::create().unwrap();
        dec.open(&params).unwrap();

        let config = Lc3Config::new(5000, 16000, 0).unwrap();
        let mut enc = FrameEncoder::new(config).unwrap();
        let frame = enc.encode(&vec![0.0; 80], 30).unwrap();
        dec.send_packet(&Packet::from_data(frame)).unwrap();
        let Frame::Audio(af) = dec.receive_frame().unwrap();
        assert_eq!(af.nb_samples, 80);
    }

    #[test]
    fn test_未打开() {
        let mut dec = Lc3Decoder::new();
        assert!(matches!(dec.decode_lost(), Err(TaoError::Codec(_))));
        assert!(matches!(
            dec.send_packet(&Packet::from_data(vec![0u8; 40])),
            Err(TaoError::Codec(_))
        ));
    }
}
