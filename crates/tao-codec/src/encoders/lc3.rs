//! LC3 音频编码器.
//!
//! 将 PCM 音频帧编码为 LC3 帧. 每个声道一个独立的 [`FrameEncoder`],
//! 输出数据包按声道顺序拼接各声道的帧, 每声道固定 `frame_bytes` 字节.
//!
//! 帧字节数来源 (按优先级):
//! - `extra_data` (见 [`ExtraData`]), 同时决定帧时长
//! - `bit_rate` 按声道均分后换算
//!
//! 帧时长由 `frame_size` 决定: 0 为 10 ms, 否则须等于某一帧时长 (2.5/5/7.5/10 ms) 对应的采样数.

use std::collections::VecDeque;

use bytes::Bytes;
use log::debug;
use tao_core::{Rational, SampleFormat, TaoError, TaoResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::{CodecParameters, CodecParamsType};
use crate::encoder::Encoder;
use crate::frame::{AudioFrame, Frame};
use crate::lc3::{self, ExtraData, FrameDuration, FrameEncoder, Lc3Config};
use crate::packet::Packet;

/// LC3 编码器
pub struct Lc3Encoder {
    /// 采样率
    sample_rate: u32,
    /// 声道数
    channels: usize,
    /// 每帧每声道采样数
    frame_samples: usize,
    /// 每帧每声道字节数
    frame_bytes: usize,
    /// 各声道的帧编码器
    encoders: Vec<FrameEncoder>,
    /// 输入缓冲 (每声道一个, 收集不足一帧的样本)
    input_buffer: Vec<Vec<f32>>,
    /// 待取出的数据包
    output_packets: VecDeque<Packet>,
    /// 下一个数据包的 PTS (以采样为单位)
    next_pts: i64,
    /// 是否已打开
    opened: bool,
    /// 是否已收到刷新信号
    flushing: bool,
}

impl Lc3Encoder {
    /// 创建 LC3 编码器实例
    pub fn create() -> TaoResult<Box<dyn Encoder>> {
        Ok(Box::new(Self {
            sample_rate: 0,
            channels: 0,
            frame_samples: 0,
            frame_bytes: 0,
            encoders: Vec::new(),
            input_buffer: Vec::new(),
            output_packets: VecDeque::new(),
            next_pts: 0,
            opened: false,
            flushing: false,
        }))
    }

    /// 由 `frame_size` 推断帧时长 (微秒)
    fn duration_from_frame_size(sample_rate: u32, frame_size: u32) -> TaoResult<u32> {
        if frame_size == 0 {
            return Ok(10000);
        }
        for dt_us in FrameDuration::ALL.map(FrameDuration::us) {
            if lc3::frame_samples(dt_us, sample_rate)? == frame_size as usize {
                return Ok(dt_us);
            }
        }
        Err(TaoError::InvalidArgument(format!(
            "LC3 不支持的帧长: {} 采样 ({} Hz)",
            frame_size, sample_rate
        )))
    }

    /// 从 AudioFrame 提取各声道样本, 统一为 16 位满幅的 f32
    fn extract_samples(&self, frame: &AudioFrame) -> TaoResult<Vec<Vec<f32>>> {
        let convert: fn(&[u8]) -> f32 = match frame.sample_format {
            SampleFormat::S16 | SampleFormat::S16p => |b: &[u8]| i16::from_le_bytes([b[0], b[1]]) as f32,
            SampleFormat::S32 | SampleFormat::S32p => {
                |b: &[u8]| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 65536.0
            }
            SampleFormat::F32 | SampleFormat::F32p => {
                |b: &[u8]| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) * 32768.0
            }
            other => {
                return Err(TaoError::Unsupported(format!(
                    "LC3 编码器不支持采样格式 {}",
                    other
                )));
            }
        };

        let ch = self.channels;
        let nb = frame.nb_samples as usize;
        let bps = frame.sample_format.bytes_per_sample() as usize;
        let mut result = vec![Vec::with_capacity(nb); ch];

        if frame.sample_format.is_planar() {
            if frame.data.len() < ch {
                return Err(TaoError::InvalidData("音频平面数不足".into()));
            }
            for (plane, out) in frame.data.iter().zip(result.iter_mut()) {
                if plane.len() < nb * bps {
                    return Err(TaoError::InvalidData("音频数据长度不足".into()));
                }
                out.extend(plane[..nb * bps].chunks_exact(bps).map(convert));
            }
        } else {
            let data = frame
                .data
                .first()
                .ok_or_else(|| TaoError::InvalidData("音频帧没有数据".into()))?;
            if data.len() < nb * ch * bps {
                return Err(TaoError::InvalidData("音频数据长度不足".into()));
            }
            for (i, sample) in data[..nb * ch * bps].chunks_exact(bps).enumerate() {
                result[i % ch].push(convert(sample));
            }
        }

        Ok(result)
    }

    /// 编码输入缓冲中所有完整的帧
    fn encode_buffered(&mut self) -> TaoResult<()> {
        let n = self.frame_samples;
        while self.input_buffer[0].len() >= n {
            let mut payload = Vec::with_capacity(self.frame_bytes * self.channels);
            for (enc, input) in self.encoders.iter_mut().zip(self.input_buffer.iter_mut()) {
                let frame = enc.encode(&input[..n], self.frame_bytes)?;
                payload.extend_from_slice(&frame);
                input.drain(..n);
            }

            let mut pkt = Packet::from_data(Bytes::from(payload));
            pkt.pts = self.next_pts;
            pkt.dts = self.next_pts;
            pkt.duration = n as i64;
            pkt.time_base = Rational::per_sample(self.sample_rate);
            pkt.is_keyframe = true;
            self.output_packets.push_back(pkt);
            self.next_pts += n as i64;
        }
        Ok(())
    }
}

impl Encoder for Lc3Encoder {
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
                return Err(TaoError::InvalidArgument("LC3 编码器需要音频参数".into()));
            }
        };

        let channels = audio.channel_layout.channels as usize;
        if channels == 0 {
            return Err(TaoError::InvalidArgument("声道数不能为 0".into()));
        }

        let (duration_us, frame_bytes) = if params.extra_data.is_empty() {
            let duration_us = Self::duration_from_frame_size(audio.sample_rate, audio.frame_size)?;
            if params.bit_rate == 0 {
                return Err(TaoError::InvalidArgument(
                    "LC3 编码器需要码率或额外数据".into(),
                ));
            }
            let per_channel = (params.bit_rate / channels as u64).min(u32::MAX as u64) as u32;
            (duration_us, lc3::frame_bytes(duration_us, per_channel)?)
        } else {
            let extra = ExtraData::parse(&params.extra_data)?;
            (extra.duration_us, extra.frame_bytes)
        };

        let config = Lc3Config::new(duration_us, audio.sample_rate, 0)?;
        let encoders = (0..channels)
            .map(|_| FrameEncoder::new(config))
            .collect::<TaoResult<Vec<_>>>()?;

        self.sample_rate = audio.sample_rate;
        self.channels = channels;
        self.frame_samples = config.ns_pcm();
        self.frame_bytes = frame_bytes;
        self.encoders = encoders;
        self.input_buffer = vec![Vec::new(); channels];
        self.output_packets.clear();
        self.next_pts = 0;
        self.opened = true;
        self.flushing = false;

        debug!(
            "打开 LC3 编码器: {} Hz, {} 声道, 帧长 {} us, 每声道 {} 字节",
            self.sample_rate, self.channels, duration_us, self.frame_bytes,
        );
        Ok(())
    }

    fn send_frame(&mut self, frame: Option<&Frame>) -> TaoResult<()> {
        if !self.opened {
            return Err(TaoError::Codec("编码器未打开, 请先调用 open()".into()));
        }

        let frame = match frame {
            Some(f) => f,
            None => {
                self.flushing = true;
                if !self.input_buffer[0].is_empty() {
                    let n = self.frame_samples;
                    for input in &mut self.input_buffer {
                        input.resize(n, 0.0);
                    }
                    self.encode_buffered()?;
                }
                return Ok(());
            }
        };

        let Frame::Audio(audio) = frame;
        if audio.sample_rate != 0 && audio.sample_rate != self.sample_rate {
            return Err(TaoError::InvalidArgument(format!(
                "LC3 编码器采样率为 {} Hz, 输入帧为 {} Hz",
                self.sample_rate, audio.sample_rate
            )));
        }

        let samples = self.extract_samples(audio)?;
        for (buf, s) in self.input_buffer.iter_mut().zip(samples) {
            buf.extend_from_slice(&s);
        }
        self.encode_buffered()
    }

    fn frame_size(&self) -> usize {
        self.frame_samples
    }

    fn delay(&self) -> usize {
        self.encoders.first().map_or(0, |e| e.config().delay())
    }

    fn receive_packet(&mut self) -> TaoResult<Packet> {
        if let Some(pkt) = self.output_packets.pop_front() {
            return Ok(pkt);
        }
        if self.flushing {
            return Err(TaoError::Eof);
        }
        Err(TaoError::NeedMoreData)
    }

    fn flush(&mut self) {
        self.output_packets.clear();
        self.flushing = false;
        self.next_pts = 0;
        for v in &mut self.input_buffer {
            v.clear();
        }
        if self.opened {
            let config = self.encoders.first().map(|e| *e.config());
            if let Some(config) = config {
                self.encoders = (0..self.channels)
                    .filter_map(|_| FrameEncoder::new(config).ok())
                    .collect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec_parameters::AudioCodecParams;
    use tao_core::ChannelLayout;

    fn make_lc3_params(
        sample_rate: u32,
        channels: u32,
        sample_format: SampleFormat,
        bit_rate: u64,
    ) -> CodecParameters {
        CodecParameters {
            codec_id: CodecId::Lc3,
            extra_data: Vec::new(),
            bit_rate,
            params: CodecParamsType::Audio(AudioCodecParams {
                sample_rate,
                channel_layout: ChannelLayout::from_channels(channels),
                sample_format,
                frame_size: 0,
            }),
        }
    }

    fn make_s16_frame(samples: &[i16], channels: u32, sample_rate: u32) -> Frame {
        let nb = samples.len() as u32 / channels;
        let mut af = AudioFrame::new(
            nb,
            sample_rate,
            SampleFormat::S16,
            ChannelLayout::from_channels(channels),
        );
        af.data[0] = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Frame::Audio(af)
    }

    #[test]
    fn test_创建与打开() {
        let params = make_lc3_params(48000, 2, SampleFormat::S16, 192000);
        let mut enc = Lc3Encoder::create().unwrap();
        assert_eq!(enc.frame_size(), 0);
        enc.open(&params).unwrap();
        assert_eq!(enc.codec_id(), CodecId::Lc3);
        assert_eq!(enc.name(), "lc3");
        assert_eq!(enc.frame_size(), 480);
        assert_eq!(enc.delay(), 120);
    }

    #[test]
    fn test_未打开时拒绝输入() {
        let mut enc = Lc3Encoder::create().unwrap();
        let frame = make_s16_frame(&[0; 160], 1, 16000);
        assert!(matches!(
            enc.send_frame(Some(&frame)),
            Err(TaoError::Codec(_))
        ));
    }

    #[test]
    fn test_按帧输出数据包() {
        // 16 kHz / 10 ms: 每帧 160 采样, 32 kbps 单声道为 40 字节
        let params = make_lc3_params(16000, 1, SampleFormat::S16, 32000);
        let mut enc = Lc3Encoder::create().unwrap();
        enc.open(&params).unwrap();

        let frame = make_s16_frame(&[100; 400], 1, 16000);
        enc.send_frame(Some(&frame)).unwrap();

        let p0 = enc.receive_packet().unwrap();
        let p1 = enc.receive_packet().unwrap();
        assert_eq!(p0.size(), 40);
        assert_eq!(p0.pts, 0);
        assert_eq!(p1.pts, 160);
        assert_eq!(p1.duration, 160);
        assert!(matches!(enc.receive_packet(), Err(TaoError::NeedMoreData)));

        // 剩余 80 采样在刷新时补零编码
        enc.send_frame(None).unwrap();
        let p2 = enc.receive_packet().unwrap();
        assert_eq!(p2.pts, 320);
        assert!(matches!(enc.receive_packet(), Err(TaoError::Eof)));
    }

    #[test]
    fn test_短帧由帧长推断() {
        // 32 kHz: 80 采样为 2.5 ms, 160 采样为 5 ms
        for (frame_size, dt_us, nbytes) in [(80u32, 2500u32, 20usize), (160, 5000, 40)] {
            let mut params = make_lc3_params(32000, 1, SampleFormat::S16, 64000);
            if let CodecParamsType::Audio(a) = &mut params.params {
                a.frame_size = frame_size;
            }
            let mut enc = Lc3Encoder::create().unwrap();
            enc.open(&params).unwrap();
            assert_eq!(enc.frame_size(), frame_size as usize);
            let frame = make_s16_frame(&vec![100; frame_size as usize], 1, 32000);
            enc.send_frame(Some(&frame)).unwrap();
            let pkt = enc.receive_packet().unwrap();
            assert_eq!(pkt.size(), nbytes, "{} us", dt_us);
            assert_eq!(pkt.duration, frame_size as i64);
        }
    }

    #[test]
    fn test_多声道拼接() {
        let params = make_lc3_params(48000, 2, SampleFormat::S16, 2 * 80000);
        let mut enc = Lc3Encoder::create().unwrap();
        enc.open(&params).unwrap();
        let frame = make_s16_frame(&[0; 480 * 2], 2, 48000);
        enc.send_frame(Some(&frame)).unwrap();
        let pkt = enc.receive_packet().unwrap();
        assert_eq!(pkt.size(), 2 * 100);
    }

    #[test]
    fn test_额外数据指定帧长() {
        let mut params = make_lc3_params(48000, 1, SampleFormat::F32p, 0);
        params.extra_data = ExtraData::new(7500, 75).unwrap().to_bytes();
        let mut enc = Lc3Encoder::create().unwrap();
        enc.open(&params).unwrap();

        let mut af = AudioFrame::new(360, 48000, SampleFormat::F32p, ChannelLayout::MONO);
        af.data[0] = (0..360)
            .flat_map(|i| (0.1 * (i as f32 * 0.05).sin()).to_le_bytes())
            .collect();
        enc.send_frame(Some(&Frame::Audio(af))).unwrap();
        let pkt = enc.receive_packet().unwrap();
        assert_eq!(pkt.size(), 75);
        assert_eq!(pkt.duration, 360);
    }

    #[test]
    fn test_非法参数() {
        let mut enc = Lc3Encoder::create().unwrap();
        assert!(enc.open(&make_lc3_params(22050, 1, SampleFormat::S16, 32000)).is_err());
        assert!(enc.open(&make_lc3_params(16000, 1, SampleFormat::S16, 0)).is_err());

        let mut params = make_lc3_params(16000, 1, SampleFormat::S16, 32000);
        if let CodecParamsType::Audio(a) = &mut params.params {
            a.frame_size = 100;
        }
        assert!(enc.open(&params).is_err());

        let mut params = make_lc3_params(16000, 1, SampleFormat::S16, 32000);
        params.extra_data = vec![0x10, 0x27];
        assert!(matches!(enc.open(&params), Err(TaoError::InvalidData(_))));
    }
}
