//! LC3 (Low Complexity Communication Codec) 编解码核心.
//!
//! 单声道帧级编解码: 输入/输出为一帧 PCM 采样, 码流为固定字节数的帧.
//! 多声道由上层 ([`crate::encoders::lc3`], [`crate::decoders::lc3`]) 按声道独立处理.
//!
//! 处理链路:
//! - 编码: MDCT → 能量/带宽检测 → 长时预测分析 → SNS → TNS → 频谱量化与熵编码
//! - 解码: 熵解码 → 反 TNS → 反 SNS → IMDCT → 长时后置滤波, 丢帧时走 PLC

pub mod attdet;
pub mod bits;
pub mod bwdet;
pub mod decoder;
pub mod encoder;
pub mod energy;
pub mod fft;
pub mod ltpf;
pub mod mdct;
pub mod pcm;
pub mod plc;
pub mod sns;
pub mod spec;
pub mod tables;
pub mod tns;

use tao_core::{TaoError, TaoResult};

pub use decoder::{DecodeStatus, FrameDecoder};
pub use encoder::FrameEncoder;
pub use pcm::PcmFormat;

/// 帧最小字节数
pub const MIN_FRAME_BYTES: usize = 20;
/// 帧最大字节数
pub const MAX_FRAME_BYTES: usize = 400;
/// 最大频带数
pub const MAX_BANDS: usize = 64;

/// 帧时长
///
/// 2.5 ms 与 5 ms 为低延迟扩展帧长.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameDuration {
    /// 2.5 ms
    Ms2p5,
    /// 5 ms
    Ms5,
    /// 7.5 ms
    Ms7p5,
    /// 10 ms
    Ms10,
}

impl FrameDuration {
    /// 全部帧时长, 按 [`Self::index`] 排列
    pub const ALL: [Self; 4] = [Self::Ms2p5, Self::Ms5, Self::Ms7p5, Self::Ms10];

    /// 从微秒数解析帧时长
    pub fn from_us(us: u32) -> TaoResult<Self> {
        match us {
            2500 => Ok(Self::Ms2p5),
            5000 => Ok(Self::Ms5),
            7500 => Ok(Self::Ms7p5),
            10000 => Ok(Self::Ms10),
            _ => Err(TaoError::InvalidArgument(format!(
                "LC3: 无效帧时长 {} us",
                us
            ))),
        }
    }

    /// 帧时长 (微秒)
    pub const fn us(self) -> u32 {
        2500 * self.quarters() as u32
    }

    /// 以 2.5 ms 为单位的帧时长 (1..=4)
    pub const fn quarters(self) -> usize {
        self.index() + 1
    }

    /// 表索引 (2.5 ms = 0 ... 10 ms = 3)
    pub const fn index(self) -> usize {
        match self {
            Self::Ms2p5 => 0,
            Self::Ms5 => 1,
            Self::Ms7p5 => 2,
            Self::Ms10 => 3,
        }
    }
}

/// 采样率
///
/// 44.1 kHz 按 48 kHz 的表和帧长处理.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SampleRate {
    Hz8000,
    Hz16000,
    Hz24000,
    Hz32000,
    Hz48000,
}

impl SampleRate {
    /// 全部采样率, 按表索引排列
    pub const ALL: [SampleRate; 5] = [
        Self::Hz8000,
        Self::Hz16000,
        Self::Hz24000,
        Self::Hz32000,
        Self::Hz48000,
    ];

    /// 从 Hz 解析采样率
    pub fn from_hz(hz: u32) -> TaoResult<Self> {
        match hz {
            8000 => Ok(Self::Hz8000),
            16000 => Ok(Self::Hz16000),
            24000 => Ok(Self::Hz24000),
            32000 => Ok(Self::Hz32000),
            44100 | 48000 => Ok(Self::Hz48000),
            96000 => Err(TaoError::Unsupported("LC3: 不支持 96 kHz 高分辨率模式".into())),
            _ => Err(TaoError::InvalidArgument(format!(
                "LC3: 无效采样率 {} Hz",
                hz
            ))),
        }
    }

    /// 名义采样率 (Hz)
    pub const fn hz(self) -> u32 {
        self.khz() as u32 * 1000
    }

    /// 名义采样率 (kHz)
    pub const fn khz(self) -> usize {
        match self {
            Self::Hz8000 => 8,
            Self::Hz16000 => 16,
            Self::Hz24000 => 24,
            Self::Hz32000 => 32,
            Self::Hz48000 => 48,
        }
    }

    /// 表索引 (8 kHz = 0 ... 48 kHz = 4)
    pub const fn index(self) -> usize {
        match self {
            Self::Hz8000 => 0,
            Self::Hz16000 => 1,
            Self::Hz24000 => 2,
            Self::Hz32000 => 3,
            Self::Hz48000 => 4,
        }
    }
}

/// 音频带宽
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bandwidth {
    /// 窄带, 4 kHz
    Nb,
    /// 宽带, 8 kHz
    Wb,
    /// 半超宽带, 12 kHz
    Sswb,
    /// 超宽带, 16 kHz
    Swb,
    /// 全带, 20 kHz
    Fb,
}

impl Bandwidth {
    pub const fn index(self) -> usize {
        match self {
            Self::Nb => 0,
            Self::Wb => 1,
            Self::Sswb => 2,
            Self::Swb => 3,
            Self::Fb => 4,
        }
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Nb),
            1 => Some(Self::Wb),
            2 => Some(Self::Sswb),
            3 => Some(Self::Swb),
            4 => Some(Self::Fb),
            _ => None,
        }
    }

    /// 采样率对应的最大带宽
    pub const fn max_for(sr: SampleRate) -> Self {
        match sr {
            SampleRate::Hz8000 => Self::Nb,
            SampleRate::Hz16000 => Self::Wb,
            SampleRate::Hz24000 => Self::Sswb,
            SampleRate::Hz32000 => Self::Swb,
            SampleRate::Hz48000 => Self::Fb,
        }
    }

    /// 码流中带宽字段的位数
    pub const fn field_bits(sr: SampleRate) -> u32 {
        [0, 1, 2, 2, 3][sr.index()]
    }
}

/// 编解码配置
///
/// `sr` 为编码带宽所用采样率, `sr_pcm` 为 PCM 接口采样率, 二者可以不同
/// (例如以 48 kHz PCM 输入编码 16 kHz 码流).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lc3Config {
    pub dt: FrameDuration,
    pub sr: SampleRate,
    pub sr_pcm: SampleRate,
}

impl Lc3Config {
    /// 创建配置, `pcm_hz` 为 0 时与 `sr_hz` 相同
    pub fn new(dt_us: u32, sr_hz: u32, pcm_hz: u32) -> TaoResult<Self> {
        let dt = FrameDuration::from_us(dt_us)?;
        let sr = SampleRate::from_hz(sr_hz)?;
        let sr_pcm = if pcm_hz == 0 {
            sr
        } else {
            SampleRate::from_hz(pcm_hz)?
        };
        if sr > sr_pcm {
            return Err(TaoError::InvalidArgument(format!(
                "LC3: 编码采样率 {} Hz 高于 PCM 采样率 {} Hz",
                sr_hz, pcm_hz
            )));
        }
        Ok(Self { dt, sr, sr_pcm })
    }

    /// 编码采样率下每帧采样数
    pub const fn ns(&self) -> usize {
        num_samples(self.dt, self.sr)
    }

    /// PCM 采样率下每帧采样数
    pub const fn ns_pcm(&self) -> usize {
        num_samples(self.dt, self.sr_pcm)
    }

    /// 编码频谱系数个数
    pub const fn ne(&self) -> usize {
        num_coeffs(self.dt, self.sr)
    }

    /// 频带数
    pub const fn nb(&self) -> usize {
        num_bands(self.dt, self.sr)
    }

    /// PCM 采样率下的算法延迟 (采样数)
    pub const fn delay(&self) -> usize {
        let nd = overlap_len(self.dt, self.sr_pcm);
        2 * nd - self.ns_pcm()
    }
}

/// 每帧采样数
pub const fn num_samples(dt: FrameDuration, sr: SampleRate) -> usize {
    sr.khz() * 5 * dt.quarters() / 2
}

/// 编码的频谱系数个数, 48 kHz 仅编码到 20 kHz
pub const fn num_coeffs(dt: FrameDuration, sr: SampleRate) -> usize {
    let ns = num_samples(dt, sr);
    match sr {
        SampleRate::Hz48000 => ns * 5 / 6,
        _ => ns,
    }
}

/// MDCT 中来自上一帧的历史采样数
///
/// 2.5 ms 与 5 ms 帧的算法延迟均为 2.5 ms.
pub const fn overlap_len(dt: FrameDuration, sr: SampleRate) -> usize {
    let ns = num_samples(dt, sr);
    match dt {
        FrameDuration::Ms2p5 => ns,
        FrameDuration::Ms5 => ns * 3 / 4,
        FrameDuration::Ms7p5 => ns * 23 / 30,
        FrameDuration::Ms10 => ns * 5 / 8,
    }
}

/// 频带数, 系数不足 64 个时每个系数自成一个频带
pub const fn num_bands(dt: FrameDuration, sr: SampleRate) -> usize {
    let ne = num_coeffs(dt, sr);
    if ne < MAX_BANDS { ne } else { MAX_BANDS }
}

/// 每帧采样数 (以 us/Hz 表示的参数)
pub fn frame_samples(dt_us: u32, sr_hz: u32) -> TaoResult<usize> {
    let dt = FrameDuration::from_us(dt_us)?;
    let sr = SampleRate::from_hz(sr_hz)?;
    Ok(num_samples(dt, sr))
}

/// 算法延迟 (采样数)
pub fn delay_samples(dt_us: u32, sr_hz: u32) -> TaoResult<usize> {
    Ok(Lc3Config::new(dt_us, sr_hz, 0)?.delay())
}

/// 由码率计算帧字节数, 结果限定在 [20, 400]
pub fn frame_bytes(dt_us: u32, bitrate: u32) -> TaoResult<usize> {
    let dt = FrameDuration::from_us(dt_us)?;
    // 每 2.5 ms 为 1/3200 字节每 bit/s
    let n = bitrate as u64 * dt.quarters() as u64 / 3200;
    Ok((n as usize).clamp(MIN_FRAME_BYTES, MAX_FRAME_BYTES))
}

/// 由帧字节数反推码率
pub fn resolve_bitrate(dt_us: u32, nbytes: usize) -> TaoResult<u32> {
    let dt = FrameDuration::from_us(dt_us)?;
    let nbytes = nbytes.clamp(MIN_FRAME_BYTES, MAX_FRAME_BYTES) as u32;
    let k = dt.quarters() as u32;
    Ok((nbytes * 3200 + k / 2) / k)
}

/// 检查帧字节数是否合法
pub fn check_frame_bytes(nbytes: usize) -> TaoResult<()> {
    if !(MIN_FRAME_BYTES..=MAX_FRAME_BYTES).contains(&nbytes) {
        return Err(TaoError::InvalidArgument(format!(
            "LC3: 帧字节数 {} 超出范围 [{}, {}]",
            nbytes, MIN_FRAME_BYTES, MAX_FRAME_BYTES
        )));
    }
    Ok(())
}

/// 预设配置 (BAP 规定的常用组合)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub sample_rate: u32,
    pub duration_us: u32,
    pub frame_bytes: usize,
}

/// 全部预设
pub const PRESETS: [Preset; 16] = [
    preset("8_1", 8000, 7500, 26),
    preset("8_2", 8000, 10000, 30),
    preset("16_1", 16000, 7500, 30),
    preset("16_2", 16000, 10000, 40),
    preset("24_1", 24000, 7500, 45),
    preset("24_2", 24000, 10000, 60),
    preset("32_1", 32000, 7500, 60),
    preset("32_2", 32000, 10000, 80),
    preset("441_1", 44100, 7500, 97),
    preset("441_2", 44100, 10000, 130),
    preset("48_1", 48000, 7500, 75),
    preset("48_2", 48000, 10000, 100),
    preset("48_3", 48000, 7500, 90),
    preset("48_4", 48000, 10000, 120),
    preset("48_5", 48000, 7500, 117),
    preset("48_6", 48000, 10000, 155),
];

const fn preset(name: &'static str, sample_rate: u32, duration_us: u32, frame_bytes: usize) -> Preset {
    Preset {
        name,
        sample_rate,
        duration_us,
        frame_bytes,
    }
}

/// 按名称查找预设 (不区分大小写)
pub fn find_preset(name: &str) -> Option<Preset> {
    let name = name.trim();
    PRESETS
        .iter()
        .copied()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

/// 编解码器额外数据: 帧时长 (us, u16 小端) + 每声道帧字节数 (u16 小端)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraData {
    pub duration_us: u32,
    pub frame_bytes: usize,
}

impl ExtraData {
    /// 序列化长度
    pub const SIZE: usize = 4;

    /// 校验并创建
    pub fn new(duration_us: u32, frame_bytes: usize) -> TaoResult<Self> {
        FrameDuration::from_us(duration_us)?;
        check_frame_bytes(frame_bytes)?;
        Ok(Self {
            duration_us,
            frame_bytes,
        })
    }

    /// 解析额外数据
    pub fn parse(data: &[u8]) -> TaoResult<Self> {
        if data.len() < Self::SIZE {
            return Err(TaoError::InvalidData(format!(
                "LC3: 额外数据长度 {} 不足 {} 字节",
                data.len(),
                Self::SIZE
            )));
        }
        let duration_us = u16::from_le_bytes([data[0], data[1]]) as u32;
        let frame_bytes = u16::from_le_bytes([data[2], data[3]]) as usize;
        Self::new(duration_us, frame_bytes)
    }

    /// 序列化
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&(self.duration_us as u16).to_le_bytes());
        out.extend_from_slice(&(self.frame_bytes as u16).to_le_bytes());
        out
    }
}

/// 饱和到有符号 16 位
#[inline]
pub(crate) fn sat16(v: f32) -> f32 {
    v.clamp(-32768.0, 32767.0)
}
