//! 单声道帧解码器.

use log::{debug, trace, warn};
use tao_core::{TaoError, TaoResult};

use super::bits::BitReader;
use super::ltpf::{LtpfData, LtpfSynthesis};
use super::mdct::MdctSynthesis;
use super::plc::Plc;
use super::sns::SnsData;
use super::spec::SpecSide;
use super::tns::TnsData;
use super::{Bandwidth, Lc3Config, MIN_FRAME_BYTES, PcmFormat, check_frame_bytes, pcm, sns, spec, tns};

/// 单帧解码结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// 正常解码
    Ok,
    /// 帧丢失或损坏, 输出为隐藏结果
    Concealed,
}

/// 一帧的边信息
struct FrameSide {
    bw: Bandwidth,
    spec: SpecSide,
    tns: TnsData,
    pitch_present: bool,
    sns: SnsData,
    ltpf: LtpfData,
}

/// LC3 单声道帧解码器
pub struct FrameDecoder {
    config: Lc3Config,
    mdct: MdctSynthesis,
    ltpf: LtpfSynthesis,
    plc: Plc,
    /// 解码频谱 (编码采样率下 ns 个)
    xf: Vec<f32>,
    /// 最后一帧正常解码的反整形频谱, 丢帧时复用
    xg: Vec<f32>,
    /// PCM 采样率下的输出
    xs: Vec<f32>,
    /// 最后一帧的字节数
    nbytes: usize,
}

impl FrameDecoder {
    /// 创建解码器
    pub fn new(config: Lc3Config) -> TaoResult<Self> {
        let ns = config.ns();
        debug!(
            "LC3 解码器: 帧长 {} us, 编码采样率 {} Hz, PCM 采样率 {} Hz",
            config.dt.us(),
            config.sr.hz(),
            config.sr_pcm.hz()
        );
        Ok(Self {
            config,
            mdct: MdctSynthesis::new(config.dt, config.sr_pcm)?,
            ltpf: LtpfSynthesis::new(config.dt, config.sr_pcm),
            plc: Plc::new(),
            xf: vec![0.0; ns],
            xg: vec![0.0; ns],
            xs: vec![0.0; config.ns_pcm()],
            nbytes: MIN_FRAME_BYTES,
        })
    }

    /// 解码配置
    pub fn config(&self) -> &Lc3Config {
        &self.config
    }

    /// 解码一帧到 `out` (16 位满幅的浮点采样)
    ///
    /// `data` 为 `None` 表示帧丢失. 码流损坏时不返回错误, 而是输出隐藏结果并返回
    /// [`DecodeStatus::Concealed`]; 帧字节数或输出长度非法时返回错误.
    pub fn decode(&mut self, data: Option<&[u8]>, out: &mut [f32]) -> TaoResult<DecodeStatus> {
        let ns_pcm = self.config.ns_pcm();
        if out.len() != ns_pcm {
            return Err(TaoError::InvalidArgument(format!(
                "LC3: 输出采样数应为 {}, 实际 {}",
                ns_pcm,
                out.len()
            )));
        }
        let status = self.decode_frame(data)?;
        out.copy_from_slice(&self.xs);
        Ok(status)
    }

    /// 解码一帧并写入交错 PCM 缓冲区的一个声道
    pub fn decode_pcm(
        &mut self,
        data: Option<&[u8]>,
        fmt: PcmFormat,
        out: &mut [u8],
        ch: usize,
        stride: usize,
    ) -> TaoResult<DecodeStatus> {
        let status = self.decode_frame(data)?;
        pcm::store(fmt, &self.xs, out, ch, stride)?;
        Ok(status)
    }

    fn decode_frame(&mut self, data: Option<&[u8]>) -> TaoResult<DecodeStatus> {
        let side = match data {
            Some(d) => {
                check_frame_bytes(d.len())?;
                self.nbytes = d.len();
                match self.read_frame(d) {
                    Ok(side) => Some(side),
                    Err(e) => {
                        warn!("LC3: 帧损坏, 执行丢帧隐藏: {}", e);
                        None
                    }
                }
            }
            None => None,
        };
        let status = if side.is_some() {
            DecodeStatus::Ok
        } else {
            DecodeStatus::Concealed
        };
        self.synthesize(side.as_ref());
        Ok(status)
    }

    /// 按固定顺序解析码流并解码频谱到 `xf`
    fn read_frame(&mut self, data: &[u8]) -> TaoResult<FrameSide> {
        let Lc3Config { dt, sr, .. } = self.config;
        let nbytes = data.len();
        let mut bits = BitReader::new(data);

        let bw_idx = bits.get_bits(Bandwidth::field_bits(sr))? as usize;
        let bw = Bandwidth::from_index(bw_idx)
            .filter(|&bw| bw <= Bandwidth::max_for(sr))
            .ok_or_else(|| TaoError::InvalidData(format!("LC3: 带宽索引 {} 越界", bw_idx)))?;

        let spec = SpecSide::get(&mut bits, dt, sr)?;
        let tns = TnsData::get(&mut bits, dt, bw, nbytes)?;
        let pitch_present = bits.get_bit()?;
        let sns = SnsData::get(&mut bits)?;
        let ltpf = if pitch_present {
            LtpfData::get(&mut bits)?
        } else {
            LtpfData::default()
        };

        spec::decode(&mut bits, dt, sr, bw, nbytes, &spec, &mut self.xf)?;
        let ne = self.config.ne();
        self.xf[ne..].fill(0.0);
        bits.check()?;

        trace!(
            "LC3 解码帧: 带宽 {:?}, 系数 {}, 增益 {}, LSB {}, 基音 {} (激活 {})",
            bw, spec.nq, spec.g_idx, spec.lsb_mode, pitch_present, ltpf.active
        );

        Ok(FrameSide {
            bw,
            spec,
            tns,
            pitch_present,
            sns,
            ltpf,
        })
    }

    fn synthesize(&mut self, side: Option<&FrameSide>) {
        let Lc3Config { dt, sr, .. } = self.config;

        match side {
            Some(side) => {
                self.plc.suspend();
                tns::synthesize(dt, side.bw, &side.tns, &mut self.xf);
                sns::synthesize(dt, sr, &side.sns, &self.xf, &mut self.xg);
                self.mdct.inverse(&self.xg, &mut self.xs);
            }
            None => {
                self.plc.synthesize(&self.xg, &mut self.xf);
                let ne = self.config.ne();
                self.xf[ne..].fill(0.0);
                self.mdct.inverse(&self.xf, &mut self.xs);
            }
        }

        let ltpf = side.filter(|s| s.pitch_present).map(|s| &s.ltpf);
        self.ltpf.synthesize(self.nbytes, ltpf, &mut self.xs);
    }
}
