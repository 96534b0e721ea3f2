//! 单声道帧编码器.

use log::{debug, trace};
use tao_core::{TaoError, TaoResult};

use super::attdet::AttackDetector;
use super::bits::BitWriter;
use super::ltpf::LtpfAnalysis;
use super::mdct::MdctAnalysis;
use super::spec::SpecAnalysis;
use super::{Bandwidth, Lc3Config, MAX_BANDS, PcmFormat, bwdet, check_frame_bytes, energy, pcm, sat16, sns, spec, tns};

/// LC3 单声道帧编码器
///
/// 持有跨帧状态 (MDCT 重叠、攻击检测、LTPF 分析、增益估计的位数偏移),
/// 帧必须按时间顺序送入.
pub struct FrameEncoder {
    config: Lc3Config,
    attdet: AttackDetector,
    ltpf: LtpfAnalysis,
    mdct: MdctAnalysis,
    spec: SpecAnalysis,
    /// PCM 采样率下的一帧输入
    input: Vec<f32>,
    /// 饱和到 16 位范围的输入
    xt: Vec<f32>,
    /// MDCT 系数
    xf: Vec<f32>,
    /// 整形后的频谱
    xs: Vec<f32>,
    xq: Vec<i16>,
    e: [f32; MAX_BANDS],
}

impl FrameEncoder {
    /// 创建编码器
    pub fn new(config: Lc3Config) -> TaoResult<Self> {
        let ns = config.ns();
        let ns_pcm = config.ns_pcm();
        debug!(
            "LC3 编码器: 帧长 {} us, 编码采样率 {} Hz, PCM 采样率 {} Hz",
            config.dt.us(),
            config.sr.hz(),
            config.sr_pcm.hz()
        );
        Ok(Self {
            config,
            attdet: AttackDetector::new(),
            ltpf: LtpfAnalysis::new(config.dt, config.sr_pcm),
            mdct: MdctAnalysis::new(config.dt, config.sr_pcm)?,
            spec: SpecAnalysis::new(),
            input: vec![0.0; ns_pcm],
            xt: vec![0.0; ns_pcm],
            xf: vec![0.0; ns],
            xs: vec![0.0; ns],
            xq: vec![0; config.ne()],
            e: [0.0; MAX_BANDS],
        })
    }

    /// 编码配置
    pub fn config(&self) -> &Lc3Config {
        &self.config
    }

    /// 编码一帧 (16 位满幅的浮点采样), 输出 `nbytes` 字节
    pub fn encode(&mut self, samples: &[f32], nbytes: usize) -> TaoResult<Vec<u8>> {
        let ns_pcm = self.config.ns_pcm();
        if samples.len() != ns_pcm {
            return Err(TaoError::InvalidArgument(format!(
                "LC3: 帧采样数应为 {}, 实际 {}",
                ns_pcm,
                samples.len()
            )));
        }
        self.input.copy_from_slice(samples);
        self.encode_input(nbytes)
    }

    /// 从交错 PCM 缓冲区取一个声道编码一帧
    pub fn encode_pcm(
        &mut self,
        fmt: PcmFormat,
        data: &[u8],
        ch: usize,
        stride: usize,
        nbytes: usize,
    ) -> TaoResult<Vec<u8>> {
        pcm::load(fmt, data, ch, stride, &mut self.input)?;
        self.encode_input(nbytes)
    }

    fn encode_input(&mut self, nbytes: usize) -> TaoResult<Vec<u8>> {
        check_frame_bytes(nbytes)?;
        let Lc3Config { dt, sr, sr_pcm } = self.config;

        // 时域分析
        for (t, &x) in self.xt.iter_mut().zip(&self.input) {
            *t = sat16(x);
        }
        let att = self.attdet.run(dt, sr_pcm, nbytes, &self.xt);
        let (pitch_present, mut ltpf) = self.ltpf.analyse(&self.xt);

        // 频域分析
        self.mdct.forward(&self.input, &mut self.xf);
        let nn_flag = energy::compute(dt, sr, &self.xf, &mut self.e);
        if nn_flag {
            ltpf.active = false;
        }
        let bw = bwdet::detect(dt, sr, &self.e);
        let sns = sns::analyze(dt, sr, &self.e, att, &self.xf, &mut self.xs);
        let tns = tns::analyze(dt, bw, nn_flag, nbytes, &mut self.xs);
        let side = self.spec.analyze(
            dt,
            sr,
            nbytes,
            pitch_present,
            &tns,
            &mut self.xs,
            &mut self.xq,
        );

        trace!(
            "LC3 编码帧: 带宽 {:?}, 攻击 {}, 基音 {} (激活 {}), TNS 滤波器 {:?}, 系数 {}, 增益 {}, LSB {}",
            bw,
            att,
            pitch_present,
            ltpf.active,
            tns.rc_order,
            side.nq,
            side.g_idx,
            side.lsb_mode
        );

        // 按固定顺序写入码流
        let mut bits = BitWriter::new(nbytes);
        bits.put_bits(bw.index() as u32, Bandwidth::field_bits(sr));
        side.put(&mut bits, dt, sr);
        tns.put(&mut bits);
        bits.put_bit(pitch_present);
        sns.put(&mut bits);
        if pitch_present {
            ltpf.put(&mut bits);
        }
        spec::encode(&mut bits, dt, sr, bw, nbytes, &self.xq, &side, &self.xs);
        bits.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(n: usize, sr: u32, freq: f32, amp: f32, start: usize) -> Vec<f32> {
        (start..start + n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn test_编码静音帧() {
        let config = Lc3Config::new(10000, 16000, 0).unwrap();
        let mut enc = FrameEncoder::new(config).unwrap();
        let x = vec![0.0f32; config.ns_pcm()];
        for _ in 0..3 {
            let frame = enc.encode(&x, 40).unwrap();
            assert_eq!(frame.len(), 40);
        }
    }

    #[test]
    fn test_各配置输出帧长() {
        for dt_us in [2500, 5000, 7500, 10000] {
            for sr_hz in [8000, 16000, 24000, 32000, 48000] {
                let config = Lc3Config::new(dt_us, sr_hz, 0).unwrap();
                let mut enc = FrameEncoder::new(config).unwrap();
                let n = config.ns_pcm();
                for (k, nbytes) in [20usize, 60, 120, 400].into_iter().enumerate() {
                    let x = sine(n, sr_hz, 440.0, 8000.0, k * n);
                    let frame = enc.encode(&x, nbytes).unwrap();
                    assert_eq!(frame.len(), nbytes);
                }
            }
        }
    }

    #[test]
    fn test_参数校验() {
        let config = Lc3Config::new(10000, 48000, 0).unwrap();
        let mut enc = FrameEncoder::new(config).unwrap();
        let x = vec![0.0f32; config.ns_pcm()];
        assert!(enc.encode(&x, 19).is_err());
        assert!(enc.encode(&x, 401).is_err());
        assert!(enc.encode(&x[..100], 100).is_err());
    }

    #[test]
    fn test_交错输入() {
        let config = Lc3Config::new(10000, 16000, 0).unwrap();
        let n = config.ns_pcm();
        let left = sine(n, 16000, 300.0, 5000.0, 0);
        let mut pcm = vec![0u8; n * 2 * 2];
        for (i, &v) in left.iter().enumerate() {
            let s = v.round() as i16;
            pcm[i * 4..i * 4 + 2].copy_from_slice(&s.to_le_bytes());
        }

        let mut a = FrameEncoder::new(config).unwrap();
        let mut b = FrameEncoder::new(config).unwrap();
        let rounded: Vec<f32> = left.iter().map(|v| v.round()).collect();
        let fa = a.encode_pcm(PcmFormat::S16, &pcm, 0, 2, 40).unwrap();
        let fb = b.encode(&rounded, 40).unwrap();
        assert_eq!(fa, fb);
    }
}
