//! 低延迟 MDCT 与 IMDCT.
//!
//! 每帧变换块为 2N 个采样: [上一帧尾部 nd | 本帧 N | 补零 N - nd].
//! 窗函数首尾各有一段零值, 算法延迟为 2·nd - N.
//! DCT-IV 通过 N/2 点复数 FFT 计算.

use std::f64::consts::PI;

use tao_core::TaoResult;

use super::fft::{Complex, Fft};
use super::{FrameDuration, SampleRate, num_samples, overlap_len, tables};

/// N 点 DCT-IV, 结果乘以 sqrt(2/N) (正交归一)
struct Dct4 {
    n: usize,
    fft: Fft,
    /// 前/后旋转 e^{-iπ(k + 1/8)/N}
    rot: Vec<Complex>,
    z: Vec<Complex>,
    scratch: Vec<Complex>,
}

impl Dct4 {
    fn new(n: usize) -> TaoResult<Self> {
        let half = n / 2;
        let rot = (0..half)
            .map(|k| {
                let th = PI * (k as f64 + 0.125) / n as f64;
                Complex::new(th.cos() as f32, -th.sin() as f32)
            })
            .collect();
        Ok(Self {
            n,
            fft: Fft::new(half)?,
            rot,
            z: vec![Complex::default(); half],
            scratch: vec![Complex::default(); half],
        })
    }

    fn run(&mut self, v: &[f32], out: &mut [f32]) {
        let n = self.n;
        let half = n / 2;
        for k in 0..half {
            self.z[k] = Complex::new(v[2 * k], v[n - 1 - 2 * k]) * self.rot[k];
        }
        self.fft.forward(&mut self.z, &mut self.scratch);
        let scale = (2.0 / n as f32).sqrt();
        for k in 0..half {
            let y = self.z[k] * self.rot[k];
            out[2 * k] = y.re * scale;
            out[n - 1 - 2 * k] = -y.im * scale;
        }
    }
}

/// 正变换状态
pub struct MdctAnalysis {
    n: usize,
    nd: usize,
    window: &'static [f32],
    dct: Dct4,
    /// 上一帧尾部 nd 个采样
    history: Vec<f32>,
    block: Vec<f32>,
    fold: Vec<f32>,
    coeffs: Vec<f32>,
}

impl MdctAnalysis {
    /// 按 PCM 采样率创建
    pub fn new(dt: FrameDuration, sr_pcm: SampleRate) -> TaoResult<Self> {
        let n = num_samples(dt, sr_pcm);
        let nd = overlap_len(dt, sr_pcm);
        Ok(Self {
            n,
            nd,
            window: tables::mdct_window(dt, sr_pcm),
            dct: Dct4::new(n)?,
            history: vec![0.0; nd],
            block: vec![0.0; 2 * n],
            fold: vec![0.0; n],
            coeffs: vec![0.0; n],
        })
    }

    /// 变换一帧
    ///
    /// `x` 为 PCM 采样率下的 N 个新采样, 输出前 `y.len()` 个系数 (编码采样率下的帧长),
    /// 并按帧长比例补偿能量.
    pub fn forward(&mut self, x: &[f32], y: &mut [f32]) {
        let (n, nd) = (self.n, self.nd);
        let w = self.window;

        self.block[..nd].copy_from_slice(&self.history);
        self.block[nd..nd + n].copy_from_slice(&x[..n]);
        self.block[nd + n..].fill(0.0);
        self.history.copy_from_slice(&x[n - nd..n]);

        let t = &mut self.block;
        for (s, &wi) in t.iter_mut().zip(w) {
            *s *= wi;
        }

        let h = n / 2;
        for i in 0..h {
            self.fold[i] = -t[3 * h - 1 - i] - t[3 * h + i];
            self.fold[h + i] = t[i] - t[n - 1 - i];
        }
        self.dct.run(&self.fold, &mut self.coeffs);

        let ns = y.len();
        let g = (ns as f32 / n as f32).sqrt();
        for (yi, &c) in y.iter_mut().zip(&self.coeffs) {
            *yi = c * g;
        }
    }
}

/// 反变换状态
pub struct MdctSynthesis {
    n: usize,
    z: usize,
    window: &'static [f32],
    dct: Dct4,
    /// 重叠相加缓存, 长度 N - 2Z
    overlap: Vec<f32>,
    coeffs: Vec<f32>,
    unfold: Vec<f32>,
    block: Vec<f32>,
}

impl MdctSynthesis {
    pub fn new(dt: FrameDuration, sr_pcm: SampleRate) -> TaoResult<Self> {
        let n = num_samples(dt, sr_pcm);
        let z = n - overlap_len(dt, sr_pcm);
        Ok(Self {
            n,
            z,
            window: tables::mdct_window(dt, sr_pcm),
            dct: Dct4::new(n)?,
            overlap: vec![0.0; n - 2 * z],
            coeffs: vec![0.0; n],
            unfold: vec![0.0; n],
            block: vec![0.0; 2 * n],
        })
    }

    /// 反变换一帧
    ///
    /// `x` 为编码采样率下的系数 (不足 N 个时高频补零), 输出 N 个 PCM 采样.
    pub fn inverse(&mut self, x: &[f32], out: &mut [f32]) {
        let (n, z) = (self.n, self.z);
        let ns = x.len().min(n);
        let g = (n as f32 / ns as f32).sqrt();
        for (c, &v) in self.coeffs.iter_mut().zip(&x[..ns]) {
            *c = v * g;
        }
        self.coeffs[ns..].fill(0.0);
        self.dct.run(&self.coeffs, &mut self.unfold);

        // y = (v2, -rev(v2), -rev(v1), -v1)
        let h = n / 2;
        let (v1, v2) = self.unfold.split_at(h);
        for i in 0..h {
            self.block[i] = v2[i];
            self.block[h + i] = -v2[h - 1 - i];
            self.block[n + i] = -v1[h - 1 - i];
            self.block[n + h + i] = -v1[i];
        }
        let w = self.window;
        for (i, s) in self.block.iter_mut().enumerate() {
            *s *= w[2 * n - 1 - i];
        }

        let lo = n - 2 * z;
        for j in 0..n {
            out[j] = self.block[z + j] + if j < lo { self.overlap[j] } else { 0.0 };
        }
        self.overlap.copy_from_slice(&self.block[n + z..n + z + lo]);
    }
}
