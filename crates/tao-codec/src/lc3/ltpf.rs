//! 长时预测后置滤波 (LTPF).
//!
//! 编码端把输入重采样到 12.8 kHz 与 6.4 kHz 做基音检测, 输出基音索引与激活标志;
//! 解码端在 IMDCT 之后按基音周期做梳状滤波, 增强周期性成分.
//! 激活状态或基音变化时, 在帧首 `nt` 个采样内做淡入淡出过渡.

use tao_core::TaoResult;

use super::bits::{BitReader, BitWriter};
use super::{FrameDuration, SampleRate, num_samples, sat16, tables};

/// 12.8 kHz 缓冲长度: 232 个历史 + 最多 128 个新采样 + 24 个前瞻
const LEN_12K8: usize = 384;

/// 6.4 kHz 缓冲长度: 114 个历史 + 最多 64 个新采样
const LEN_6K4: usize = 178;

/// 6.4 kHz 下的最小检测延迟
const MIN_LAG_6K4: usize = 17;

/// 6.4 kHz 下的检测延迟个数 (17..=114)
const NUM_LAGS_6K4: usize = 98;

/// 12.8 kHz 下的最大基音延迟
const MAX_PITCH_12K8: usize = 228;

/// 50 Hz 高通双二阶滤波器系数 (b0 = b2)
const HP50_A1: f32 = -1.965_293_4;
const HP50_A2: f32 = 0.965_885_5;
const HP50_B1: f32 = -1.965_589_4;
const HP50_B2: f32 = 0.982_794_7;

/// 6.4 kHz 抽取滤波器
const H_6K4: [f32; 3] = [0.281_938_3, 0.235_351_2, 0.123_679_64];

/// 基音插值核, 按分数相位索引
const H_INTERP: [[f32; 4]; 4] = [
    [2.098_804_6e-1, 5.835_276e-1, 2.098_804_6e-1, 0.0],
    [1.069_991_9e-1, 5.500_75e-1, 3.356_906_3e-1, 6.698_858e-3],
    [3.967_115e-2, 4.592_209_3e-1, 4.592_209_3e-1, 3.967_115e-2],
    [6.698_858e-3, 3.356_906_3e-1, 5.500_75e-1, 1.069_991_9e-1],
];

/// 自相关分数插值核
const H_INTERP4: [[f32; 8]; 4] = [
    [
        1.535_727_7e-2,
        -4.729_632_5e-2,
        8.357_886e-2,
        8.986_383e-1,
        8.357_886e-2,
        -4.729_632_5e-2,
        1.535_727_7e-2,
        0.0,
    ],
    [
        2.745_471_6e-3,
        4.598_334_5e-3,
        -7.544_046e-2,
        8.174_887e-1,
        3.301_825_7e-1,
        -1.058_359_2e-1,
        2.868_234e-2,
        -2.874_561_2e-3,
    ],
    [
        -3.001_251e-3,
        2.950_385e-2,
        -1.303_050_2e-1,
        6.032_97e-1,
        6.032_97e-1,
        -1.303_050_2e-1,
        2.950_385e-2,
        -3.001_251e-3,
    ],
    [
        -2.874_561_2e-3,
        2.868_234e-2,
        -1.058_359_2e-1,
        3.301_825_7e-1,
        8.174_887e-1,
        -7.544_046e-2,
        4.598_334_5e-3,
        2.745_471_6e-3,
    ],
];

/// 帧内 LTPF 参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LtpfData {
    /// 后置滤波是否激活
    pub active: bool,
    /// 9 位基音索引
    pub pitch_index: u16,
}

impl LtpfData {
    /// 写入码流 (激活位 + 9 位索引)
    pub fn put(&self, bits: &mut BitWriter) {
        bits.put_bit(self.active);
        bits.put_bits(self.pitch_index as u32, 9);
    }

    /// 从码流读取
    pub fn get(bits: &mut BitReader<'_>) -> TaoResult<Self> {
        let active = bits.get_bit()?;
        let pitch_index = bits.get_bits(9)? as u16;
        Ok(Self {
            active,
            pitch_index,
        })
    }
}

/// LTPF 占用的比特数 (含基音存在标志)
pub const fn num_bits(pitch_present: bool) -> usize {
    if pitch_present { 11 } else { 1 }
}

/// 由 12.8 kHz 下的整数与 1/4 分数延迟计算基音索引
fn pitch_index(e: usize, f: usize) -> u16 {
    let idx = if e < 127 {
        4 * e + f - 128
    } else if e < 157 {
        2 * e + (f >> 1) + 126
    } else {
        e + 283
    };
    idx as u16
}

/// 基音索引还原为 12.8 kHz 下的 1/4 采样精度延迟
pub fn pitch_from_index(idx: u16) -> usize {
    let idx = idx as usize;
    if idx >= 440 {
        (idx - 283) << 2
    } else if idx >= 380 {
        (((idx >> 1) - 63) << 2) + ((idx & 1) << 1)
    } else {
        (((idx >> 2) + 32) << 2) + (idx & 3)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn argmax(x: &[f32]) -> (usize, f32) {
    let mut arg = 0;
    for i in 1..x.len() {
        if x[arg] < x[i] {
            arg = i;
        }
    }
    (arg, x[arg])
}

/// 权重随下标线性递减的最大值搜索, 返回下标与未加权的值
fn argmax_weighted(x: &[f32], w_incr: f32) -> (usize, f32) {
    let mut arg = 0;
    let mut xw_max = x[0];
    let mut w = 1.0 + w_incr;
    for (i, &v) in x.iter().enumerate().skip(1) {
        if xw_max < v * w {
            xw_max = v * w;
            arg = i;
        }
        w += w_incr;
    }
    (arg, x[arg])
}

/// 以 `buf[pos]` 为当前帧起点, 计算与 `lag0`, `lag0 + 1`, ... 延迟的相关
fn correlate(buf: &[f32], pos: usize, n: usize, lag0: usize, r: &mut [f32]) {
    let cur = &buf[pos..pos + n];
    for (j, rj) in r.iter_mut().enumerate() {
        let start = pos - lag0 - j;
        *rj = dot(cur, &buf[start..start + n]);
    }
}

/// 自相关在 `r[c]` 附近的分数插值, `d` 取 -3..=3
fn interpolate_4(r: &[f32], c: usize, d: i32) -> f32 {
    let h = &H_INTERP4[(4 + d).rem_euclid(4) as usize];
    let (taps, edge) = if d < 0 {
        (&h[1..8], r[c - 4] * h[0])
    } else if d > 0 {
        (&h[..7], r[c + 4] * h[7])
    } else {
        (&h[..7], 0.0)
    };
    edge + taps
        .iter()
        .enumerate()
        .map(|(k, &hk)| r[c + k - 3] * hk)
        .sum::<f32>()
}

/// 对 `buf[pos..pos + n]` 做 `d/4` 分数延迟插值, 读取 `buf[pos - 2..=pos + n]`
fn interpolate(buf: &[f32], pos: usize, n: usize, d: usize, y: &mut [f32]) {
    let h = &H_INTERP[d];
    for (i, yi) in y[..n].iter_mut().enumerate() {
        let p = pos + i;
        *yi = buf[p + 1] * h[0] + buf[p] * h[1] + buf[p - 1] * h[2] + buf[p - 2] * h[3];
    }
}

/// 编码端分析状态
pub struct LtpfAnalysis {
    dt: FrameDuration,
    sr: SampleRate,
    /// 重采样输入: [2w 个历史 | ns 个新采样]
    input: Vec<f32>,
    /// 重采样滤波器半宽 (输入采样数)
    half_width: usize,
    hp50: [f32; 2],
    x_12k8: [f32; LEN_12K8],
    x_6k4: [f32; LEN_6K4],
    /// 上一帧 6.4 kHz 下的延迟估计 (相对最小延迟)
    tc: usize,
    active: bool,
    pitch: usize,
    nc: [f32; 2],
}

impl LtpfAnalysis {
    /// 按 PCM 采样率创建
    pub fn new(dt: FrameDuration, sr: SampleRate) -> Self {
        let half_width = 5 * sr.khz() / 8;
        Self {
            dt,
            sr,
            input: vec![0.0; 2 * half_width + num_samples(dt, sr)],
            half_width,
            hp50: [0.0; 2],
            x_12k8: [0.0; LEN_12K8],
            x_6k4: [0.0; LEN_6K4],
            tc: 0,
            active: false,
            pitch: 0,
            nc: [0.0; 2],
        }
    }

    /// 分析一帧 PCM 采样, 返回 (基音存在, 帧参数)
    pub fn analyse(&mut self, x: &[f32]) -> (bool, LtpfData) {
        let n_12k8 = 32 * self.dt.quarters();
        let lookahead = match self.dt {
            FrameDuration::Ms7p5 => 44,
            _ => 24,
        };

        // 重采样到 12.8 kHz
        self.x_12k8.copy_within(n_12k8.., 0);
        let w2 = 2 * self.half_width;
        for (d, &s) in self.input[w2..].iter_mut().zip(x) {
            *d = sat16(s);
        }
        self.resample_12k8(n_12k8);
        let hist = self.input.len() - w2;
        self.input.copy_within(hist.., 0);

        let pos_12k8 = LEN_12K8 - n_12k8 - lookahead;

        // 抽取到 6.4 kHz
        let n_6k4 = n_12k8 / 2;
        self.x_6k4.copy_within(n_6k4.., 0);
        let pos_6k4 = LEN_6K4 - n_6k4;
        for i in 0..n_6k4 {
            let p = pos_12k8 + 2 * i;
            let x = &self.x_12k8;
            self.x_6k4[pos_6k4 + i] = x[p - 1] * H_6K4[0]
                + (x[p - 2] + x[p]) * H_6K4[1]
                + (x[p - 3] + x[p + 1]) * H_6K4[2];
        }

        // 基音检测与细化
        let mut data = LtpfData::default();
        let mut pitch = 0;
        let mut nc = 0.0;

        let tc = self.detect_pitch(pos_6k4, n_6k4);
        let pitch_present = tc.is_some();
        if let Some(tc) = tc {
            let (idx, p) = refine_pitch(&self.x_12k8, pos_12k8, n_12k8, tc);
            data.pitch_index = idx;
            pitch = p;

            let mut u = [0.0f32; 128];
            let mut v = [0.0f32; 128];
            interpolate(&self.x_12k8, pos_12k8, n_12k8, 0, &mut u);
            interpolate(&self.x_12k8, pos_12k8 - (pitch >> 2), n_12k8, pitch & 3, &mut v);
            let (u, v) = (&u[..n_12k8], &v[..n_12k8]);
            let den = (dot(u, u) * dot(v, v)).sqrt();
            if den > 0.0 {
                nc = dot(u, v) / den;
            }
        }

        // 激活判定
        data.active = if self.active {
            let pitch_diff = pitch.abs_diff(self.pitch);
            let nc_diff = nc - self.nc[0];
            pitch_present && (nc > 0.9 || (nc > 0.84 && pitch_diff < 8 && nc_diff > -0.1))
        } else {
            pitch_present
                && (self.dt == FrameDuration::Ms10 || self.nc[1] > 0.94)
                && self.nc[0] > 0.94
                && nc > 0.94
        };

        self.active = data.active;
        self.pitch = pitch;
        self.nc = [nc, self.nc[0]];

        (pitch_present, data)
    }

    /// 多相低通重采样 + 50 Hz 高通, 输出写入 12.8 kHz 缓冲尾部
    fn resample_12k8(&mut self, n: usize) {
        let h = tables::resampler_filter(self.sr);
        let p = (192 / self.sr.khz()) as isize;
        let w = self.half_width as isize;
        let half = tables::RESAMPLER_HALF as isize;
        let out = LEN_12K8 - n;

        for i in 0..n {
            let t = 15 * i as isize;
            let (e, f) = (t / p, t % p);
            let c = e + w;
            let mut un = 0.0f32;
            for k in -w..=w {
                let idx = k * p - f + half;
                if (0..=2 * half).contains(&idx) {
                    un += self.input[(c + k) as usize] * h[idx as usize];
                }
            }

            let yn = HP50_B2 * un + self.hp50[0];
            self.hp50[0] = HP50_B1 * un - HP50_A1 * yn + self.hp50[1];
            self.hp50[1] = HP50_B2 * un - HP50_A2 * yn;
            self.x_12k8[out + i] = yn;
        }
    }

    /// 6.4 kHz 开环基音检测, 返回 6.4 kHz 下的延迟
    fn detect_pitch(&mut self, pos: usize, n: usize) -> Option<usize> {
        let x = &self.x_6k4;
        let mut r = [0.0f32; NUM_LAGS_6K4];
        correlate(x, pos, n, MIN_LAG_6K4, &mut r);

        let k0 = self.tc.saturating_sub(4);
        let k1 = (self.tc + 4).min(NUM_LAGS_6K4 - 1);
        let (t1, rm1) = argmax_weighted(&r, -0.5 / (NUM_LAGS_6K4 - 1) as f32);
        let (t2, rm2) = argmax(&r[k0..=k1]);
        let t2 = k0 + t2;

        let cur = &x[pos..pos + n];
        let norm = |t: usize, rm: f32| {
            if rm <= 0.0 {
                return 0.0;
            }
            let s = pos - MIN_LAG_6K4 - t;
            rm / (dot(cur, cur) * dot(&x[s..s + n], &x[s..s + n])).sqrt()
        };
        let nc1 = norm(t1, rm1);
        let nc2 = norm(t2, rm2);

        let t1_sel = nc2 <= 0.85 * nc1;
        self.tc = if t1_sel { t1 } else { t2 };
        let nc = if t1_sel { nc1 } else { nc2 };

        (nc > 0.6).then_some(MIN_LAG_6K4 + self.tc)
    }
}

/// 在 12.8 kHz 下细化基音, 返回 (基音索引, 1/4 采样精度延迟)
fn refine_pitch(x: &[f32], pos: usize, n: usize, tc: usize) -> (u16, usize) {
    let r0 = (2 * tc).saturating_sub(4).max(32);
    let nr = (2 * tc + 4).min(MAX_PITCH_12K8) - r0 + 1;

    let mut r = [0.0f32; 17];
    correlate(x, pos, n, r0 - 4, &mut r[..nr + 8]);

    let (arg, _) = argmax(&r[4..4 + nr]);
    let mut e = r0 + arg;
    let c = arg + 4;

    let mut f = 0i32;
    let mut dm = interpolate_4(&r, c, 0);
    for i in 1..=3 {
        if e >= 127 && ((i & 1) != 0 || e >= 157) {
            continue;
        }
        let d = interpolate_4(&r, c, i);
        if d > dm {
            dm = d;
            f = i;
        }
        if e > 32 {
            let d = interpolate_4(&r, c, -i);
            if d > dm {
                dm = d;
                f = -i;
            }
        }
    }

    if f < 0 {
        e -= 1;
        f += 4;
    }
    let f = f as usize;
    (pitch_index(e, f), 4 * e + f)
}

/// 淡入淡出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fade {
    In,
    Out,
    None,
}

/// 滤波系数与基音
#[derive(Debug, Clone, Default)]
struct FilterParams {
    num: Vec<f32>,
    den: Vec<f32>,
    /// PCM 采样率下的 1/4 采样精度延迟
    pitch: usize,
}

/// 解码端后置滤波状态
pub struct LtpfSynthesis {
    dt: FrameDuration,
    sr: SampleRate,
    width: usize,
    active: bool,
    prev: FilterParams,
    /// 上一帧最后 w - 1 个未滤波输入
    x_tail: Vec<f32>,
    /// 输出历史
    y_hist: Vec<f32>,
    work: Vec<f32>,
    xin: Vec<f32>,
}

impl LtpfSynthesis {
    /// 按 PCM 采样率创建
    pub fn new(dt: FrameDuration, sr: SampleRate) -> Self {
        let width = tables::ltpf_width(sr);
        let max_pitch = (4 * MAX_PITCH_12K8 * sr.khz() * 10 + 64) / 128 / 4;
        let hist = max_pitch + width;
        let ns = num_samples(dt, sr);
        Self {
            dt,
            sr,
            width,
            active: false,
            prev: FilterParams::default(),
            x_tail: vec![0.0; width - 1],
            y_hist: vec![0.0; hist],
            work: vec![0.0; hist + ns],
            xin: vec![0.0; width - 1 + ns],
        }
    }

    /// 原位滤波一帧, `data` 为 `None` 表示本帧无基音 (或丢帧)
    pub fn synthesize(&mut self, nbytes: usize, data: Option<&LtpfData>, x: &mut [f32]) {
        let ns = num_samples(self.dt, self.sr);
        let (w, hist) = (self.width, self.y_hist.len());
        let dt_us = self.dt.us() as usize;
        let sr_idx = self.sr.index();

        let nbits = (nbytes * 8 * 10000 + dt_us / 2) / dt_us;
        let g_idx = (nbits / 80).max(3 + sr_idx) - (3 + sr_idx);
        let active = data.is_some_and(|d| d.active) && g_idx < 4;

        let pitch = data.map_or(0, |d| {
            (pitch_from_index(d.pitch_index) * self.sr.khz() * 10 + 64) / 128
        });

        let filters = tables::ltpf_filters(self.sr);
        let cur = if active {
            let g = 0.4 - 0.05 * g_idx as f32;
            FilterParams {
                num: filters.taps[0].iter().map(|&c| g * c).collect(),
                den: filters.taps[pitch & 3].iter().map(|&c| g * c).collect(),
                pitch,
            }
        } else {
            FilterParams {
                num: vec![0.0; w],
                den: vec![0.0; w],
                pitch,
            }
        };

        self.work[..hist].copy_from_slice(&self.y_hist);
        self.work[hist..].copy_from_slice(&x[..ns]);
        self.xin[..w - 1].copy_from_slice(&self.x_tail);
        self.xin[w - 1..].copy_from_slice(&x[..ns]);

        // 过渡段, 固定 2.5 ms
        let nt = ns / self.dt.quarters();
        let xin = &self.xin[..w - 1 + nt];
        match (self.active, active) {
            (false, true) => filter(&mut self.work, hist, xin, &cur, Fade::In),
            (true, false) => filter(&mut self.work, hist, xin, &self.prev, Fade::Out),
            (true, true) if self.prev.pitch == pitch => {
                filter(&mut self.work, hist, xin, &cur, Fade::None)
            }
            (true, true) => {
                filter(&mut self.work, hist, xin, &self.prev, Fade::Out);
                let faded = self.work[hist + 1 - w..hist + nt].to_vec();
                filter(&mut self.work, hist, &faded, &cur, Fade::In);
            }
            (false, false) => {}
        }

        // 剩余部分
        if active {
            let xin = &self.xin[nt..w - 1 + ns];
            filter(&mut self.work, hist + nt, xin, &cur, Fade::None);
        }

        x[..ns].copy_from_slice(&self.work[hist..]);
        self.y_hist.copy_from_slice(&self.work[ns..]);
        self.x_tail.copy_from_slice(&self.xin[ns..]);
        self.active = active;
        self.prev = cur;
    }
}

/// 对 `work[start..]` 原位滤波 `xin.len() - (w - 1)` 个采样
///
/// `xin` 为对应的未滤波输入, 前 w - 1 项为起点之前的输入.
/// 前向支路作用于 x(n - k), 反馈支路作用于 y(n - p_int - k).
fn filter(work: &mut [f32], start: usize, xin: &[f32], c: &FilterParams, fade: Fade) {
    let w = c.num.len();
    let n = xin.len() + 1 - w;
    let p_int = c.pitch / 4;

    let (mut g, g_incr) = match fade {
        Fade::In => (0.0, 1.0 / n as f32),
        Fade::Out => (1.0, -1.0 / n as f32),
        Fade::None => (1.0, 0.0),
    };

    for i in 0..n {
        let pos = start + i;
        let xi = i + w - 1;
        let mut u = 0.0f32;
        for k in 0..w {
            u += c.num[k] * xin[xi - k] - c.den[k] * work[pos - p_int - k];
        }
        work[pos] = xin[xi] - g * u;
        g += g_incr;
    }
}
