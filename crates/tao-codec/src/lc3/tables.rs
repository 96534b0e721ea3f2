//! LC3 常量表.
//!
//! 窗函数、频带划分、算术编码概率模型、SNS 码本与滤波器系数.
//! 所有表在首次使用时生成, 之后以 `&'static` 共享.

use std::f64::consts::PI;
use std::sync::OnceLock;

use super::bits::AcModel;
use super::{FrameDuration, SampleRate, num_bands, num_coeffs, num_samples, overlap_len};

/// 按 (帧时长, 采样率) 索引的表
type PerConfig<T> = [[T; 5]; 4];

fn per_config<T>(f: impl Fn(FrameDuration, SampleRate) -> T) -> PerConfig<T> {
    FrameDuration::ALL.map(|dt| SampleRate::ALL.map(|sr| f(dt, sr)))
}

// ============================================================
// 频带划分
// ============================================================

/// 频带上边界的频率扭曲常数 (Hz)
const BAND_WARP_HZ: f64 = 300.0;

fn build_band_limits(dt: FrameDuration, sr: SampleRate) -> Vec<usize> {
    let nb = num_bands(dt, sr);
    let ne = num_coeffs(dt, sr);
    let hz_per_bin = sr.hz() as f64 / 2.0 / num_samples(dt, sr) as f64;
    let f_max = ne as f64 * hz_per_bin;
    let span = (1.0 + f_max / BAND_WARP_HZ).ln();

    let mut lim = vec![0usize; nb + 1];
    for b in 1..nb {
        let f = BAND_WARP_HZ * ((span * b as f64 / nb as f64).exp() - 1.0);
        let target = (f / hz_per_bin).round() as usize;
        // 每个频带至少 1 个系数, 且给后续频带留足空间
        lim[b] = target.max(lim[b - 1] + 1).min(ne - (nb - b));
    }
    lim[nb] = ne;
    lim
}

/// 频带边界, 长度为频带数 + 1, 末项为编码系数个数
pub fn band_limits(dt: FrameDuration, sr: SampleRate) -> &'static [usize] {
    static TABLE: OnceLock<PerConfig<Vec<usize>>> = OnceLock::new();
    &TABLE.get_or_init(|| per_config(build_band_limits))[dt.index()][sr.index()]
}

// ============================================================
// MDCT 窗
// ============================================================

fn build_mdct_window(dt: FrameDuration, sr: SampleRate) -> Vec<f32> {
    let n = num_samples(dt, sr);
    let z = n - overlap_len(dt, sr);
    let m = (n - 2 * z) as f64;
    (0..2 * n)
        .map(|i| {
            let v = if i < z {
                0.0
            } else if i < n - z {
                (PI / (2.0 * m) * ((i - z) as f64 + 0.5)).sin()
            } else if i < n + z {
                1.0
            } else if i < 2 * n - z {
                (PI / (2.0 * m) * ((i - n - z) as f64 + 0.5)).cos()
            } else {
                0.0
            };
            v as f32
        })
        .collect()
}

/// 分析窗, 长度为 2 倍帧长; 合成窗为其时间反转
pub fn mdct_window(dt: FrameDuration, sr: SampleRate) -> &'static [f32] {
    static TABLE: OnceLock<PerConfig<Vec<f32>>> = OnceLock::new();
    &TABLE.get_or_init(|| per_config(build_mdct_window))[dt.index()][sr.index()]
}

// ============================================================
// 算术编码模型
// ============================================================

/// 由概率权重构造模型, 总频数 1024, 非零权重的符号频数至少为 1
pub(crate) fn model_from_weights(w: &[f64]) -> AcModel {
    let active = w.iter().filter(|&&v| v > 0.0).count() as u32;
    let sum: f64 = w.iter().sum();
    let avail = (AcModel::TOTAL - active) as f64;

    let mut freq = [0u16; 17];
    let mut used = 0u32;
    let mut largest = 0;
    for (s, &v) in w.iter().enumerate() {
        if v > 0.0 {
            freq[s] = 1 + (v / sum * avail).floor() as u16;
            used += freq[s] as u32;
            if v > w[largest] {
                largest = s;
            }
        }
    }
    freq[largest] += (AcModel::TOTAL - used) as u16;
    AcModel::from_freqs(&freq)
}

/// 区间宽度截断 (range >> 10) 的单符号损耗上界, 单位为 1/2048 位
///
/// 归一化后 range >= 2^16, 损耗不超过 log2(1 + 1023 / 2^16).
const TRUNC_LOSS: f64 = 47.0;

/// 每个符号的编码代价, 单位为 1/2048 位, 不低于算术编码的实际消耗
pub(crate) fn model_bits(model: &AcModel) -> [u16; 17] {
    let mut bits = [u16::MAX; 17];
    for (s, b) in bits.iter_mut().enumerate() {
        let f = model.freq[s];
        if f > 0 {
            let cost = -(f as f64 / AcModel::TOTAL as f64).log2() * 2048.0;
            *b = (cost.ceil() + TRUNC_LOSS) as u16;
        }
    }
    bits
}

/// 频谱系数对的编码表
pub struct SpectrumTables {
    /// 16 个概率模型, 每个 17 个符号 (16 个 2 位对 + 逃逸)
    pub models: [AcModel; 16],
    /// 各模型下符号代价 (1/2048 位)
    pub bits: [[u16; 17]; 16],
    /// 上下文到模型的映射 [高码率][上半频谱][状态][逃逸层级]
    lookup: Vec<u8>,
}

impl SpectrumTables {
    /// 根据上下文状态选择模型
    pub fn model_index(&self, high_rate: bool, upper: bool, state: u8, level: usize) -> usize {
        let i = (((high_rate as usize) * 2 + upper as usize) * 256 + state as usize) * 4 + level.min(3);
        self.lookup[i] as usize
    }
}

fn build_spectrum() -> SpectrumTables {
    let models: [AcModel; 16] = std::array::from_fn(|m| {
        let rho = 0.05 + 0.06 * m as f64;
        let mut w = [0.0f64; 17];
        for (s, v) in w.iter_mut().enumerate().take(16) {
            *v = rho.powi(((s & 3) + (s >> 2)) as i32);
        }
        w[16] = 2.0 * rho.powi(4) / (1.0 - rho);
        model_from_weights(&w)
    });
    let bits = models.each_ref().map(model_bits);

    let mut lookup = vec![0u8; 2 * 2 * 256 * 4];
    for hr in 0..2 {
        for upper in 0..2 {
            for state in 0..256usize {
                for level in 0..4 {
                    let cur = (state & 15) as f64;
                    let prev = (state >> 4) as f64;
                    let est = 0.75 * cur + 0.35 * prev + 3.0 * level as f64 + hr as f64
                        - 0.5 * upper as f64;
                    let m = est.round().clamp(0.0, 15.0) as u8;
                    lookup[((hr * 2 + upper) * 256 + state) * 4 + level] = m;
                }
            }
        }
    }

    SpectrumTables {
        models,
        bits,
        lookup,
    }
}

/// 频谱编码表
pub fn spectrum() -> &'static SpectrumTables {
    static TABLE: OnceLock<SpectrumTables> = OnceLock::new();
    TABLE.get_or_init(build_spectrum)
}

/// TNS 编码表
pub struct TnsTables {
    /// 阶数模型 [LPC 加权], 符号为阶数 - 1
    pub order_models: [AcModel; 2],
    pub order_bits: [[u16; 17]; 2],
    /// 反射系数模型 [系数序号], 符号为量化索引 0..17
    pub coef_models: [AcModel; 8],
    pub coef_bits: [[u16; 17]; 8],
}

fn build_tns() -> TnsTables {
    let order_models: [AcModel; 2] = std::array::from_fn(|weighting| {
        let decay = if weighting == 1 { 0.6 } else { 0.8 };
        let mut w = [0.0f64; 17];
        for (o, v) in w.iter_mut().enumerate().take(8) {
            *v = f64::powi(decay, o as i32);
        }
        model_from_weights(&w)
    });
    let coef_models: [AcModel; 8] = std::array::from_fn(|k| {
        let sigma = 3.0 - 0.25 * k as f64;
        let mut w = [0.0f64; 17];
        for (s, v) in w.iter_mut().enumerate() {
            let d = s as f64 - 8.0;
            *v = (-d * d / (2.0 * sigma * sigma)).exp() + 1e-3;
        }
        model_from_weights(&w)
    });
    TnsTables {
        order_bits: order_models.each_ref().map(model_bits),
        coef_bits: coef_models.each_ref().map(model_bits),
        order_models,
        coef_models,
    }
}

/// TNS 编码表
pub fn tns() -> &'static TnsTables {
    static TABLE: OnceLock<TnsTables> = OnceLock::new();
    TABLE.get_or_init(build_tns)
}

// ============================================================
// SNS
// ============================================================

/// SNS 量化表
pub struct SnsTables {
    /// 低频一级码本 (前 8 个尺度因子)
    pub lfcb: [[f32; 8]; 32],
    /// 高频一级码本 (后 8 个尺度因子)
    pub hfcb: [[f32; 8]; 32],
    /// PVQ 枚举偏移 A[n][k], k 截断到 10
    pub mpvq_offsets: [[u32; 11]; 16],
    /// 16 点 DCT-II 正交矩阵, M[n][k]
    pub dct16: [[f32; 16]; 16],
}

fn build_sns() -> SnsTables {
    // 一级码本由 4 档偏置与 8 档斜率组合而成, 高频偏置与低频相反
    let codebook = |sign: f64| -> [[f32; 8]; 32] {
        std::array::from_fn(|i| {
            let offset = ((i >> 3) as f64 - 1.5) * 1.1 * sign;
            let slope = ((i & 7) as f64 - 3.5) * 0.22;
            std::array::from_fn(|n| (offset + slope * (n as f64 - 3.5)) as f32)
        })
    };

    let mut a = [[0u32; 11]; 16];
    for k in 1..11 {
        a[0][k] = 1;
    }
    for n in 1..16 {
        for k in 1..11 {
            a[n][k] = a[n - 1][k - 1] + a[n][k - 1] + a[n - 1][k];
        }
    }

    let dct16 = std::array::from_fn(|n| {
        std::array::from_fn(|k| {
            let f = if k == 0 { (1.0f64 / 64.0).sqrt() } else { (1.0f64 / 32.0).sqrt() };
            (2.0 * f * (PI * k as f64 * (2 * n + 1) as f64 / 32.0).cos()) as f32
        })
    });

    SnsTables {
        lfcb: codebook(1.0),
        hfcb: codebook(-1.0),
        mpvq_offsets: a,
        dct16,
    }
}

/// SNS 量化表
pub fn sns() -> &'static SnsTables {
    static TABLE: OnceLock<SnsTables> = OnceLock::new();
    TABLE.get_or_init(build_sns)
}

/// SNS 二级增益, 按形状索引
pub const SNS_GAINS: [&[f32]; 4] = [
    &[8915.0 / 4096.0, 12054.0 / 4096.0],
    &[
        6245.0 / 4096.0,
        15043.0 / 4096.0,
        17861.0 / 4096.0,
        21014.0 / 4096.0,
    ],
    &[
        7099.0 / 4096.0,
        9132.0 / 4096.0,
        11253.0 / 4096.0,
        14808.0 / 4096.0,
    ],
    &[
        4336.0 / 4096.0,
        5792.0 / 4096.0,
        7369.0 / 4096.0,
        9049.0 / 4096.0,
        10752.0 / 4096.0,
        12747.0 / 4096.0,
        15049.0 / 4096.0,
        17869.0 / 4096.0,
    ],
];

// ============================================================
// LTPF
// ============================================================

/// 重采样滤波器的半长 (192 kHz 网格)
pub const RESAMPLER_HALF: usize = 120;

fn hann(t: f64, half: f64) -> f64 {
    if t.abs() >= half {
        0.0
    } else {
        0.5 + 0.5 * (PI * t / half).cos()
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

fn build_resampler(sr: SampleRate) -> Vec<f32> {
    let p = 192 / sr.khz();
    let fc = if sr == SampleRate::Hz8000 { 3800.0 } else { 6000.0 };
    let half = RESAMPLER_HALF as f64 + 1.0;
    let h: Vec<f64> = (0..=2 * RESAMPLER_HALF)
        .map(|i| {
            let m = i as f64 - RESAMPLER_HALF as f64;
            sinc(2.0 * fc * m / 192_000.0) * hann(m, half)
        })
        .collect();
    // 每个相位的增益约为 1
    let scale = p as f64 / h.iter().sum::<f64>();
    h.iter().map(|&v| (v * scale) as f32).collect()
}

/// 12.8 kHz 重采样低通滤波器, 以 192 kHz 网格表示, 下标偏移 [`RESAMPLER_HALF`]
pub fn resampler_filter(sr: SampleRate) -> &'static [f32] {
    static TABLE: OnceLock<[Vec<f32>; 5]> = OnceLock::new();
    &TABLE.get_or_init(|| SampleRate::ALL.map(build_resampler))[sr.index()]
}

/// 长时后置滤波器系数
///
/// 前向支路与反馈支路共用同一低通原型, 两者相对各自参考点具有相同的群延迟,
/// 因而基音谐波处的增益为 1.
pub struct LtpfFilters {
    /// 抽头数
    pub width: usize,
    /// 带分数延迟的低通插值器 [分数延迟][抽头], 第 0 项同时用作前向支路
    pub taps: [Vec<f32>; 4],
}

/// 后置滤波器抽头数
pub const fn ltpf_width(sr: SampleRate) -> usize {
    let w = sr.khz() / 4;
    if w < 4 { 4 } else { w }
}

fn normalized(v: Vec<f64>) -> Vec<f32> {
    let sum: f64 = v.iter().sum();
    v.iter().map(|&x| (x / sum) as f32).collect()
}

fn build_ltpf(sr: SampleRate) -> LtpfFilters {
    let w = ltpf_width(sr);
    let half = w as f64 / 2.0 + 1.0;
    let taps = std::array::from_fn(|frac| {
        normalized(
            (0..w)
                .map(|k| {
                    let t = k as f64 - (w / 2) as f64 - frac as f64 / 4.0;
                    sinc(0.8 * t) * hann(t, half)
                })
                .collect(),
        )
    });
    LtpfFilters { width: w, taps }
}

/// 长时后置滤波器系数
pub fn ltpf_filters(sr: SampleRate) -> &'static LtpfFilters {
    static TABLE: OnceLock<[LtpfFilters; 5]> = OnceLock::new();
    &TABLE.get_or_init(|| SampleRate::ALL.map(build_ltpf))[sr.index()]
}
