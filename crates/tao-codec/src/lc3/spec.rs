//! 频谱量化与熵编码.
//!
//! 编码端估计全局增益使频谱编码位数接近预算, 量化后按系数对做上下文算术编码;
//! 剩余位用于量化残差 (或 LSB 模式下的最低位). 解码端在长串零系数处做噪声填充.
//!
//! 量化系数以有符号整数保存, 幅度上限为 `i16::MAX`.

use tao_core::{TaoError, TaoResult};

use super::bits::{BitReader, BitWriter};
use super::tns::TnsData;
use super::{Bandwidth, FrameDuration, SampleRate, ltpf, num_coeffs, sns, tables};

/// 全局增益字段位数
const GAIN_BITS: u32 = 8;
/// 噪声因子字段位数
const NOISE_BITS: u32 = 3;

/// 频谱边信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecSide {
    /// 编码的系数个数 (偶数, 至少 2)
    pub nq: usize,
    /// 是否不对第一层最低位做算术编码
    pub lsb_mode: bool,
    /// 全局增益索引
    pub g_idx: u8,
}

impl SpecSide {
    /// 写入码流
    pub fn put(&self, bits: &mut BitWriter, dt: FrameDuration, sr: SampleRate) {
        let n = (self.nq >> 1).max(1) - 1;
        bits.put_bits(n as u32, nq_field_bits(dt, sr));
        bits.put_bit(self.lsb_mode);
        bits.put_bits(self.g_idx as u32, GAIN_BITS);
    }

    /// 从码流读取
    pub fn get(bits: &mut BitReader<'_>, dt: FrameDuration, sr: SampleRate) -> TaoResult<Self> {
        let ne = num_coeffs(dt, sr);
        let nq = (bits.get_bits(nq_field_bits(dt, sr))? as usize + 1) << 1;
        if nq > ne {
            return Err(TaoError::InvalidData(format!(
                "LC3: 系数个数 {} 超过上限 {}",
                nq, ne
            )));
        }
        let lsb_mode = bits.get_bit()?;
        let g_idx = bits.get_bits(GAIN_BITS)? as u8;
        Ok(Self {
            nq,
            lsb_mode,
            g_idx,
        })
    }
}

/// 系数个数字段位数
fn nq_field_bits(dt: FrameDuration, sr: SampleRate) -> u32 {
    let ne = num_coeffs(dt, sr);
    4 + [32, 64, 128, 256].iter().filter(|&&t| ne > t).count() as u32
}

/// 算术编码收尾及系数个数字段占用
fn ac_overhead_bits(dt: FrameDuration, sr: SampleRate, nbytes: usize) -> i32 {
    (nq_field_bits(dt, sr) as usize + 3 + ((nbytes - 1) / 160).min(2)) as i32
}

/// 频谱编码可用位数
pub fn budget_bits(
    dt: FrameDuration,
    sr: SampleRate,
    nbytes: usize,
    pitch_present: bool,
    tns: &TnsData,
) -> i32 {
    (8 * nbytes) as i32
        - ac_overhead_bits(dt, sr, nbytes)
        - Bandwidth::field_bits(sr) as i32
        - ltpf::num_bits(pitch_present) as i32
        - sns::NUM_BITS as i32
        - tns.num_bits() as i32
        - GAIN_BITS as i32
        - NOISE_BITS as i32
}

/// 全局增益索引偏移
pub fn gain_offset(sr: SampleRate, nbytes: usize) -> i32 {
    let k = 1 + sr.index();
    let g = (nbytes * 8 / (10 * k)).min(115);
    (105 + 5 * k + g) as i32
}

/// 高码率模式使用另一组上下文模型
fn high_rate(sr: SampleRate, nbytes: usize) -> bool {
    nbytes > 20 * (1 + sr.index())
}

/// 反量化增益 10^(g/28)
pub fn unquantize_gain(g_int: i32) -> f32 {
    10f32.powf(g_int as f32 / 28.0)
}

/// 估计全局增益, 返回 (增益索引, 是否重置位数偏移)
fn estimate_gain(
    dt: FrameDuration,
    sr: SampleRate,
    x: &[f32],
    nbits_budget: i32,
    nbits_off: f32,
    g_off: i32,
) -> (i32, bool) {
    let ne = num_coeffs(dt, sr);
    let mut x2_max = 0.0f32;
    let e: Vec<f32> = x[..ne]
        .chunks_exact(4)
        .map(|c| {
            let sq = c.iter().map(|v| v * v);
            let sum: f32 = sq.clone().sum();
            x2_max = sq.fold(x2_max, f32::max);
            10.0 * sum.max(1e-10).log10()
        })
        .collect();

    let nbits = (nbits_budget as f32 + nbits_off + 0.5) as i32 as f32;
    let mut g_int = 255 - g_off;

    // 二分搜索: 估计位数不超过预算的最小增益
    let mut j0 = e.len();
    let mut step = 128;
    while step > 0 {
        let gn = (g_int - step) as f32 * (20.0 / 28.0);
        let end = e[..j0].iter().rposition(|&v| v >= gn).map_or(0, |j| j + 1);
        let v: f32 = e[..end]
            .iter()
            .map(|&ei| {
                let d = ei - gn;
                if d < 0.0 {
                    2.7
                } else if d < 43.0 {
                    d + 7.0
                } else {
                    2.0 * d - 36.0
                }
            })
            .sum();
        if v > nbits * 1.4 {
            j0 = end;
        } else {
            g_int -= step;
        }
        step >>= 1;
    }

    let g_min = if x2_max == 0.0 {
        -g_off
    } else {
        (28.0 * (x2_max.sqrt() / (32768.0 - 0.375)).log10()).ceil() as i32
    };

    let reset = g_int < g_min || x2_max == 0.0;
    if reset {
        g_int = g_min;
    }
    (g_int, reset)
}

/// 按实际位数微调增益, 返回 -1..=2
fn adjust_gain(sr: SampleRate, g_idx: i32, nbits: i32, nbits_budget: i32) -> i32 {
    const THRESHOLDS: [[i32; 3]; 5] = [
        [80, 500, 850],
        [230, 1025, 1700],
        [380, 1550, 2550],
        [530, 2075, 3400],
        [680, 2600, 4250],
    ];
    let t = &THRESHOLDS[sr.index()];

    let mut den = 48;
    let delta = if nbits < t[0] {
        3 * (nbits + 48)
    } else if nbits < t[1] {
        let n0 = 3 * (t[0] + 48);
        let range = t[1] - t[0];
        den *= range;
        n0 * range + (nbits - t[0]) * (t[1] - n0)
    } else {
        nbits.min(t[2])
    };
    let delta = (delta + den / 2) / den;

    if nbits < nbits_budget - (delta + 2) {
        return -((g_idx > 0) as i32);
    }
    if nbits > nbits_budget {
        return (g_idx < 255) as i32 + (g_idx < 254 && nbits >= nbits_budget + delta) as i32;
    }
    0
}

/// 以增益 10^(g/28) 量化, `x` 原地缩放; 返回末个非零系数对之后的位置
pub fn quantize(dt: FrameDuration, sr: SampleRate, g_int: i32, x: &mut [f32], xq: &mut [i16]) -> usize {
    let ne = num_coeffs(dt, sr);
    let g_inv = 1.0 / unquantize_gain(g_int);

    for (v, q) in x[..ne].iter_mut().zip(&mut xq[..ne]) {
        *v *= g_inv;
        let m = (v.abs() + 6.0 / 16.0).min(i16::MAX as f32) as i16;
        *q = if *v < 0.0 { -m } else { m };
    }

    xq[..ne]
        .chunks_exact(2)
        .rposition(|p| p[0] != 0 || p[1] != 0)
        .map_or(0, |p| 2 * p + 2)
}

/// 反量化前 `nq` 个系数, 其余置零, 返回增益
pub fn unquantize(dt: FrameDuration, sr: SampleRate, g_int: i32, x: &mut [f32], nq: usize) -> f32 {
    let ne = num_coeffs(dt, sr);
    let g = unquantize_gain(g_int);
    for v in &mut x[..nq] {
        *v *= g;
    }
    x[nq..ne].fill(0.0);
    g
}

/// 上下文状态更新
#[inline]
fn next_state(state: u8, a: u32, b: u32, k: usize) -> u8 {
    let t = if k > 1 {
        12 + k as u32
    } else {
        1 + (a + b) * (k as u32 + 1)
    };
    (state << 4) + t as u8
}

/// 半谱的系数对上界
#[inline]
fn half_end(ne: usize, upper: bool) -> usize {
    (ne + 2) >> (1 - upper as usize)
}

/// 频谱编码位数估计结果
#[derive(Debug, Clone, Copy)]
struct BitCount {
    /// 截断后的系数个数
    n: usize,
    /// 位数
    nbits: i32,
    /// 是否启用 LSB 模式
    lsb_mode: bool,
}

/// 估计编码前 `n` 个量化系数所需位数; 给定预算时截断到预算内
fn compute_nbits(
    dt: FrameDuration,
    sr: SampleRate,
    nbytes: usize,
    xq: &[i16],
    n: usize,
    budget: Option<i32>,
) -> BitCount {
    let ne = num_coeffs(dt, sr);
    let t = tables::spectrum();
    let lsb_allowed = nbytes >= 20 * (3 + sr.index());
    let hr = high_rate(sr, nbytes);

    let limit = budget.map_or(i64::MAX, |b| b as i64 * 2048);
    let mut nbits: i64 = 0;
    let mut nbits_lsb: i64 = 0;
    let mut nbits_end: i64 = 0;
    let mut n_end = 0;
    let mut state = 0u8;

    let mut i = 0;
    for upper in [false, true] {
        while i < n.min(half_end(ne, upper)) && nbits <= limit {
            let model = |state: u8, k: usize| t.model_index(hr, upper, state, k);
            let (mut a, mut b) = (xq[i].unsigned_abs() as u32, xq[i + 1].unsigned_abs() as u32);

            let signs = (a > 0) as i64 + (b > 0) as i64;
            nbits += signs * 2048;

            let mut k = 0;
            let mut m = (a | b) >> 2;
            if m != 0 {
                if lsb_allowed {
                    nbits += t.bits[model(state, 0)][16] as i64 - 2 * 2048;
                    nbits_lsb += 2 + (a == 1) as i64 + (b == 1) as i64;
                    k += 1;
                    m >>= 1;
                }
                while m != 0 {
                    nbits += t.bits[model(state, k)][16] as i64;
                    m >>= 1;
                    k += 1;
                }
                nbits += k as i64 * 2 * 2048;
                a >>= k;
                b >>= k;
                k = k.min(3);
            }

            nbits += t.bits[model(state, k)][(a + 4 * b) as usize] as i64;

            if signs > 0 && nbits <= limit {
                n_end = i + 2;
                nbits_end = nbits;
            }
            state = next_state(state, a, b, k);
            i += 2;
        }
    }

    let lsb_mode = lsb_allowed && budget.is_some() && nbits_end + nbits_lsb * 2048 > limit;
    if budget.is_none() {
        nbits_end += nbits_lsb * 2048;
    }

    BitCount {
        n: n_end,
        nbits: ((nbits_end + 2047) / 2048) as i32,
        lsb_mode,
    }
}

/// 写入量化系数
fn put_quantized(
    bits: &mut BitWriter,
    dt: FrameDuration,
    sr: SampleRate,
    nbytes: usize,
    xq: &[i16],
    nq: usize,
    lsb_mode: bool,
) {
    let ne = num_coeffs(dt, sr);
    let t = tables::spectrum();
    let hr = high_rate(sr, nbytes);
    let lsb = lsb_mode as usize;
    let mut state = 0u8;

    let mut i = 0;
    for upper in [false, true] {
        while i < nq.min(half_end(ne, upper)) {
            let model = |state: u8, k: usize| &t.models[t.model_index(hr, upper, state, k)];
            let (mut a, mut b) = (xq[i].unsigned_abs() as u32, xq[i + 1].unsigned_abs() as u32);

            let mut k = 0;
            let mut shr = 0;
            let mut m = (a | b) >> 2;
            if m != 0 {
                if lsb_mode {
                    bits.put_symbol(model(state, 0), 16);
                    k += 1;
                    m >>= 1;
                }
                while m != 0 {
                    bits.put_bit((a >> k) & 1 != 0);
                    bits.put_bit((b >> k) & 1 != 0);
                    bits.put_symbol(model(state, k.min(3)), 16);
                    m >>= 1;
                    k += 1;
                }
                a >>= lsb;
                b >>= lsb;
                shr = k - lsb;
                k = k.min(3);
            }

            if a != 0 {
                bits.put_bit(xq[i] < 0);
            }
            if b != 0 {
                bits.put_bit(xq[i + 1] < 0);
            }

            a >>= shr;
            b >>= shr;
            bits.put_symbol(model(state, k), (a + 4 * b) as usize);

            state = next_state(state, a, b, k);
            i += 2;
        }
    }
}

/// 读取量化系数, 返回噪声填充种子
fn get_quantized(
    bits: &mut BitReader<'_>,
    dt: FrameDuration,
    sr: SampleRate,
    nbytes: usize,
    nq: usize,
    lsb_mode: bool,
    x: &mut [f32],
) -> TaoResult<u16> {
    let ne = num_coeffs(dt, sr);
    let t = tables::spectrum();
    let hr = high_rate(sr, nbytes);
    let mut seed = 0u32;
    let mut state = 0u8;

    let mut i = 0;
    for upper in [false, true] {
        while i < nq.min(half_end(ne, upper)) {
            let model = |state: u8, k: usize| &t.models[t.model_index(hr, upper, state, k)];

            let (mut u, mut v) = (0u32, 0u32);
            let mut k = 0;
            let mut shl = 0;

            let mut s = bits.get_symbol(model(state, k))?;
            if lsb_mode && s >= 16 {
                k += 1;
                s = bits.get_symbol(model(state, k))?;
                shl += 1;
            }
            while s >= 16 && shl < 14 {
                u |= (bits.get_bit()? as u32) << shl;
                v |= (bits.get_bit()? as u32) << shl;
                k = (k + 1).min(3);
                s = bits.get_symbol(model(state, k))?;
                shl += 1;
            }
            if s >= 16 {
                return Err(TaoError::InvalidData("LC3: 频谱系数逃逸层级过深".into()));
            }

            let (a, b) = (s as u32 % 4, s as u32 / 4);
            u |= a << shl;
            v |= b << shl;

            x[i] = if u != 0 && bits.get_bit()? { -(u as f32) } else { u as f32 };
            x[i + 1] = if v != 0 && bits.get_bit()? { -(v as f32) } else { v as f32 };

            seed = (seed + u * i as u32 + v * (i as u32 + 1)) & 0xffff;

            state = next_state(state, a, b, k);
            i += 2;
        }
    }
    Ok(seed as u16)
}

/// 计数受限的位操作: 剩余位数为正时返回 true, 并扣减一位
#[inline]
fn take(left: &mut i64) -> bool {
    let ok = *left > 0;
    *left -= 1;
    ok
}

/// 写入量化残差: 每个非零系数 1 位, 指示原值在量化值之上或之下
fn put_residual(bits: &mut BitWriter, nbits: usize, xq: &[i16], nq: usize, xf: &[f32]) {
    let mut left = nbits;
    for (&q, &v) in xq[..nq].iter().zip(xf).filter(|(q, _)| **q != 0) {
        if left == 0 {
            break;
        }
        bits.put_bit(v >= q as f32);
        left -= 1;
    }
}

fn get_residual(bits: &mut BitReader<'_>, nbits: usize, x: &mut [f32], nq: usize) -> TaoResult<()> {
    let mut left = nbits;
    for v in x[..nq].iter_mut().filter(|v| **v != 0.0) {
        if left == 0 {
            break;
        }
        if bits.get_bit()? {
            *v += if *v > 0.0 { 5.0 / 16.0 } else { 3.0 / 16.0 };
        } else {
            *v -= if *v < 0.0 { 5.0 / 16.0 } else { 3.0 / 16.0 };
        }
        left -= 1;
    }
    Ok(())
}

/// LSB 模式下写入第一层最低位, 幅度为 1 的系数附带符号
fn put_lsb(bits: &mut BitWriter, nbits: usize, xq: &[i16], nq: usize) {
    let mut left = nbits as i64;
    for p in xq[..nq].chunks_exact(2) {
        if left <= 0 {
            break;
        }
        let (a, b) = (p[0].unsigned_abs(), p[1].unsigned_abs());
        if (a | b) >> 2 == 0 {
            continue;
        }
        if take(&mut left) {
            bits.put_bit(a & 1 != 0);
        }
        if a == 1 && take(&mut left) {
            bits.put_bit(p[0] < 0);
        }
        if take(&mut left) {
            bits.put_bit(b & 1 != 0);
        }
        if b == 1 && take(&mut left) {
            bits.put_bit(p[1] < 0);
        }
    }
}

/// 读取第一层最低位并更新噪声填充种子
fn get_lsb(bits: &mut BitReader<'_>, nbits: usize, x: &mut [f32], nq: usize, seed: &mut u16) -> TaoResult<()> {
    let mut left = nbits as i64;
    let mut i = 0;
    while i < nq && left > 0 {
        if x[i].abs().max(x[i + 1].abs()) >= 4.0 {
            for j in i..i + 2 {
                if take(&mut left) && bits.get_bit()? {
                    if x[j] != 0.0 {
                        x[j] += if x[j] < 0.0 { -1.0 } else { 1.0 };
                        *seed = seed.wrapping_add(j as u16);
                    } else if take(&mut left) {
                        x[j] = if bits.get_bit()? { -1.0 } else { 1.0 };
                        *seed = seed.wrapping_add(j as u16);
                    }
                }
            }
        }
        i += 2;
    }
    Ok(())
}

/// 噪声填充区间: (起点, 带宽上限, 零串半宽)
fn noise_region(dt: FrameDuration, bw: Bandwidth) -> (usize, usize, usize) {
    let q = dt.quarters();
    let w = [1, 1, 2, 3][dt.index()];
    (6 * q - w, 20 * q * (1 + bw.index()), w)
}

/// 遍历噪声填充位置: 距离最近的非零系数超过 `w` 的零系数
fn for_each_noise_bin(
    dt: FrameDuration,
    bw: Bandwidth,
    nq: usize,
    is_zero: impl Fn(usize) -> bool,
    mut f: impl FnMut(usize),
) {
    let (start, bw_stop, w) = noise_region(dt, bw);
    let mut z = 0;
    for i in start..bw_stop + w {
        z = if i >= nq.min(bw_stop) || is_zero(i) { z + 1 } else { 0 };
        if z > 2 * w {
            f(i - w);
        }
    }
}

/// 估计噪声因子 (0..=7)
fn estimate_noise(dt: FrameDuration, bw: Bandwidth, xq: &[i16], nq: usize, x: &[f32]) -> u32 {
    let mut sum = 0.0f32;
    let mut n = 0;
    for_each_noise_bin(dt, bw, nq, |i| xq[i] == 0, |i| {
        sum += x[i].abs();
        n += 1;
    });
    if n == 0 {
        return 0;
    }
    let nf = 8 - ((16.0 * sum) / n as f32 + 0.5) as i32;
    nf.clamp(0, 7) as u32
}

/// 噪声填充
fn fill_noise(dt: FrameDuration, bw: Bandwidth, nf: u32, mut seed: u16, g: f32, x: &mut [f32], nq: usize) {
    let s = g * (8 - nf) as f32 / 16.0;
    let zeros: Vec<bool> = x.iter().map(|&v| v == 0.0).collect();
    for_each_noise_bin(dt, bw, nq, |i| zeros[i], |i| {
        seed = seed.wrapping_mul(31821).wrapping_add(13849);
        x[i] = if seed & 0x8000 != 0 { -s } else { s };
    });
}

/// 增益细化的搜索半径
const REFINE_SPAN: i32 = 6;

/// 编码端频谱分析状态
#[derive(Debug, Clone, Default)]
pub struct SpecAnalysis {
    /// 平滑后的位数偏移
    nbits_off: f32,
    /// 上一帧剩余位数
    nbits_spare: i32,
    /// 未缩放的频谱
    orig: Vec<f32>,
    /// 候选增益下的缩放频谱与量化值
    scaled: Vec<f32>,
    cand: Vec<i16>,
}

impl SpecAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在估计增益附近选择预算内重建误差最小的增益, 误差相同时取较小的增益
    ///
    /// 超出预算而被截断的系数按全部丢失计入误差.
    fn refine(
        &mut self,
        dt: FrameDuration,
        sr: SampleRate,
        nbytes: usize,
        budget: i32,
        g_est: i32,
        g_range: (i32, i32),
    ) -> i32 {
        let ne = self.orig.len();
        self.scaled.resize(ne, 0.0);
        self.cand.resize(ne, 0);

        let lo = (g_est - REFINE_SPAN).max(g_range.0);
        let hi = (g_est + REFINE_SPAN).min(g_range.1);
        let mut best = (f32::INFINITY, g_est.clamp(g_range.0, g_range.1));
        for g in lo..=hi {
            self.scaled.copy_from_slice(&self.orig);
            let nq = quantize(dt, sr, g, &mut self.scaled, &mut self.cand);
            let count = compute_nbits(dt, sr, nbytes, &self.cand, nq, Some(budget));

            let step = unquantize_gain(g);
            let dist: f32 = self
                .orig
                .iter()
                .zip(&self.cand)
                .enumerate()
                .map(|(i, (&v, &q))| {
                    let r = if i < count.n { q as f32 * step } else { 0.0 };
                    (v - r) * (v - r)
                })
                .sum();
            if dist < best.0 {
                best = (dist, g);
            }
        }
        best.1
    }

    /// 估计增益并量化
    ///
    /// `x` 原地缩放为量化尺度下的频谱, 供噪声因子估计与残差编码使用.
    #[allow(clippy::too_many_arguments)]
    pub fn analyze(
        &mut self,
        dt: FrameDuration,
        sr: SampleRate,
        nbytes: usize,
        pitch_present: bool,
        tns: &TnsData,
        x: &mut [f32],
        xq: &mut [i16],
    ) -> SpecSide {
        let budget = budget_bits(dt, sr, nbytes, pitch_present, tns);
        let ne = num_coeffs(dt, sr);
        self.orig.clear();
        self.orig.extend_from_slice(&x[..ne]);

        let off = (self.nbits_off + self.nbits_spare as f32).clamp(-40.0, 40.0);
        let off = 0.8 * self.nbits_off + 0.2 * off;

        let g_off = gain_offset(sr, nbytes);
        let (g_int, reset) = estimate_gain(dt, sr, x, budget, off, g_off);

        let nq = quantize(dt, sr, g_int, x, xq);
        let count = compute_nbits(dt, sr, nbytes, xq, nq, None);

        if reset {
            self.nbits_off = 0.0;
            self.nbits_spare = 0;
        } else {
            self.nbits_off = off;
            self.nbits_spare = budget - count.nbits;
        }

        let g_adj = adjust_gain(sr, g_int + g_off, count.nbits, budget);
        let g_range = (-g_off, 255 - g_off);
        let g_int = if reset {
            (g_int + g_adj).clamp(g_range.0, g_range.1)
        } else {
            self.refine(dt, sr, nbytes, budget, g_int + g_adj, g_range)
        };

        x[..ne].copy_from_slice(&self.orig);
        let nq = quantize(dt, sr, g_int, x, xq);
        let count = compute_nbits(dt, sr, nbytes, xq, nq, Some(budget));
        SpecSide {
            nq: count.n.max(2),
            lsb_mode: count.lsb_mode,
            g_idx: (g_int + g_off) as u8,
        }
    }
}

/// 写入噪声因子、量化系数与残差
#[allow(clippy::too_many_arguments)]
pub fn encode(
    bits: &mut BitWriter,
    dt: FrameDuration,
    sr: SampleRate,
    bw: Bandwidth,
    nbytes: usize,
    xq: &[i16],
    side: &SpecSide,
    x: &[f32],
) {
    let nq = side.nq;
    bits.put_bits(estimate_noise(dt, bw, xq, nq, x), NOISE_BITS);

    put_quantized(bits, dt, sr, nbytes, xq, nq, side.lsb_mode);

    let left = bits.bits_left();
    if side.lsb_mode {
        put_lsb(bits, left, xq, nq);
    } else {
        put_residual(bits, left, xq, nq, x);
    }
}

/// 解码频谱系数到 `x` (前 NE 个)
pub fn decode(
    bits: &mut BitReader<'_>,
    dt: FrameDuration,
    sr: SampleRate,
    bw: Bandwidth,
    nbytes: usize,
    side: &SpecSide,
    x: &mut [f32],
) -> TaoResult<()> {
    let nq = side.nq;
    let nf = bits.get_bits(NOISE_BITS)?;
    let mut seed = get_quantized(bits, dt, sr, nbytes, nq, side.lsb_mode, x)?;

    let left = bits.bits_left();
    if side.lsb_mode {
        get_lsb(bits, left, x, nq, &mut seed)?;
    } else {
        get_residual(bits, left, x, nq)?;
    }

    let g_int = side.g_idx as i32 - gain_offset(sr, nbytes);
    let g = unquantize(dt, sr, g_int, x, nq);

    if nq > 2 || x[0] != 0.0 || x[1] != 0.0 || side.g_idx > 0 || nf < 7 {
        fill_noise(dt, bw, nf, seed, g, x, nq);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 确定性的测试频谱: 低频强, 高频逐渐衰减
    fn test_spectrum(n: usize, amp: f32) -> Vec<f32> {
        let mut seed = 12345u32;
        (0..n)
            .map(|i| {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                let r = ((seed >> 16) & 0x7fff) as f32 / 32768.0 - 0.5;
                amp * r * (-(i as f32) / 60.0).exp()
            })
            .collect()
    }

    /// 编码边信息与频谱, 再解码
    fn round_trip(
        dt: FrameDuration,
        sr: SampleRate,
        bw: Bandwidth,
        nbytes: usize,
        x: &[f32],
    ) -> (SpecSide, Vec<f32>) {
        let ne = num_coeffs(dt, sr);
        let tns = TnsData::disabled(dt, bw, nbytes);
        let mut xs = x.to_vec();
        let mut xq = vec![0i16; ne];
        let side = SpecAnalysis::new().analyze(dt, sr, nbytes, false, &tns, &mut xs, &mut xq);

        let mut w = BitWriter::new(nbytes);
        side.put(&mut w, dt, sr);
        encode(&mut w, dt, sr, bw, nbytes, &xq, &side, &xs);
        let data = w.finish().unwrap();

        let mut br = BitReader::new(&data);
        let got = SpecSide::get(&mut br, dt, sr).unwrap();
        assert_eq!(got, side);
        let mut y = vec![0.0f32; ne];
        decode(&mut br, dt, sr, bw, nbytes, &got, &mut y).unwrap();
        br.check().unwrap();
        (side, y)
    }

    #[test]
    fn test_增益偏移() {
        assert_eq!(gain_offset(SampleRate::Hz16000, 40), 131);
        assert_eq!(gain_offset(SampleRate::Hz8000, 400), 105 + 5 + 115);
    }

    #[test]
    fn test_量化与末位非零() {
        let (dt, sr) = (FrameDuration::Ms10, SampleRate::Hz8000);
        let ne = num_coeffs(dt, sr);
        let mut x = vec![0.0f32; ne];
        x[0] = 1.0;
        x[1] = -2.7;
        x[2] = 0.2;
        x[7] = 0.5;
        let mut xq = vec![0i16; ne];
        let nq = quantize(dt, sr, 0, &mut x, &mut xq);
        assert_eq!(&xq[..8], &[1, -3, 0, 0, 0, 0, 0, 0]);
        assert_eq!(nq, 2);

        let g = unquantize(dt, sr, 28, &mut x, 4);
        assert!((g - 10.0).abs() < 1e-4);
        assert!((x[1] + 27.0).abs() < 1e-3);
        assert!(x[4..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_增益微调方向() {
        let sr = SampleRate::Hz16000;
        assert_eq!(adjust_gain(sr, 100, 500, 500), 0);
        assert_eq!(adjust_gain(sr, 100, 300, 500), -1);
        assert_eq!(adjust_gain(sr, 0, 300, 500), 0);
        assert!(adjust_gain(sr, 100, 600, 500) >= 1);
        assert_eq!(adjust_gain(sr, 255, 600, 500), 0);
    }

    #[test]
    fn test_位数预算截断() {
        let (dt, sr) = (FrameDuration::Ms10, SampleRate::Hz16000);
        let ne = num_coeffs(dt, sr);
        let xq: Vec<i16> = (0..ne).map(|i| if i % 3 == 0 { 5 } else { -2 }).collect();
        let full = compute_nbits(dt, sr, 40, &xq, ne, None);
        assert_eq!(full.n, ne);
        let cut = compute_nbits(dt, sr, 40, &xq, ne, Some(full.nbits / 2));
        assert!(cut.n < ne);
        assert!(cut.nbits <= full.nbits / 2);
    }

    #[test]
    fn test_反量化频谱再分析增益不变() {
        for (dt, sr, nbytes) in [
            (FrameDuration::Ms10, SampleRate::Hz16000, 40),
            (FrameDuration::Ms10, SampleRate::Hz48000, 120),
            (FrameDuration::Ms7p5, SampleRate::Hz8000, 20),
        ] {
            let ne = num_coeffs(dt, sr);
            let tns = TnsData::disabled(dt, Bandwidth::max_for(sr), nbytes);
            let g_off = gain_offset(sr, nbytes);

            let mut x = test_spectrum(ne, 4000.0);
            let mut xq = vec![0i16; ne];
            let first = SpecAnalysis::new().analyze(dt, sr, nbytes, false, &tns, &mut x, &mut xq);

            let g = unquantize_gain(first.g_idx as i32 - g_off);
            let mut y: Vec<f32> = xq.iter().map(|&q| q as f32 * g).collect();
            y[first.nq..].fill(0.0);
            let mut yq = vec![0i16; ne];
            let second = SpecAnalysis::new().analyze(dt, sr, nbytes, false, &tns, &mut y, &mut yq);

            assert!(
                (second.g_idx as i32 - first.g_idx as i32).abs() <= 1,
                "{:?} {:?} {} 字节: {} -> {}",
                dt,
                sr,
                nbytes,
                first.g_idx,
                second.g_idx
            );
        }
    }

    #[test]
    fn test_位数估计不低于实际消耗() {
        // 估计值加收尾的 3 位须覆盖算术编码与普通位的实际占用
        for (dt, sr, nbytes, amp) in [
            (FrameDuration::Ms10, SampleRate::Hz16000, 40, 3000.0),
            (FrameDuration::Ms10, SampleRate::Hz8000, 30, 800.0),
            (FrameDuration::Ms7p5, SampleRate::Hz48000, 100, 5000.0),
            (FrameDuration::Ms10, SampleRate::Hz32000, 60, 20000.0),
        ] {
            let ne = num_coeffs(dt, sr);
            let mut x = test_spectrum(ne, amp);
            let mut xq = vec![0i16; ne];
            let nq = quantize(dt, sr, 0, &mut x, &mut xq);
            let count = compute_nbits(dt, sr, nbytes, &xq, nq, None);

            let mut w = BitWriter::new(400);
            put_quantized(&mut w, dt, sr, nbytes, &xq, count.n, false);
            let used = w.ac_bits() + w.plain_bits();
            assert!(
                used <= count.nbits as usize + 3,
                "{:?} {:?}: 实际 {} 位, 估计 {} 位",
                dt,
                sr,
                used,
                count.nbits
            );
        }
    }

    #[test]
    fn test_频谱编解码往返() {
        let (dt, sr, bw) = (FrameDuration::Ms10, SampleRate::Hz16000, Bandwidth::Wb);
        let ne = num_coeffs(dt, sr);
        let x = test_spectrum(ne, 4000.0);
        let (side, y) = round_trip(dt, sr, bw, 200, &x);
        assert!(!side.lsb_mode);

        let g = unquantize_gain(side.g_idx as i32 - gain_offset(sr, 200));
        for i in 0..side.nq {
            assert!((y[i] - x[i]).abs() <= g, "i={} {} vs {} (g={})", i, y[i], x[i], g);
        }
        let err: f32 = x.iter().zip(&y).map(|(a, b)| (a - b) * (a - b)).sum();
        let sig: f32 = x.iter().map(|a| a * a).sum();
        assert!(err < 0.05 * sig, "err={} sig={}", err, sig);
    }

    #[test]
    fn test_低码率编解码() {
        for (dt, sr, bw) in [
            (FrameDuration::Ms10, SampleRate::Hz8000, Bandwidth::Nb),
            (FrameDuration::Ms7p5, SampleRate::Hz48000, Bandwidth::Fb),
        ] {
            let ne = num_coeffs(dt, sr);
            let x = test_spectrum(ne, 20000.0);
            let (side, y) = round_trip(dt, sr, bw, 20, &x);
            assert!(side.nq >= 2 && side.nq <= ne);
            assert!(y.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_静音频谱() {
        let (dt, sr, bw) = (FrameDuration::Ms10, SampleRate::Hz32000, Bandwidth::Swb);
        let ne = num_coeffs(dt, sr);
        let (side, y) = round_trip(dt, sr, bw, 60, &vec![0.0; ne]);
        assert_eq!(side.nq, 2);
        let g = unquantize_gain(side.g_idx as i32 - gain_offset(sr, 60));
        // 噪声填充幅度不超过半个量化步长
        assert!(y.iter().all(|v| v.abs() <= g * 0.5));
    }

    #[test]
    fn test_最低位读写() {
        let xq: [i16; 8] = [5, -4, 1, 8, -1, 12, 0, 0];
        let mut w = BitWriter::new(20);
        put_lsb(&mut w, 64, &xq, 8);
        let data = w.finish().unwrap();

        let mut x = [4.0f32, -4.0, 0.0, 8.0, 0.0, 12.0, 0.0, 0.0];
        let mut seed = 0u16;
        let mut br = BitReader::new(&data);
        get_lsb(&mut br, 64, &mut x, 8, &mut seed).unwrap();
        let expect: Vec<f32> = xq.iter().map(|&v| v as f32).collect();
        assert_eq!(x.to_vec(), expect);
        assert_eq!(seed, 6);
    }

    #[test]
    fn test_噪声因子估计() {
        let (dt, bw) = (FrameDuration::Ms10, Bandwidth::Nb);
        let xq = vec![0i16; 80];
        let x = vec![0.25f32; 80];
        assert_eq!(estimate_noise(dt, bw, &xq, 2, &x), 4);
        let x = vec![0.0f32; 80];
        assert_eq!(estimate_noise(dt, bw, &xq, 2, &x), 7);
    }

    #[test]
    fn test_系数个数越界() {
        let (dt, sr) = (FrameDuration::Ms10, SampleRate::Hz8000);
        let mut w = BitWriter::new(20);
        w.put_bits(63, nq_field_bits(dt, sr));
        w.put_bit(false);
        w.put_bits(100, 8);
        let data = w.finish().unwrap();
        let mut br = BitReader::new(&data);
        assert!(SpecSide::get(&mut br, dt, sr).is_err());
    }
}
