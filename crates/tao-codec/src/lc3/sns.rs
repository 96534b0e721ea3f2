//! 频谱噪声整形 (SNS).
//!
//! 编码端由频带能量得到 16 个尺度因子, 经两级矢量量化 (一级码本 + PVQ 残差)
//! 后插值到各频带, 用于平坦化频谱; 解码端按相同的量化尺度因子恢复频谱包络.

use tao_core::{TaoError, TaoResult};

use super::bits::{BitReader, BitWriter};
use super::{FrameDuration, MAX_BANDS, SampleRate, num_bands, tables};

/// SNS 参数占用的比特数
pub const NUM_BITS: usize = 38;

/// 形状 0/1 的枚举索引个数 (N = 10, K = 10)
const SIZE_A_SHAPE01: u32 = 2_390_004;

/// 形状 2 的枚举索引个数 (N = 16, K = 8)
const SIZE_A_SHAPE2: u32 = 15_158_272;

/// 形状 3 的复用码个数
const SIZE_SHAPE3: u32 = 1_549_824;

/// 各形状的脉冲总数
const SHAPE_PULSES: [u32; 4] = [10, 10, 8, 6];

/// 帧内 SNS 量化参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnsData {
    /// 低频码本索引
    pub lfcb: u8,
    /// 高频码本索引
    pub hfcb: u8,
    /// PVQ 形状 (0..4)
    pub shape: u8,
    /// 增益索引
    pub gain: u8,
    pub idx_a: u32,
    pub ls_a: bool,
    /// 仅形状 0 使用
    pub idx_b: u32,
    pub ls_b: bool,
}

impl SnsData {
    /// 写入码流
    pub fn put(&self, bits: &mut BitWriter) {
        bits.put_bits(self.lfcb as u32, 5);
        bits.put_bits(self.hfcb as u32, 5);

        let shape_msb = self.shape >> 1;
        let submode = self.shape & 1;
        bits.put_bit(shape_msb != 0);

        if shape_msb == 0 {
            let mux_high = if submode == 0 {
                2 * (self.idx_b + 1) + self.ls_b as u32
            } else {
                (self.gain & 1) as u32
            };
            bits.put_bits((self.gain >> submode) as u32, 1);
            bits.put_bit(self.ls_a);
            bits.put_bits(mux_high * SIZE_A_SHAPE01 + self.idx_a, 25);
        } else {
            let mux = if submode == 0 {
                self.idx_a
            } else {
                SIZE_A_SHAPE2 + 2 * self.idx_a + (self.gain & 1) as u32
            };
            bits.put_bits((self.gain >> submode) as u32, 2);
            bits.put_bit(self.ls_a);
            bits.put_bits(mux, 24);
        }
    }

    /// 从码流读取, 复用码越界时返回 [`TaoError::InvalidData`]
    pub fn get(bits: &mut BitReader<'_>) -> TaoResult<Self> {
        let mut data = Self {
            lfcb: bits.get_bits(5)? as u8,
            hfcb: bits.get_bits(5)? as u8,
            ..Self::default()
        };

        let shape_msb = bits.get_bit()?;
        let mut gain = bits.get_bits(1 + shape_msb as u32)?;
        data.ls_a = bits.get_bit()?;
        let mut mux = bits.get_bits(25 - shape_msb as u32)?;

        if !shape_msb {
            if mux >= 14 * SIZE_A_SHAPE01 {
                return Err(TaoError::InvalidData(format!(
                    "LC3: SNS 复用码 {} 越界",
                    mux
                )));
            }
            data.idx_a = mux % SIZE_A_SHAPE01;
            mux /= SIZE_A_SHAPE01;
            if mux < 2 {
                data.shape = 1;
                gain = (gain << 1) + mux;
            } else {
                data.shape = 0;
                data.idx_b = (mux - 2) / 2;
                data.ls_b = (mux - 2) % 2 != 0;
            }
        } else {
            if mux >= SIZE_A_SHAPE2 + SIZE_SHAPE3 {
                return Err(TaoError::InvalidData(format!(
                    "LC3: SNS 复用码 {} 越界",
                    mux
                )));
            }
            if mux < SIZE_A_SHAPE2 {
                data.shape = 2;
                data.idx_a = mux;
            } else {
                mux -= SIZE_A_SHAPE2;
                data.shape = 3;
                data.idx_a = mux / 2;
                gain = (gain << 1) + mux % 2;
            }
        }
        data.gain = gain as u8;
        Ok(data)
    }
}

/// 编码端分析: 计算并量化尺度因子, 对频谱做整形
pub fn analyze(
    dt: FrameDuration,
    sr: SampleRate,
    eb: &[f32],
    att: bool,
    x: &[f32],
    y: &mut [f32],
) -> SnsData {
    let scf = compute_scale_factors(dt, sr, eb, att);
    let (lfcb, hfcb) = resolve_codebooks(&scf);
    let q = quantize(&scf, lfcb, hfcb);

    let mut data = SnsData {
        lfcb: lfcb as u8,
        hfcb: hfcb as u8,
        shape: q.shape as u8,
        gain: q.gain as u8,
        ..SnsData::default()
    };

    let c = &q.c[q.shape];
    let n = if q.shape < 2 { 10 } else { 16 };
    (data.idx_a, data.ls_a) = enum_mpvq(&c[..n]);
    if q.shape == 0 {
        (data.idx_b, data.ls_b) = enum_mpvq(&c[10..]);
    }

    let scf_q = unquantize(lfcb, hfcb, &q.cn[q.shape], q.shape, q.gain);
    spectral_shaping(dt, sr, &scf_q, false, x, y);
    data
}

/// 解码端合成: 还原尺度因子并对频谱做反整形
pub fn synthesize(dt: FrameDuration, sr: SampleRate, data: &SnsData, x: &[f32], y: &mut [f32]) {
    let shape = data.shape as usize;
    let mut c = [0i32; 16];
    let n = if shape < 2 { 10 } else { 16 };
    deenum_mpvq(data.idx_a, data.ls_a, SHAPE_PULSES[shape], &mut c[..n]);
    if shape == 0 {
        deenum_mpvq(data.idx_b, data.ls_b, 1, &mut c[10..]);
    }

    let cn = normalize(&c);
    let scf = unquantize(
        data.lfcb as usize,
        data.hfcb as usize,
        &cn,
        shape,
        data.gain as usize,
    );
    spectral_shaping(dt, sr, &scf, true, x, y);
}

fn dct16_forward(x: &[f32; 16]) -> [f32; 16] {
    let m = &tables::sns().dct16;
    std::array::from_fn(|i| (0..16).map(|j| x[j] * m[j][i]).sum())
}

fn dct16_inverse(x: &[f32; 16]) -> [f32; 16] {
    let m = &tables::sns().dct16;
    std::array::from_fn(|i| (0..16).map(|j| x[j] * m[i][j]).sum())
}

/// 不足 64 个频带时的补齐方式: 前 n4 个频带复制 4 份, 随后 n2 个复制 2 份
fn padding(nb: usize) -> (usize, usize) {
    if nb < 32 {
        let n4 = 32 % nb;
        (n4, nb - n4)
    } else {
        (0, MAX_BANDS - nb)
    }
}

/// 由频带能量计算 16 个尺度因子
fn compute_scale_factors(dt: FrameDuration, sr: SampleRate, eb: &[f32], att: bool) -> [f32; 16] {
    let nb = num_bands(dt, sr);
    let (n4, n2) = padding(nb);

    let mut e = [0.0f32; MAX_BANDS];
    for i in 0..n4 {
        e[4 * i..4 * i + 4].fill(eb[i]);
    }
    for i in n4..n4 + n2 {
        let j = 2 * (n4 + i);
        e[j..j + 2].fill(eb[i]);
    }
    e[4 * n4 + 2 * n2..].copy_from_slice(&eb[n4 + n2..nb]);

    // 平滑, 预加重与取对数
    let tilt = [14.0f32, 18.0, 22.0, 26.0, 30.0][sr.index()];
    let src = e;
    let mut e_sum = 0.0f32;
    for (i, v) in e.iter_mut().enumerate() {
        let ge = 10f32.powf(i as f32 * tilt / 630.0);
        let prev = src[i.saturating_sub(1)];
        *v = if i + 1 < MAX_BANDS {
            (prev * 0.25 + src[i] * 0.5 + src[i + 1] * 0.25) * ge
        } else {
            (prev * 0.25 + src[i] * 0.75) * ge
        };
        e_sum += *v;
    }

    let noise_floor = (e_sum * (1e-4 / 64.0)).max(2f32.powi(-32));
    for v in &mut e {
        *v = v.max(noise_floor).log2() * 0.5;
    }

    // 分组到 16 个尺度因子
    let group = |a: f32, b: f32, c: f32, d: f32, f: f32, g: f32| {
        (a + b) / 12.0 + (c + d) * 2.0 / 12.0 + (f + g) * 3.0 / 12.0
    };
    let mut scf = [0.0f32; 16];
    scf[0] = group(e[0], e[4], e[0], e[3], e[1], e[2]);
    for i in 1..15 {
        scf[i] = group(
            e[4 * i - 1],
            e[4 * i + 4],
            e[4 * i],
            e[4 * i + 3],
            e[4 * i + 1],
            e[4 * i + 2],
        );
    }
    scf[15] = group(e[59], e[63], e[60], e[63], e[61], e[62]);

    let mean = scf.iter().sum::<f32>() / 16.0;
    for v in &mut scf {
        *v = 0.85 * (*v - mean);
    }

    if !att {
        return scf;
    }

    // 攻击帧: 5 点滑动平均后压缩动态范围
    let src = scf;
    for (i, v) in scf.iter_mut().enumerate() {
        let lo = i.saturating_sub(2);
        let hi = (i + 2).min(15);
        *v = src[lo..=hi].iter().sum::<f32>() / (hi - lo + 1) as f32;
    }
    let mean = scf.iter().sum::<f32>() / 16.0;
    let fac = match dt {
        FrameDuration::Ms10 => 0.5,
        _ => 0.3,
    };
    for v in &mut scf {
        *v = fac * (*v - mean);
    }
    scf
}

/// 按欧氏距离选择一级码本, 距离相同时取较小索引
fn resolve_codebooks(scf: &[f32; 16]) -> (usize, usize) {
    let t = tables::sns();
    let nearest = |cb: &[[f32; 8]; 32], x: &[f32]| {
        let mut best = (0, f32::MAX);
        for (i, v) in cb.iter().enumerate() {
            let d: f32 = v.iter().zip(x).map(|(a, b)| (b - a) * (b - a)).sum();
            if i == 0 || d < best.1 {
                best = (i, d);
            }
        }
        best.0
    };
    (nearest(&t.lfcb, &scf[..8]), nearest(&t.hfcb, &scf[8..]))
}

/// PVQ 量化结果
struct Quantized {
    /// 4 种形状的脉冲配置 (带符号)
    c: [[i32; 16]; 4],
    /// 单位能量归一化后的配置
    cn: [[f32; 16]; 4],
    shape: usize,
    gain: usize,
}

/// 逐个添加单位脉冲, 每次选使 corr²/energy 最大的位置
fn add_pulse(x: &[f32], y: &mut [i32], count: u32, corr: &mut f32, energy: &mut f32) {
    for _ in 0..count {
        let mut best_c2 = (*corr + x[0]) * (*corr + x[0]);
        let mut best_e = *energy + 2.0 * y[0] as f32 + 1.0;
        let mut nbest = 0;
        for i in 1..x.len() {
            let c2 = (*corr + x[i]) * (*corr + x[i]);
            let e = *energy + 2.0 * y[i] as f32 + 1.0;
            if c2 * best_e > e * best_c2 {
                best_c2 = c2;
                best_e = e;
                nbest = i;
            }
        }
        *corr += x[nbest];
        *energy += 2.0 * y[nbest] as f32 + 1.0;
        y[nbest] += 1;
    }
}

fn normalize(c: &[i32; 16]) -> [f32; 16] {
    let c2: i32 = c.iter().map(|v| v * v).sum();
    if c2 == 0 {
        return [0.0; 16];
    }
    let norm = 1.0 / (c2 as f32).sqrt();
    c.map(|v| v as f32 * norm)
}

/// 对一级码本残差做 PVQ 量化, 选择均方误差最小的 (形状, 增益)
fn quantize(scf: &[f32; 16], lfcb: usize, hfcb: usize) -> Quantized {
    let t = tables::sns();
    let mut r = [0.0f32; 16];
    for i in 0..8 {
        r[i] = scf[i] - t.lfcb[lfcb][i];
        r[8 + i] = scf[8 + i] - t.hfcb[hfcb][i];
    }
    let x = dct16_forward(&r);
    let xm = x.map(f32::abs);
    let xm_sum: f32 = xm.iter().sum();

    let mut c = [[0i32; 16]; 4];

    // 形状 3: 投影到 K = 6 的棱锥之下, 再补足脉冲
    let proj = 5.0 / xm_sum.max(1e-31);
    let (mut corr, mut energy) = (0.0f32, 0.0f32);
    let mut npulses = 0u32;
    for i in 0..16 {
        let v = (xm[i] * proj).floor() as i32;
        c[3][i] = v;
        npulses += v as u32;
        corr += v as f32 * xm[i];
        energy += (v * v) as f32;
    }
    add_pulse(&xm, &mut c[3], 6u32.saturating_sub(npulses), &mut corr, &mut energy);

    // 形状 2: 在形状 3 上补到 K = 8
    c[2] = c[3];
    add_pulse(&xm, &mut c[2], 2, &mut corr, &mut energy);

    // 形状 1: 去掉 10..16 的脉冲, 在前 10 个位置补到 K = 10
    c[1] = c[2];
    let mut npulses = 8u32;
    for i in 10..16 {
        let v = c[2][i];
        c[1][i] = 0;
        npulses -= v as u32;
        corr -= v as f32 * xm[i];
        energy -= (v * v) as f32;
    }
    add_pulse(&xm[..10], &mut c[1][..10], 10 - npulses, &mut corr, &mut energy);

    // 形状 0: 在 10..16 上再加 1 个脉冲
    c[0] = c[1];
    add_pulse(&xm[10..], &mut c[0][10..], 1, &mut corr, &mut energy);

    for ci in &mut c {
        for (v, &xv) in ci.iter_mut().zip(&x) {
            if xv < 0.0 {
                *v = -*v;
            }
        }
    }
    let cn = [
        normalize(&c[0]),
        normalize(&c[1]),
        normalize(&c[2]),
        normalize(&c[3]),
    ];

    let mut best = (0, 0, f32::MAX);
    for (shape, gains) in tables::SNS_GAINS.iter().enumerate() {
        let mut cbest = (0, f32::MAX);
        for (gi, &g) in gains.iter().enumerate() {
            let mse: f32 = (0..16)
                .map(|i| (x[i] - g * cn[shape][i]) * (x[i] - g * cn[shape][i]))
                .sum();
            if mse < cbest.1 {
                cbest = (gi, mse);
            }
        }
        if cbest.1 < best.2 {
            best = (shape, cbest.0, cbest.1);
        }
    }

    Quantized {
        c,
        cn,
        shape: best.0,
        gain: best.1,
    }
}

/// 由码本与归一化脉冲配置还原尺度因子
fn unquantize(lfcb: usize, hfcb: usize, cn: &[f32; 16], shape: usize, gain: usize) -> [f32; 16] {
    let t = tables::sns();
    let g = tables::SNS_GAINS[shape][gain];
    let mut scf = dct16_inverse(cn);
    for i in 0..8 {
        scf[i] = t.lfcb[lfcb][i] + g * scf[i];
        scf[8 + i] = t.hfcb[hfcb][i] + g * scf[8 + i];
    }
    scf
}

/// PVQ 枚举, 返回 (索引, 首个非零系数的符号)
///
/// 从末尾向前扫描, 跳过末尾的零.
fn enum_mpvq(c: &[i32]) -> (u32, bool) {
    let a = &tables::sns().mpvq_offsets;
    let n = c.len();

    let mut i = 0;
    while i < n - 1 && c[n - 1 - i] == 0 {
        i += 1;
    }
    let ci = c[n - 1 - i];
    let mut idx = 0u32;
    let mut ls = ci < 0;
    let mut j = ci.unsigned_abs() as usize;

    for i in i + 1..n {
        let ci = c[n - 1 - i];
        if ci != 0 {
            idx = (idx << 1) | ls as u32;
            ls = ci < 0;
        }
        idx += a[i][j.min(10)];
        j += ci.unsigned_abs() as usize;
    }
    (idx, ls)
}

/// PVQ 反枚举, `c` 为输出配置
fn deenum_mpvq(mut idx: u32, mut ls: bool, mut npulses: u32, c: &mut [i32]) {
    let a = &tables::sns().mpvq_offsets;
    let n = c.len();
    let mut out = 0;
    let mut i = n as isize - 1;

    while i >= 0 && idx != 0 {
        let row = &a[i as usize];
        let mut ci = 0;
        while idx < row[(npulses - ci) as usize] {
            ci += 1;
        }
        idx -= row[(npulses - ci) as usize];

        c[out] = if ls { -(ci as i32) } else { ci as i32 };
        out += 1;
        npulses -= ci;
        if ci > 0 {
            ls = idx & 1 != 0;
            idx >>= 1;
        }
        i -= 1;
    }

    if i >= 0 {
        c[out] = if ls { -(npulses as i32) } else { npulses as i32 };
        out += 1;
    }
    c[out..].fill(0);
}

/// 把 16 个尺度因子插值到各频带, 并按 2^-scf (反向时 2^scf) 缩放频谱
fn spectral_shaping(
    dt: FrameDuration,
    sr: SampleRate,
    scf_q: &[f32; 16],
    inv: bool,
    x: &[f32],
    y: &mut [f32],
) {
    let q = |i: usize| if inv { -scf_q[i] } else { scf_q[i] };

    let mut scf = [0.0f32; MAX_BANDS];
    scf[0] = q(0);
    scf[1] = q(0);
    for i in 0..15 {
        let (s0, s1) = (q(i), q(i + 1));
        for (k, f) in [0.125f32, 0.375, 0.625, 0.875].iter().enumerate() {
            scf[4 * i + 2 + k] = s0 + f * (s1 - s0);
        }
    }
    let (s0, s1) = (q(14), q(15));
    scf[62] = s1 + 0.125 * (s1 - s0);
    scf[63] = s1 + 0.375 * (s1 - s0);

    let nb = num_bands(dt, sr);
    let (n4, n2) = padding(nb);
    for i in 0..n4 {
        scf[i] = 0.25 * scf[4 * i..4 * i + 4].iter().sum::<f32>();
    }
    for i in n4..n4 + n2 {
        let j = 2 * (n4 + i);
        scf[i] = 0.5 * (scf[j] + scf[j + 1]);
    }
    scf.copy_within(4 * n4 + 2 * n2..4 * n4 + 2 * n2 + nb - n4 - n2, n4 + n2);

    let lim = tables::band_limits(dt, sr);
    for b in 0..nb {
        let g = (-scf[b]).exp2();
        for i in lim[b]..lim[b + 1] {
            y[i] = x[i] * g;
        }
    }
}
