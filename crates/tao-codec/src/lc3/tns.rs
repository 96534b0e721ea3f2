//! 时域噪声整形 (TNS).
//!
//! 沿频率方向做线性预测, 把量化噪声的时间包络整形到信号包络之下.
//! 每帧 1 或 2 个滤波器 (取决于带宽), 最高 8 阶, 以反射系数表示并按 π/17 步长量化.

use std::f32::consts::PI;

use tao_core::TaoResult;

use super::bits::{BitReader, BitWriter};
use super::{Bandwidth, FrameDuration, tables};

/// 最高阶数
pub const MAX_ORDER: usize = 8;

/// 反射系数量化步长
const QUANT_STEP: f32 = PI / 17.0;

/// 滤波器频率范围 [起点, 子块 1, 子块 2, 终点], 按 [帧时长][带宽] 索引
type FilterBands = &'static [[usize; 4]];

const BANDS_2M5: [FilterBands; 5] = [
    &[[3, 8, 14, 20]],
    &[[3, 15, 27, 40]],
    &[[3, 22, 41, 60]],
    &[[3, 15, 27, 40], [40, 53, 66, 80]],
    &[[3, 18, 34, 50], [50, 66, 83, 100]],
];

const BANDS_5M: [FilterBands; 5] = [
    &[[6, 17, 28, 40]],
    &[[6, 30, 55, 80]],
    &[[6, 44, 82, 120]],
    &[[6, 30, 55, 80], [80, 106, 133, 160]],
    &[[6, 37, 68, 100], [100, 133, 166, 200]],
];

const BANDS_7M5: [FilterBands; 5] = [
    &[[9, 26, 43, 60]],
    &[[9, 46, 83, 120]],
    &[[9, 66, 123, 180]],
    &[[9, 46, 82, 120], [120, 159, 200, 240]],
    &[[9, 56, 103, 150], [150, 200, 250, 300]],
];

const BANDS_10M: [FilterBands; 5] = [
    &[[12, 34, 57, 80]],
    &[[12, 61, 110, 160]],
    &[[12, 88, 164, 240]],
    &[[12, 61, 110, 160], [160, 213, 266, 320]],
    &[[12, 74, 137, 200], [200, 266, 333, 400]],
];

fn filter_bands(dt: FrameDuration, bw: Bandwidth) -> FilterBands {
    match dt {
        FrameDuration::Ms2p5 => BANDS_2M5[bw.index()],
        FrameDuration::Ms5 => BANDS_5M[bw.index()],
        FrameDuration::Ms7p5 => BANDS_7M5[bw.index()],
        FrameDuration::Ms10 => BANDS_10M[bw.index()],
    }
}

/// 调性判定: 最强的若干系数所占能量比例
const TONAL_PEAKS: usize = 4;
const TONAL_RATIO: f32 = 0.5;

/// 能量集中在少数谱峰上的频段不做 TNS
fn is_tonal(x: &[f32], band: &[usize; 4]) -> bool {
    let mut e: Vec<f32> = x[band[0]..band[3]].iter().map(|v| v * v).collect();
    let total: f32 = e.iter().sum();
    if total <= 0.0 {
        return false;
    }
    e.sort_unstable_by(|a, b| b.total_cmp(a));
    e.iter().take(TONAL_PEAKS).sum::<f32>() > TONAL_RATIO * total
}

/// 低码率时启用 LPC 加权
fn lpc_weighting(dt: FrameDuration, nbytes: usize) -> bool {
    nbytes * 8 < 120 * dt.quarters()
}

/// 帧内 TNS 参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TnsData {
    /// 滤波器个数 (1 或 2)
    pub nfilters: usize,
    pub lpc_weighting: bool,
    /// 各滤波器阶数, 0 表示关闭
    pub rc_order: [usize; 2],
    /// 量化后的反射系数索引 (0..=16, 8 表示 0)
    pub rc_index: [[u8; MAX_ORDER]; 2],
}

impl TnsData {
    /// 全部关闭的参数
    pub fn disabled(dt: FrameDuration, bw: Bandwidth, nbytes: usize) -> Self {
        Self {
            nfilters: filter_bands(dt, bw).len(),
            lpc_weighting: lpc_weighting(dt, nbytes),
            rc_order: [0; 2],
            rc_index: [[8; MAX_ORDER]; 2],
        }
    }

    /// 编码所需比特数 (向上取整)
    pub fn num_bits(&self) -> usize {
        let t = tables::tns();
        (0..self.nfilters)
            .map(|f| {
                let order = self.rc_order[f];
                let mut bits = 2048usize;
                if order > 0 {
                    bits += t.order_bits[self.lpc_weighting as usize][order - 1] as usize;
                    for k in 0..order {
                        bits += t.coef_bits[k][self.rc_index[f][k] as usize] as usize;
                    }
                }
                bits.div_ceil(2048)
            })
            .sum()
    }

    /// 写入码流: 激活标志为普通位, 阶数与系数为算术编码符号
    pub fn put(&self, bits: &mut BitWriter) {
        let t = tables::tns();
        for f in 0..self.nfilters {
            bits.put_bit(self.rc_order[f] > 0);
        }
        for f in 0..self.nfilters {
            let order = self.rc_order[f];
            if order == 0 {
                continue;
            }
            bits.put_symbol(&t.order_models[self.lpc_weighting as usize], order - 1);
            for k in 0..order {
                bits.put_symbol(&t.coef_models[k], self.rc_index[f][k] as usize);
            }
        }
    }

    /// 从码流读取
    pub fn get(
        bits: &mut BitReader<'_>,
        dt: FrameDuration,
        bw: Bandwidth,
        nbytes: usize,
    ) -> TaoResult<Self> {
        let t = tables::tns();
        let mut data = Self::disabled(dt, bw, nbytes);
        let mut active = [false; 2];
        for a in active.iter_mut().take(data.nfilters) {
            *a = bits.get_bit()?;
        }
        for f in 0..data.nfilters {
            if !active[f] {
                continue;
            }
            let order = bits.get_symbol(&t.order_models[data.lpc_weighting as usize])? + 1;
            data.rc_order[f] = order.min(MAX_ORDER);
            for k in 0..data.rc_order[f] {
                data.rc_index[f][k] = bits.get_symbol(&t.coef_models[k])? as u8;
            }
        }
        Ok(data)
    }

    /// 反量化后的反射系数
    fn rc(&self, f: usize) -> [f32; MAX_ORDER] {
        self.rc_index[f].map(|i| (QUANT_STEP * (i as f32 - 8.0)).sin())
    }
}

/// 子块归一化自相关, 任一子块能量为 0 时返回单位冲激
fn autocorrelation(x: &[f32], band: &[usize; 4]) -> [f32; MAX_ORDER + 1] {
    let mut r = [0.0f32; MAX_ORDER + 1];
    for (k, rk) in r.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        for s in 0..3 {
            let (lo, hi) = (band[s], band[s + 1]);
            let es: f32 = x[lo..hi].iter().map(|v| v * v).sum();
            if es == 0.0 {
                return std::array::from_fn(|k| if k == 0 { 3.0 } else { 0.0 });
            }
            let ac: f32 = (lo..hi.saturating_sub(k)).map(|n| x[n] * x[n + k]).sum();
            sum += ac / es;
        }
        *rk = sum;
    }
    r
}

/// Levinson-Durbin 递推, 返回 (预测系数, 预测误差)
fn levinson(r: &[f32; MAX_ORDER + 1]) -> ([f32; MAX_ORDER + 1], f32) {
    let mut a = [0.0f32; MAX_ORDER + 1];
    a[0] = 1.0;
    let mut e = r[0];
    for k in 1..=MAX_ORDER {
        let prev = a;
        let mut rc: f32 = -(0..k).map(|n| prev[n] * r[k - n]).sum::<f32>();
        if e == 0.0 {
            e = 1.0;
        }
        rc /= e;
        for n in 1..k {
            a[n] = prev[n] + rc * prev[k - n];
        }
        a[k] = rc;
        e *= 1.0 - rc * rc;
    }
    (a, e)
}

/// 预测系数转反射系数
fn lpc_to_reflection(a: &[f32; MAX_ORDER + 1]) -> [f32; MAX_ORDER] {
    let mut rc = [0.0f32; MAX_ORDER];
    let mut ak = *a;
    for k in (1..=MAX_ORDER).rev() {
        rc[k - 1] = ak[k];
        let e = 1.0 - rc[k - 1] * rc[k - 1];
        let prev = ak;
        for n in 1..k {
            ak[n] = (prev[n] - rc[k - 1] * prev[k - n]) / e;
        }
    }
    rc
}

/// 编码端分析并原位滤波频谱
pub fn analyze(
    dt: FrameDuration,
    bw: Bandwidth,
    nn_flag: bool,
    nbytes: usize,
    x: &mut [f32],
) -> TnsData {
    let bands = filter_bands(dt, bw);
    let mut data = TnsData::disabled(dt, bw, nbytes);

    let lag_window: [f32; MAX_ORDER + 1] =
        std::array::from_fn(|k| (-0.5 * (0.02 * PI * k as f32).powi(2)).exp());

    for (f, band) in bands.iter().enumerate() {
        let mut r = autocorrelation(x, band);
        for (rk, w) in r.iter_mut().zip(&lag_window) {
            *rk *= w;
        }

        let (mut a, e) = levinson(&r);
        let pred_gain = r[0] / e;
        if pred_gain <= 1.5 || nn_flag || is_tonal(x, band) {
            continue;
        }

        let gamma = if data.lpc_weighting && pred_gain < 2.0 {
            1.0 - 0.15 * (2.0 - pred_gain) / 0.5
        } else {
            1.0
        };
        let mut g = 1.0f32;
        for ak in a.iter_mut() {
            *ak *= g;
            g *= gamma;
        }

        let rc = lpc_to_reflection(&a);
        for k in 0..MAX_ORDER {
            let q = (rc[k].clamp(-1.0, 1.0).asin() / QUANT_STEP).round() as i32 + 8;
            data.rc_index[f][k] = q.clamp(0, 16) as u8;
        }
        data.rc_order[f] = data.rc_index[f]
            .iter()
            .rposition(|&i| i != 8)
            .map_or(0, |k| k + 1);
    }

    // 格型分析滤波, 状态在滤波器间共享
    let mut st = [0.0f32; MAX_ORDER];
    for (f, band) in bands.iter().enumerate() {
        let order = data.rc_order[f];
        if order == 0 {
            continue;
        }
        let rc = data.rc(f);
        for v in &mut x[band[0]..band[3]] {
            let mut t = *v;
            let mut st_save = t;
            for k in 0..order - 1 {
                let tmp = rc[k] * t + st[k];
                t += rc[k] * st[k];
                st[k] = st_save;
                st_save = tmp;
            }
            t += rc[order - 1] * st[order - 1];
            st[order - 1] = st_save;
            *v = t;
        }
    }

    data
}

/// 解码端原位反滤波
pub fn synthesize(dt: FrameDuration, bw: Bandwidth, data: &TnsData, x: &mut [f32]) {
    let bands = filter_bands(dt, bw);
    let mut s = [0.0f32; MAX_ORDER];
    for (f, band) in bands.iter().enumerate().take(data.nfilters) {
        let order = data.rc_order[f];
        if order == 0 {
            continue;
        }
        let rc = data.rc(f);
        for v in &mut x[band[0]..band[3]] {
            let mut t = *v - rc[order - 1] * s[order - 1];
            for k in (0..order - 1).rev() {
                t -= rc[k] * s[k];
                s[k + 1] = rc[k] * t + s[k];
            }
            *v = t;
            s[0] = t;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lc3::num_coeffs;
    use crate::lc3::SampleRate;

    /// 时域短脉冲对应的频谱: 频率方向上的慢变余弦
    fn transient_spectrum(ne: usize) -> Vec<f32> {
        (0..ne)
            .map(|n| 2000.0 * (0.3 * n as f32).cos() + 500.0 * (0.71 * n as f32).sin())
            .collect()
    }

    fn noise_spectrum(ne: usize) -> Vec<f32> {
        let mut seed = 12345u32;
        (0..ne)
            .map(|_| {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                ((seed >> 16) & 0x7fff) as f32 - 16384.0
            })
            .collect()
    }

    #[test]
    fn test_分析与合成互逆() {
        for (dt, sr, bw) in [
            (FrameDuration::Ms10, SampleRate::Hz48000, Bandwidth::Fb),
            (FrameDuration::Ms7p5, SampleRate::Hz32000, Bandwidth::Swb),
            (FrameDuration::Ms10, SampleRate::Hz16000, Bandwidth::Wb),
            (FrameDuration::Ms5, SampleRate::Hz32000, Bandwidth::Swb),
            (FrameDuration::Ms2p5, SampleRate::Hz48000, Bandwidth::Fb),
        ] {
            let ne = num_coeffs(dt, sr);
            let x = transient_spectrum(ne);
            let mut y = x.clone();
            let data = analyze(dt, bw, false, 40, &mut y);
            assert!(data.rc_order[0] > 0, "{:?} {:?}", dt, bw);
            // 40 字节仅在 7.5/10 ms 下低于加权门限
            assert_eq!(data.lpc_weighting, dt >= FrameDuration::Ms7p5);
            assert_ne!(x, y);

            synthesize(dt, bw, &data, &mut y);
            for n in 0..ne {
                assert!((x[n] - y[n]).abs() < 1.0, "n={} {} != {}", n, x[n], y[n]);
            }
        }
    }

    #[test]
    fn test_近奈奎斯特关闭() {
        let (dt, sr, bw) = (FrameDuration::Ms10, SampleRate::Hz48000, Bandwidth::Fb);
        let x = transient_spectrum(num_coeffs(dt, sr));
        let mut y = x.clone();
        let data = analyze(dt, bw, true, 100, &mut y);
        assert_eq!(data.rc_order, [0, 0]);
        assert_eq!(data.num_bits(), 2);
        assert_eq!(x, y);
    }

    #[test]
    fn test_白噪声不启用() {
        let (dt, sr, bw) = (FrameDuration::Ms10, SampleRate::Hz16000, Bandwidth::Wb);
        let mut x = noise_spectrum(num_coeffs(dt, sr));
        let data = analyze(dt, bw, false, 100, &mut x);
        assert_eq!(data.rc_order[0], 0);
        assert!(!data.lpc_weighting);
    }

    #[test]
    fn test_纯音频谱不启用() {
        // 单个正弦的 MDCT 谱: 主瓣加交替符号的旁瓣
        let (dt, sr, bw) = (FrameDuration::Ms10, SampleRate::Hz16000, Bandwidth::Wb);
        let ne = num_coeffs(dt, sr);
        let mut x: Vec<f32> = (0..ne)
            .map(|n| if n % 2 == 0 { 12.0 } else { -12.0 })
            .collect();
        for (k, v) in [(17, 300.0), (18, -900.0), (19, 3000.0), (20, 8000.0), (21, -3100.0), (22, 850.0), (23, -280.0)] {
            x[k] = v;
        }
        let orig = x.clone();
        let data = analyze(dt, bw, false, 40, &mut x);
        assert_eq!(data.rc_order, [0, 0]);
        assert_eq!(x, orig);

        let spread = transient_spectrum(ne);
        assert!(!is_tonal(&spread, &filter_bands(dt, bw)[0]));
        assert!(is_tonal(&orig, &filter_bands(dt, bw)[0]));
    }

    #[test]
    fn test_短帧滤波区间() {
        for dt in [FrameDuration::Ms2p5, FrameDuration::Ms5] {
            for sr in SampleRate::ALL {
                let bw = Bandwidth::max_for(sr);
                let bands = filter_bands(dt, bw);
                assert_eq!(bands.last().unwrap()[3], num_coeffs(dt, sr), "{:?} {:?}", dt, sr);
                for b in bands {
                    assert!(b.windows(2).all(|w| w[0] < w[1]));
                }
            }
        }
        assert!(lpc_weighting(FrameDuration::Ms5, 29));
        assert!(!lpc_weighting(FrameDuration::Ms5, 30));
        assert!(!lpc_weighting(FrameDuration::Ms2p5, 20));
    }

    #[test]
    fn test_码流读写() {
        let (dt, sr, bw) = (FrameDuration::Ms10, SampleRate::Hz48000, Bandwidth::Fb);
        let mut x = transient_spectrum(num_coeffs(dt, sr));
        let data = analyze(dt, bw, false, 50, &mut x);

        let mut w = BitWriter::new(50);
        data.put(&mut w);
        assert!(w.ac_bits() + w.plain_bits() <= data.num_bits() + 25);
        let frame = w.finish().unwrap();

        let mut r = BitReader::new(&frame);
        let got = TnsData::get(&mut r, dt, bw, 50).unwrap();
        assert_eq!(got, data);
    }
}
