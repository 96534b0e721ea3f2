//! 带宽检测.
//!
//! 第一阶段从低到高检查各候选带宽上方区域的平均能量, 得到最高的有能量带宽;
//! 第二阶段确认该处存在陡峭的能量下降, 否则按采样率对应的最大带宽处理.

use super::{Bandwidth, FrameDuration, SampleRate, num_samples, tables};

type Region = (usize, usize);

/// 检测区域 [最大带宽 - 1], 闭区间频带索引; 短帧沿用 10 ms 的区域并按频率映射
const REGIONS_7M5: [&[Region]; 4] = [
    &[(51, 63)],
    &[(45, 55), (58, 63)],
    &[(42, 51), (53, 58), (60, 63)],
    &[(40, 48), (51, 55), (57, 60), (61, 63)],
];

const REGIONS_10M: [&[Region]; 4] = [
    &[(53, 63)],
    &[(47, 56), (59, 63)],
    &[(44, 52), (54, 59), (60, 63)],
    &[(41, 49), (51, 55), (57, 60), (61, 63)],
];

/// 能量下降检测的频带间距 [帧时长][带宽]
const DROP_DISTANCE: [[usize; 4]; 4] = [[2, 2, 2, 1], [3, 3, 2, 1], [4, 4, 3, 2], [4, 4, 3, 1]];

/// 能量下降阈值
const DROP_THRESHOLD: [f32; 4] = [15.0, 23.0, 20.0, 20.0];

/// 把 10 ms 帧的频带索引映射为本帧时长下包含同一频率的频带
fn map_band(dt: FrameDuration, sr: SampleRate, b: usize) -> usize {
    if dt >= FrameDuration::Ms7p5 {
        return b;
    }
    let bin = tables::band_limits(FrameDuration::Ms10, sr)[b] * num_samples(dt, sr)
        / num_samples(FrameDuration::Ms10, sr);
    let lim = tables::band_limits(dt, sr);
    lim.partition_point(|&l| l <= bin).saturating_sub(1)
}

/// 由频带能量检测有效带宽
pub fn detect(dt: FrameDuration, sr: SampleRate, e: &[f32]) -> Bandwidth {
    let bwmax = Bandwidth::max_for(sr).index();
    if bwmax == 0 {
        return Bandwidth::Nb;
    }

    let regions = match dt {
        FrameDuration::Ms7p5 => REGIONS_7M5[bwmax - 1],
        _ => REGIONS_10M[bwmax - 1],
    };
    let band = |b: usize| map_band(dt, sr, b);

    let mut bw0 = 0;
    for (bw, &(is, ie)) in regions.iter().enumerate() {
        let (is, ie) = (band(is), band(ie));
        let n = (ie - is + 1) as f32;
        let sum: f32 = e[is..=ie].iter().sum();
        let thr = if bw == 0 { 20.0 } else { 10.0 };
        if sum >= thr * n {
            bw0 = bw + 1;
        }
    }

    let mut bw = bwmax;
    if bw0 < bwmax {
        let i0 = band(regions[bw0].0);
        let l = DROP_DISTANCE[dt.index()][bw0];
        let tc = DROP_THRESHOLD[bw0];
        if (i0 + 1 - l..=i0).any(|i| e[i - l] > tc * e[i]) {
            bw = bw0;
        }
    }

    Bandwidth::from_index(bw).unwrap_or(Bandwidth::Fb)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造在 `cutoff_hz` 以上能量骤降的频带能量
    fn band_energy(dt: FrameDuration, sr: SampleRate, cutoff_hz: f32) -> Vec<f32> {
        let lim = tables::band_limits(dt, sr);
        let ns = crate::lc3::num_samples(dt, sr) as f32;
        let hz_per_bin = sr.hz() as f32 / 2.0 / ns;
        (0..lim.len() - 1)
            .map(|b| {
                if lim[b] as f32 * hz_per_bin < cutoff_hz {
                    1.0e4
                } else {
                    1.0e-3
                }
            })
            .collect()
    }

    #[test]
    fn test_全带信号() {
        let e = vec![1.0e4f32; 64];
        assert_eq!(
            detect(FrameDuration::Ms10, SampleRate::Hz48000, &e),
            Bandwidth::Fb
        );
        assert_eq!(
            detect(FrameDuration::Ms10, SampleRate::Hz8000, &e),
            Bandwidth::Nb
        );
    }

    #[test]
    fn test_宽带截止() {
        let (dt, sr) = (FrameDuration::Ms10, SampleRate::Hz48000);
        let e = band_energy(dt, sr, 8000.0);
        assert_eq!(detect(dt, sr, &e), Bandwidth::Wb);

        let (dt, sr) = (FrameDuration::Ms7p5, SampleRate::Hz32000);
        let e = band_energy(dt, sr, 3500.0);
        assert_eq!(detect(dt, sr, &e), Bandwidth::Nb);
    }

    #[test]
    fn test_短帧带宽检测() {
        // 2.5 ms / 16 kHz 只有 40 个频带
        let (dt, sr) = (FrameDuration::Ms2p5, SampleRate::Hz16000);
        let mut e = band_energy(dt, sr, 4000.0);
        e.resize(64, 0.0);
        assert_eq!(detect(dt, sr, &e), Bandwidth::Nb);
        let e = vec![1.0e4f32; 64];
        assert_eq!(detect(dt, sr, &e), Bandwidth::Wb);

        let (dt, sr) = (FrameDuration::Ms5, SampleRate::Hz48000);
        let e = band_energy(dt, sr, 8000.0);
        assert_eq!(detect(dt, sr, &e), Bandwidth::Wb);
    }

    #[test]
    fn test_平缓衰减保持最大带宽() {
        // 高频能量低但无陡降
        let e: Vec<f32> = (0..64).map(|b| 1.0e4 * 0.8f32.powi(b)).collect();
        assert_eq!(
            detect(FrameDuration::Ms10, SampleRate::Hz16000, &e),
            Bandwidth::Wb
        );
    }
}
