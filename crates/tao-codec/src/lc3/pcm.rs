//! PCM 采样的载入与输出.
//!
//! 内部统一使用以 16 位满幅为基准的 f32 采样. 交错缓冲区通过 `stride` 跳过其他声道.

use tao_core::{TaoError, TaoResult};

/// PCM 采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PcmFormat {
    /// 有符号 16 位, 小端
    S16,
    /// 有符号 24 位, 存放于 32 位小端容器的低 24 位
    S24,
    /// 有符号 24 位, 紧凑 3 字节小端
    S24Packed,
    /// 32 位浮点, 满幅 [-1, 1]
    F32,
}

impl PcmFormat {
    /// 每个采样点占用的字节数
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::S24Packed => 3,
            Self::S24 | Self::F32 => 4,
        }
    }
}

fn check_len(fmt: PcmFormat, len: usize, ch: usize, stride: usize, n: usize) -> TaoResult<()> {
    if stride == 0 || ch >= stride {
        return Err(TaoError::InvalidArgument(format!(
            "PCM: 无效声道偏移 {} / 步长 {}",
            ch, stride
        )));
    }
    let need = if n == 0 {
        0
    } else {
        ((n - 1) * stride + ch + 1) * fmt.bytes_per_sample()
    };
    if len < need {
        return Err(TaoError::InvalidArgument(format!(
            "PCM: 缓冲区过短, 需要 {} 字节, 实际 {} 字节",
            need, len
        )));
    }
    Ok(())
}

/// 从交错 PCM 缓冲区载入一个声道
///
/// `ch` 为声道偏移, `stride` 为每个采样帧的声道数, 结果写入 `out`.
pub fn load(fmt: PcmFormat, data: &[u8], ch: usize, stride: usize, out: &mut [f32]) -> TaoResult<()> {
    check_len(fmt, data.len(), ch, stride, out.len())?;
    let bps = fmt.bytes_per_sample();
    for (i, x) in out.iter_mut().enumerate() {
        let off = (i * stride + ch) * bps;
        let b = &data[off..off + bps];
        *x = match fmt {
            PcmFormat::S16 => i16::from_le_bytes([b[0], b[1]]) as f32,
            PcmFormat::S24 => {
                // 低 24 位有效, 先左移对齐符号位
                let v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]) << 8 >> 8;
                v as f32 / 256.0
            }
            PcmFormat::S24Packed => {
                let v = i32::from_le_bytes([0, b[0], b[1], b[2]]);
                v as f32 / 65536.0
            }
            PcmFormat::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) * 32768.0,
        };
    }
    Ok(())
}

/// 将一个声道写回交错 PCM 缓冲区
///
/// 整数格式四舍五入 (远离零) 并饱和, 浮点格式限定在 [-1, 1].
pub fn store(fmt: PcmFormat, x: &[f32], data: &mut [u8], ch: usize, stride: usize) -> TaoResult<()> {
    check_len(fmt, data.len(), ch, stride, x.len())?;
    let bps = fmt.bytes_per_sample();
    for (i, &v) in x.iter().enumerate() {
        let off = (i * stride + ch) * bps;
        let dst = &mut data[off..off + bps];
        match fmt {
            PcmFormat::S16 => {
                let s = v.round().clamp(-32768.0, 32767.0) as i16;
                dst.copy_from_slice(&s.to_le_bytes());
            }
            PcmFormat::S24 => {
                let s = (v * 256.0).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
                dst.copy_from_slice(&s.to_le_bytes());
            }
            PcmFormat::S24Packed => {
                let s = (v * 256.0).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
                dst.copy_from_slice(&s.to_le_bytes()[..3]);
            }
            PcmFormat::F32 => {
                let s = (v / 32768.0).clamp(-1.0, 1.0);
                dst.copy_from_slice(&s.to_le_bytes());
            }
        }
    }
    Ok(())
}

/// 载入 i16 交错采样
pub fn load_s16(data: &[i16], ch: usize, stride: usize, out: &mut [f32]) -> TaoResult<()> {
    check_len(PcmFormat::S16, data.len() * 2, ch, stride, out.len())?;
    for (i, x) in out.iter_mut().enumerate() {
        *x = data[i * stride + ch] as f32;
    }
    Ok(())
}

/// 写回 i16 交错采样
pub fn store_s16(x: &[f32], data: &mut [i16], ch: usize, stride: usize) -> TaoResult<()> {
    check_len(PcmFormat::S16, data.len() * 2, ch, stride, x.len())?;
    for (i, &v) in x.iter().enumerate() {
        data[i * stride + ch] = v.round().clamp(-32768.0, 32767.0) as i16;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16_交错载入与写回() {
        let pcm: Vec<u8> = [1000i16, -2000, 3000, -4000]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut right = [0.0f32; 2];
        load(PcmFormat::S16, &pcm, 1, 2, &mut right).unwrap();
        assert_eq!(right, [-2000.0, -4000.0]);

        let mut out = vec![0u8; 8];
        store(PcmFormat::S16, &[1.5, -2.5], &mut out, 0, 2).unwrap();
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 2);
        assert_eq!(i16::from_le_bytes([out[4], out[5]]), -3);
    }

    #[test]
    fn test_s16_饱和() {
        let mut out = [0i16; 2];
        store_s16(&[40000.0, -40000.0], &mut out, 0, 1).unwrap();
        assert_eq!(out, [32767, -32768]);
    }

    #[test]
    fn test_s24_格式() {
        let v: i32 = -0x123456;
        let mut x = [0.0f32; 1];
        load(PcmFormat::S24, &v.to_le_bytes(), 0, 1, &mut x).unwrap();
        assert!((x[0] - v as f32 / 256.0).abs() < 1e-3);

        let packed = &v.to_le_bytes()[..3];
        load(PcmFormat::S24Packed, packed, 0, 1, &mut x).unwrap();
        assert!((x[0] - v as f32 / 256.0).abs() < 1e-3);

        let mut out = [0u8; 3];
        store(PcmFormat::S24Packed, &x, &mut out, 0, 1).unwrap();
        assert_eq!(out, packed);
    }

    #[test]
    fn test_f32_限幅() {
        let mut out = [0u8; 8];
        store(PcmFormat::F32, &[65536.0, -16384.0], &mut out, 0, 1).unwrap();
        assert_eq!(f32::from_le_bytes([out[0], out[1], out[2], out[3]]), 1.0);
        assert_eq!(f32::from_le_bytes([out[4], out[5], out[6], out[7]]), -0.5);
    }

    #[test]
    fn test_缓冲区过短() {
        let mut x = [0.0f32; 4];
        assert!(load(PcmFormat::S16, &[0u8; 6], 0, 1, &mut x).is_err());
        assert!(load(PcmFormat::S16, &[0u8; 16], 2, 2, &mut x).is_err());
    }
}
