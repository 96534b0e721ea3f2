//! LC3 帧码流读写.
//!
//! 一帧由两路数据共享固定字节数:
//! - 算术编码数据: 从帧首向后增长
//! - 普通位: 从帧尾向前增长, 每字节内从最低位开始
//!
//! 两路分别缓存, 刷新时合并. 写入与读取两侧按相同公式估算算术编码已占位数,
//! 估算值加普通位数超过帧容量即视为冲突.

use tao_core::{TaoError, TaoResult};

/// 算术编码概率模型 (累积频数表)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcModel {
    /// 各符号累积频数起点
    pub cum: [u16; 17],
    /// 各符号频数, 零频符号只能位于末尾
    pub freq: [u16; 17],
}

impl AcModel {
    /// 总频数
    pub const TOTAL: u32 = 1024;

    /// 由频数表构造
    pub fn from_freqs(freq: &[u16; 17]) -> Self {
        let mut cum = [0u16; 17];
        let mut acc = 0u16;
        for s in 0..17 {
            cum[s] = acc;
            acc += freq[s];
        }
        Self { cum, freq: *freq }
    }
}

const LOW_MASK: u32 = 0x00ff_ffff;

/// 算术编码已占位数的估算, 写入与读取两侧一致
#[inline]
fn ac_bits(bytes: usize, range: u32) -> usize {
    let log2 = 31 - range.leading_zeros() as usize;
    bytes * 8 + 25 - log2
}

/// 帧码流写入器
pub struct BitWriter {
    capacity: usize,
    /// 算术编码输出
    ac: Vec<u8>,
    low: u32,
    range: u32,
    cache: Option<u8>,
    carry: bool,
    carry_count: usize,
    /// 普通位, 第 0 字节对应帧的最后一个字节
    plain: Vec<u8>,
    plain_bits: usize,
}

impl BitWriter {
    /// 创建写入器, `capacity` 为帧字节数
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ac: Vec::with_capacity(capacity),
            low: 0,
            range: LOW_MASK,
            cache: None,
            carry: false,
            carry_count: 0,
            plain: Vec::with_capacity(capacity),
            plain_bits: 0,
        }
    }

    /// 以给定的编码区间起点与宽度创建写入器, 前面补一个待输出的零字节承接进位
    #[cfg(test)]
    fn with_state(capacity: usize, low: u32, range: u32) -> Self {
        let mut bw = Self::new(capacity);
        bw.low = low & LOW_MASK;
        bw.range = range;
        bw.cache = Some(0);
        bw
    }

    /// 帧字节数
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 写入 `n` 位普通值, 最低位先写
    pub fn put_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32);
        for i in 0..n {
            self.put_bit((value >> i) & 1 != 0);
        }
    }

    /// 写入 1 位普通值
    pub fn put_bit(&mut self, bit: bool) {
        let byte = self.plain_bits / 8;
        if byte == self.plain.len() {
            self.plain.push(0);
        }
        if bit {
            self.plain[byte] |= 1 << (self.plain_bits % 8);
        }
        self.plain_bits += 1;
    }

    /// 写入一个算术编码符号
    pub fn put_symbol(&mut self, model: &AcModel, s: usize) {
        let r = self.range >> 10;
        self.low += r * model.cum[s] as u32;
        if self.low >> 24 != 0 {
            self.carry = true;
        }
        self.low &= LOW_MASK;
        self.range = r * model.freq[s] as u32;
        while self.range < 0x10000 {
            self.range <<= 8;
            self.shift();
        }
    }

    fn shift(&mut self) {
        if self.low < 0x00ff_0000 || self.carry {
            let carry = self.carry as u8;
            if let Some(c) = self.cache {
                self.ac.push(c.wrapping_add(carry));
            }
            while self.carry_count > 0 {
                self.ac.push(carry.wrapping_add(0xff));
                self.carry_count -= 1;
            }
            self.cache = Some((self.low >> 16) as u8);
            self.carry = false;
        } else {
            self.carry_count += 1;
        }
        self.low = (self.low << 8) & LOW_MASK;
    }

    /// 算术编码已占用 (含收尾) 的位数估算
    pub fn ac_bits(&self) -> usize {
        let pending = self.ac.len() + self.cache.is_some() as usize + self.carry_count;
        ac_bits(pending, self.range)
    }

    /// 已写入的普通位数
    pub fn plain_bits(&self) -> usize {
        self.plain_bits
    }

    /// 剩余可用位数
    pub fn bits_left(&self) -> usize {
        (self.capacity * 8).saturating_sub(self.plain_bits + self.ac_bits())
    }

    /// 两路数据是否冲突
    pub fn overflowed(&self) -> bool {
        self.plain_bits + self.ac_bits() > self.capacity * 8
    }

    /// 结束算术编码并合并两路数据, 输出恰好 `capacity` 字节
    pub fn finish(mut self) -> TaoResult<Vec<u8>> {
        if self.overflowed() {
            return Err(TaoError::Codec(format!(
                "LC3: 帧数据超出 {} 字节容量 (算术 {} 位, 普通 {} 位)",
                self.capacity,
                self.ac_bits(),
                self.plain_bits
            )));
        }

        let mut bits: i32 = 1;
        while self.range >> (24 - bits) == 0 {
            bits += 1;
        }
        let mut mask = LOW_MASK >> bits;
        let mut val = self.low + mask;
        let over1 = val >> 24;
        val &= LOW_MASK;
        let high = self.low + self.range;
        let over2 = high >> 24;
        let high = high & LOW_MASK;
        val &= !mask & LOW_MASK;

        if over1 == over2 {
            if val + mask >= high {
                bits += 1;
                mask >>= 1;
                val = ((self.low + mask) & LOW_MASK) & !mask;
            }
            if val < self.low {
                self.carry = true;
            }
        }
        self.low = val;

        while bits > 0 {
            self.shift();
            bits -= 8;
        }
        bits += 8;
        let top = !(0xffu32 >> bits) as u8;
        if self.carry_count > 0 {
            if let Some(c) = self.cache {
                self.ac.push(c);
            }
            for _ in 1..self.carry_count {
                self.ac.push(0xff);
            }
            self.ac.push(0xff & top);
        } else if let Some(c) = self.cache {
            self.ac.push(c & top);
        }

        let mut out = vec![0u8; self.capacity];
        let n = self.ac.len().min(self.capacity);
        out[..n].copy_from_slice(&self.ac[..n]);
        for (i, &b) in self.plain.iter().enumerate() {
            out[self.capacity - 1 - i] |= b;
        }
        Ok(out)
    }
}

/// 帧码流读取器
pub struct BitReader<'a> {
    data: &'a [u8],
    /// 算术解码已消耗字节数
    pos: usize,
    low: u32,
    range: u32,
    plain_bits: usize,
}

impl<'a> BitReader<'a> {
    /// 创建读取器, 预读 3 字节初始化算术解码器
    pub fn new(data: &'a [u8]) -> Self {
        let mut br = Self {
            data,
            pos: 0,
            low: 0,
            range: LOW_MASK,
            plain_bits: 0,
        };
        for _ in 0..3 {
            br.low = (br.low << 8) | br.next_byte() as u32;
        }
        br
    }

    /// 与 [`BitWriter::with_state`] 对应的读取器, 首字节为承接进位的字节
    #[cfg(test)]
    fn with_state(data: &'a [u8], low: u32, range: u32) -> Self {
        let mut br = Self {
            data,
            pos: 0,
            low: 0,
            range,
            plain_bits: 0,
        };
        let mut v = 0u32;
        for _ in 0..4 {
            v = (v << 8) | br.next_byte() as u32;
        }
        br.low = v - low;
        br
    }

    /// 帧字节数
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn next_byte(&mut self) -> u8 {
        let b = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        b
    }

    /// 读取 1 位普通值
    pub fn get_bit(&mut self) -> TaoResult<bool> {
        let byte = self.plain_bits / 8;
        if byte >= self.data.len() {
            return Err(TaoError::InvalidData("LC3: 普通位读取越界".into()));
        }
        let bit = (self.data[self.data.len() - 1 - byte] >> (self.plain_bits % 8)) & 1;
        self.plain_bits += 1;
        Ok(bit != 0)
    }

    /// 读取 `n` 位普通值, 最低位先读
    pub fn get_bits(&mut self, n: u32) -> TaoResult<u32> {
        let mut v = 0u32;
        for i in 0..n {
            if self.get_bit()? {
                v |= 1 << i;
            }
        }
        Ok(v)
    }

    /// 解码一个算术编码符号
    pub fn get_symbol(&mut self, model: &AcModel) -> TaoResult<usize> {
        let r = self.range >> 10;
        if self.low >= r << 10 {
            return Err(TaoError::InvalidData("LC3: 算术解码区间越界".into()));
        }
        // 累积频数单调, 零频符号位于末尾且起点等于总频数, 不会被选中
        let mut s = 0;
        for step in [16, 8, 4, 2, 1] {
            let t = s + step;
            if t <= 16 && r * model.cum[t] as u32 <= self.low {
                s = t;
            }
        }
        self.low -= r * model.cum[s] as u32;
        self.range = r * model.freq[s] as u32;
        while self.range < 0x10000 {
            self.range <<= 8;
            self.low = ((self.low << 8) & LOW_MASK) | self.next_byte() as u32;
        }
        Ok(s)
    }

    /// 算术编码已占用的位数估算
    pub fn ac_bits(&self) -> usize {
        ac_bits(self.pos - 3, self.range)
    }

    /// 已读取的普通位数
    pub fn plain_bits(&self) -> usize {
        self.plain_bits
    }

    /// 剩余可用位数
    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.plain_bits + self.ac_bits())
    }

    /// 检查两路数据是否冲突
    pub fn check(&self) -> TaoResult<()> {
        if self.plain_bits + self.ac_bits() > self.data.len() * 8 {
            return Err(TaoError::InvalidData(format!(
                "LC3: 码流冲突 (算术 {} 位, 普通 {} 位, 容量 {} 字节)",
                self.ac_bits(),
                self.plain_bits,
                self.data.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lc3::tables;

    fn uniform_model(n: usize) -> AcModel {
        let mut freq = [0u16; 17];
        for f in freq.iter_mut().take(n) {
            *f = (AcModel::TOTAL as usize / n) as u16;
        }
        freq[0] += (AcModel::TOTAL as usize % n) as u16;
        AcModel::from_freqs(&freq)
    }

    #[test]
    fn test_普通位从帧尾写入() {
        let mut bw = BitWriter::new(4);
        bw.put_bits(0b101, 3);
        bw.put_bits(0x1ff, 9);
        let out = bw.finish().unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[3], 0b1111_1101);
        assert_eq!(out[2] & 0x0f, 0x0f);

        let mut br = BitReader::new(&out);
        assert_eq!(br.get_bits(3).unwrap(), 0b101);
        assert_eq!(br.get_bits(9).unwrap(), 0x1ff);
        assert!(br.check().is_ok());
    }

    #[test]
    fn test_算术符号与普通位交错() {
        let spec = tables::spectrum();
        let symbols: Vec<(usize, usize)> = (0..60).map(|i| ((i * 7) % 16, (i * 5 + 3) % 17)).collect();

        let mut bw = BitWriter::new(200);
        for (i, &(m, s)) in symbols.iter().enumerate() {
            bw.put_symbol(&spec.models[m], s);
            bw.put_bits(i as u32 & 3, 2);
        }
        let left_w = bw.bits_left();
        let out = bw.finish().unwrap();

        let mut br = BitReader::new(&out);
        for (i, &(m, s)) in symbols.iter().enumerate() {
            assert_eq!(br.get_symbol(&spec.models[m]).unwrap(), s, "符号 {}", i);
            assert_eq!(br.get_bits(2).unwrap(), i as u32 & 3);
        }
        assert_eq!(br.bits_left(), left_w);
        assert!(br.check().is_ok());
    }

    #[test]
    fn test_进位传播() {
        // 高概率符号反复编码会使 low 接近上界, 覆盖进位与挂起字节
        let mut freq = [0u16; 17];
        freq[0] = 1;
        freq[1] = 1022;
        freq[2] = 1;
        let model = AcModel::from_freqs(&freq);
        let symbols: Vec<usize> = (0..400).map(|i| if i % 97 == 0 { 2 } else { 1 }).collect();

        let mut bw = BitWriter::new(40);
        for &s in &symbols {
            bw.put_symbol(&model, s);
        }
        let out = bw.finish().unwrap();
        let mut br = BitReader::new(&out);
        for &s in &symbols {
            assert_eq!(br.get_symbol(&model).unwrap(), s);
        }
    }

    /// 所有算术编码模型
    fn all_models() -> Vec<AcModel> {
        let spec = tables::spectrum();
        let tns = tables::tns();
        spec.models
            .iter()
            .chain(&tns.order_models)
            .chain(&tns.coef_models)
            .copied()
            .collect()
    }

    #[test]
    fn test_各模型各符号在进位状态下往返() {
        // 区间起点接近 24 位上界时, 任一符号都可能把进位推入已缓存的字节
        let states = [
            (0x00_0000, 0xff_ffff),
            (0xff_0000, 0x01_0000),
            (0xff_fff0, 0x02_0000),
            (0xff_ffff, 0xff_ffff),
            (0xfe_ffff, 0x01_0001),
            (0x80_0000, 0x80_0000),
            (0xff_8000, 0x7f_ffff),
        ];
        for (m, model) in all_models().iter().enumerate() {
            let top = (0..17).max_by_key(|&s| model.freq[s]).unwrap_or(0);
            for s in (0..17).filter(|&s| model.freq[s] > 0) {
                for &(low, range) in &states {
                    let symbols = [s, top, top, s, top];
                    let mut bw = BitWriter::with_state(32, low, range);
                    for &v in &symbols {
                        bw.put_symbol(model, v);
                    }
                    let out = bw.finish().unwrap();
                    assert!(out[0] <= 1, "模型 {} 符号 {}", m, s);

                    let mut br = BitReader::with_state(&out, low, range);
                    for &v in &symbols {
                        assert_eq!(
                            br.get_symbol(model).unwrap(),
                            v,
                            "模型 {} 符号 {} 状态 {:06x}/{:06x}",
                            m,
                            s,
                            low,
                            range
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_二分查找与累积区间一致() {
        for model in all_models() {
            let r = 0xff_ffffu32 >> 10;
            for s in (0..17).filter(|&s| model.freq[s] > 0) {
                // 区间两端都应解出同一符号
                let lo = r * model.cum[s] as u32;
                let hi = lo + r * model.freq[s] as u32 - 1;
                for low in [lo, hi] {
                    let mut br = BitReader::new(&[]);
                    br.low = low;
                    assert_eq!(br.get_symbol(&model).unwrap(), s);
                }
            }
        }
    }

    #[test]
    fn test_容量边界() {
        // 无算术符号时估算占用 2 位, 2 字节帧最多容纳 14 个普通位
        let mut bw = BitWriter::new(2);
        bw.put_bits(0x3fff, 14);
        assert_eq!(bw.bits_left(), 0);
        assert!(bw.finish().is_ok());

        let mut bw = BitWriter::new(2);
        bw.put_bits(0x7fff, 15);
        assert!(bw.overflowed());
        assert!(bw.finish().is_err());

        let data = [0u8; 2];
        let mut br = BitReader::new(&data);
        br.get_bits(14).unwrap();
        assert!(br.check().is_ok());
        br.get_bit().unwrap();
        assert!(br.check().is_err());
    }

    #[test]
    fn test_普通位读取越界() {
        let data = [0u8; 1];
        let mut br = BitReader::new(&data);
        assert!(br.get_bits(8).is_ok());
        assert!(br.get_bit().is_err());
    }

    #[test]
    fn test_均匀模型() {
        let model = uniform_model(8);
        let mut bw = BitWriter::new(20);
        for s in 0..8 {
            bw.put_symbol(&model, s);
        }
        // 每个符号 3 位
        assert!(bw.ac_bits() >= 24 && bw.ac_bits() <= 24 + 10);
        let out = bw.finish().unwrap();
        let mut br = BitReader::new(&out);
        for s in 0..8 {
            assert_eq!(br.get_symbol(&model).unwrap(), s);
        }
    }
}
