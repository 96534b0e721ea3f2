//! LC3 码流文件 (.lc3) 读写.
//!
//! 文件头 18 字节, 全部为 u16 小端:
//!
//! | 字段 | 说明 |
//! |------|------|
//! | file_id | 固定 0x1CCC |
//! | header_size | 文件头字节数 |
//! | srate_100hz | 采样率 / 100 |
//! | bitrate_100bps | 总码率 / 100 |
//! | channels | 声道数 |
//! | frame_10us | 帧时长 / 10 us |
//! | rfu | 保留 |
//! | nsamples_low / nsamples_high | 每声道采样总数 |
//!
//! 之后每帧为 u16 小端长度 (所有声道合计字节数) 加帧数据.

use std::io::{self, Read, Write};

use anyhow::{Context, Result, bail, ensure};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// 文件标识
pub const FILE_ID: u16 = 0x1CCC;
/// 文件头长度
pub const HEADER_SIZE: u16 = 18;

/// 码流文件头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lc3BinHeader {
    pub sample_rate: u32,
    pub bitrate: u32,
    pub channels: u16,
    pub duration_us: u32,
    pub nsamples: u32,
}

impl Lc3BinHeader {
    /// 写出文件头
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u16::<LittleEndian>(FILE_ID)?;
        w.write_u16::<LittleEndian>(HEADER_SIZE)?;
        w.write_u16::<LittleEndian>(to_u16(self.sample_rate / 100, "采样率")?)?;
        w.write_u16::<LittleEndian>(to_u16(self.bitrate / 100, "码率")?)?;
        w.write_u16::<LittleEndian>(self.channels)?;
        w.write_u16::<LittleEndian>(to_u16(self.duration_us / 10, "帧时长")?)?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>((self.nsamples & 0xffff) as u16)?;
        w.write_u16::<LittleEndian>((self.nsamples >> 16) as u16)?;
        Ok(())
    }

    /// 读取并校验文件头, 跳过超出已知字段的部分
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let file_id = r.read_u16::<LittleEndian>().context("读取文件头失败")?;
        ensure!(file_id == FILE_ID, "不是 LC3 码流文件, 标识 0x{:04X}", file_id);
        let header_size = r.read_u16::<LittleEndian>()?;
        ensure!(header_size >= HEADER_SIZE, "文件头长度 {} 过短", header_size);

        let sample_rate = r.read_u16::<LittleEndian>()? as u32 * 100;
        let bitrate = r.read_u16::<LittleEndian>()? as u32 * 100;
        let channels = r.read_u16::<LittleEndian>()?;
        let duration_us = r.read_u16::<LittleEndian>()? as u32 * 10;
        let _rfu = r.read_u16::<LittleEndian>()?;
        let low = r.read_u16::<LittleEndian>()? as u32;
        let high = r.read_u16::<LittleEndian>()? as u32;

        let extra = (header_size - HEADER_SIZE) as u64;
        if extra > 0 {
            io::copy(&mut r.by_ref().take(extra), &mut io::sink())?;
        }
        ensure!(channels > 0, "声道数为 0");

        Ok(Self {
            sample_rate,
            bitrate,
            channels,
            duration_us,
            nsamples: low | (high << 16),
        })
    }
}

fn to_u16(v: u32, what: &str) -> Result<u16> {
    u16::try_from(v).with_context(|| format!("{} {} 超出文件头字段范围", what, v))
}

/// 写出一帧
pub fn write_frame<W: Write>(w: &mut W, frame: &[u8]) -> Result<()> {
    w.write_u16::<LittleEndian>(to_u16(frame.len() as u32, "帧长")?)?;
    w.write_all(frame)?;
    Ok(())
}

/// 读取一帧, 文件结束时返回 `None`
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let len = match r.read_u16::<LittleEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut frame = vec![0u8; len];
    if let Err(e) = r.read_exact(&mut frame) {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            bail!("码流在帧中间截断, 期望 {} 字节", len);
        }
        return Err(e.into());
    }
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header() -> Lc3BinHeader {
        Lc3BinHeader {
            sample_rate: 48000,
            bitrate: 160000,
            channels: 2,
            duration_us: 10000,
            nsamples: 100_000,
        }
    }

    #[test]
    fn test_文件头读写() {
        let mut buf = Vec::new();
        header().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE as usize);
        assert_eq!(&buf[..2], &[0xCC, 0x1C]);

        let parsed = Lc3BinHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, header());
    }

    #[test]
    fn test_跳过扩展文件头() {
        let mut buf = Vec::new();
        header().write_to(&mut buf).unwrap();
        buf[2] = 22;
        buf.extend_from_slice(&[1, 2, 3, 4]);
        write_frame(&mut buf, &[7u8; 30]).unwrap();

        let mut r = Cursor::new(&buf);
        Lc3BinHeader::read_from(&mut r).unwrap();
        assert_eq!(read_frame(&mut r).unwrap(), Some(vec![7u8; 30]));
    }

    #[test]
    fn test_错误标识() {
        let buf = [0u8; 18];
        assert!(Lc3BinHeader::read_from(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_帧读取与截断() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[1u8; 40]).unwrap();
        write_frame(&mut buf, &[2u8; 40]).unwrap();

        let mut r = Cursor::new(&buf);
        assert_eq!(read_frame(&mut r).unwrap().unwrap().len(), 40);
        assert_eq!(read_frame(&mut r).unwrap().unwrap(), vec![2u8; 40]);
        assert!(read_frame(&mut r).unwrap().is_none());

        let truncated = &buf[..50];
        let mut r = Cursor::new(truncated);
        read_frame(&mut r).unwrap();
        assert!(read_frame(&mut r).is_err());
    }
}
