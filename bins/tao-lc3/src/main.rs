//! tao-lc3 - LC3 码流编解码命令行工具
//!
//! 原始 PCM 与 .lc3 码流文件之间的互相转换, 支持模拟丢帧以检验丢帧隐藏.

mod decode;
mod encode;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tao::codec::lc3::{self, PcmFormat};
use tao::logging::{self, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "tao-lc3", version, about = "纯 Rust LC3 编解码工具")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// 日志级别 (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// 日志文件目录 (不指定时只输出到控制台)
    #[arg(long, global = true)]
    log_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 编码原始 PCM 为 .lc3 码流
    Encode(EncodeArgs),
    /// 解码 .lc3 码流为原始 PCM
    Decode(DecodeArgs),
    /// 列出预设配置
    Presets,
}

#[derive(Args, Debug, Clone)]
pub struct EncodeArgs {
    /// 输入 PCM 文件 (交错排列, 小端)
    #[arg(short, long)]
    pub input: PathBuf,

    /// 输出 .lc3 文件
    #[arg(short, long)]
    pub output: PathBuf,

    /// 预设名称 (如 16_2, 48_4), 覆盖采样率、帧时长与帧字节数
    #[arg(long)]
    pub preset: Option<String>,

    /// 采样率 (Hz)
    #[arg(short = 'r', long, default_value_t = 48000)]
    pub sample_rate: u32,

    /// 声道数
    #[arg(short, long, default_value_t = 1)]
    pub channels: u16,

    /// 帧时长 (us), 2500, 5000, 7500 或 10000
    #[arg(short, long, default_value_t = 10000)]
    pub duration_us: u32,

    /// 总码率 (bits/s), 按声道均分
    #[arg(short, long, default_value_t = 96000)]
    pub bitrate: u32,

    /// 每声道帧字节数, 指定时忽略码率
    #[arg(long)]
    pub frame_bytes: Option<usize>,

    /// 输入 PCM 格式
    #[arg(long, value_enum, default_value_t = PcmArg::S16)]
    pub pcm_format: PcmArg,
}

#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
    /// 输入 .lc3 文件
    #[arg(short, long)]
    pub input: PathBuf,

    /// 输出 PCM 文件
    #[arg(short, long)]
    pub output: PathBuf,

    /// 每隔 N 帧丢弃一帧 (模拟丢包)
    #[arg(long)]
    pub drop_interval: Option<u32>,

    /// 输出 PCM 格式
    #[arg(long, value_enum, default_value_t = PcmArg::S16)]
    pub pcm_format: PcmArg,
}

/// 命令行 PCM 格式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmArg {
    /// 16 位整数
    S16,
    /// 24 位整数, 4 字节容器
    S24,
    /// 24 位整数, 紧凑 3 字节
    S24Packed,
    /// 32 位浮点
    F32,
}

impl From<PcmArg> for PcmFormat {
    fn from(arg: PcmArg) -> Self {
        match arg {
            PcmArg::S16 => PcmFormat::S16,
            PcmArg::S24 => PcmFormat::S24,
            PcmArg::S24Packed => PcmFormat::S24Packed,
            PcmArg::F32 => PcmFormat::F32,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let config = LoggingConfig {
        directory: cli.log_dir.clone(),
        ..LoggingConfig::default()
    }
    .with_verbosity(cli.verbose);
    if let Err(e) = logging::init(config) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    if let Err(e) = run(cli.command) {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Encode(args) => {
            let summary = encode::encode_file(&args)?;
            eprintln!(
                "编码完成: {} 帧, 每声道 {} 采样, {} 字节/帧",
                summary.frames, summary.samples, summary.frame_bytes
            );
        }
        Command::Decode(args) => {
            let summary = decode::decode_file(&args)?;
            eprintln!(
                "解码完成: {} 帧, 其中 {} 帧为隐藏输出, 每声道 {} 采样",
                summary.frames, summary.concealed, summary.samples
            );
        }
        Command::Presets => print_presets(),
    }
    Ok(())
}

fn print_presets() {
    println!("{:<8} {:>8} {:>8} {:>8} {:>10}", "名称", "采样率", "帧时长", "字节", "码率");
    for p in lc3::PRESETS {
        let bitrate = lc3::resolve_bitrate(p.duration_us, p.frame_bytes).unwrap_or(0);
        println!(
            "{:<8} {:>8} {:>8} {:>8} {:>10}",
            p.name, p.sample_rate, p.duration_us, p.frame_bytes, bitrate
        );
    }
}
