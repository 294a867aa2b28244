use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use esp_engine::catalog::common::sample_registry;
use esp_engine::group::GroupChild;
use esp_engine::io::DefaultPluginSource;
use esp_engine::progress::FnProgress;
use esp_engine::{
    CleanFlags, FogFixOptions, FogFixer, FormId, ModCleaner, ModDetails, NullProgress, Plugin, RecordRegistry,
    SUPPORTED_EXTENSIONS,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "esp_engine")]
#[command(about = "ESP/ESM/ESL 插件记录引擎：扫描脏编辑、修复雾距、列出详情")]
#[command(version = "0.1.0")]
struct Cli {
    /// 静默模式(仅输出警告和错误)
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 扫描已删除的引用和雾距缺陷
    Scan {
        /// 插件文件
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// 同时检查雾距缺陷
        #[arg(long)]
        fog: bool,
        /// 记录删除候选所在的单元格和世界空间
        #[arg(long)]
        detailed: bool,
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 修复雾距缺陷（原地替换）
    FixFog {
        input: PathBuf,
        /// 不创建备份
        #[arg(long)]
        no_backup: bool,
    },
    /// 列出每个组的记录
    Details {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// 解析后重建，用于验证往返一致性
    Rebuild {
        input: PathBuf,
        /// 输出路径，默认为 <输入>.rebuilt
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 显示插件统计信息，可选解码单条记录
    Dump {
        input: PathBuf,
        /// 要解码的记录 FormID（十六进制）
        #[arg(long)]
        record: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    let registry = sample_registry().context("构建记录注册表失败")?;

    match cli.command {
        Command::Scan {
            inputs,
            fog,
            detailed,
            json,
        } => handle_scan(&registry, &inputs, fog, detailed, json),
        Command::FixFog { input, no_backup } => handle_fix_fog(&input, no_backup),
        Command::Details { input, json } => handle_details(&registry, &input, json),
        Command::Rebuild { input, output } => handle_rebuild(&registry, &input, output),
        Command::Dump { input, record } => handle_dump(&registry, &input, record.as_deref()),
    }
}

/// 验证输入文件
fn validate_input(input: &Path) -> anyhow::Result<()> {
    if !input.exists() {
        bail!("输入文件不存在: {:?}", input);
    }

    let extension = input
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    if !SUPPORTED_EXTENSIONS.iter().any(|&ext| Some(ext) == extension.as_deref()) {
        bail!("输入文件必须是ESP、ESM或ESL文件: {:?}", input);
    }

    Ok(())
}

fn handle_scan(registry: &RecordRegistry, inputs: &[PathBuf], fog: bool, detailed: bool, json: bool) -> anyhow::Result<()> {
    for input in inputs {
        validate_input(input)?;
    }
    let what = if fog { CleanFlags::ALL } else { CleanFlags::DEFAULT };
    let cleaner = ModCleaner::new(registry, &DefaultPluginSource)
        .with_flags(what)
        .detailed(detailed);

    let paths: Vec<&Path> = inputs.iter().map(PathBuf::as_path).collect();
    let mut reports = Vec::new();
    let mut progress = FnProgress(|fraction: f64, label: &str| -> esp_engine::Result<()> {
        tracing::trace!("{:>5.1}% {}", fraction * 100.0, label);
        Ok(())
    });
    cleaner.scan_many(&paths, &mut progress, &mut reports)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for report in &reports {
        match (&report.result, &report.error) {
            (Some(result), _) => {
                println!("{}:", report.name);
                println!("  删除候选: {}", result.udr.len());
                for udr in &result.udr {
                    match udr.parent_fid {
                        Some(parent) if !udr.parent_eid.is_empty() => {
                            println!("    {} 位于 {} ({})", udr.fid, parent, udr.parent_eid)
                        }
                        Some(parent) => println!("    {} 位于 {}", udr.fid, parent),
                        None => println!("    {}", udr.fid),
                    }
                }
                if fog {
                    println!("  雾距缺陷单元格: {}", result.fog.len());
                    for fid in &result.fog {
                        println!("    {}", fid);
                    }
                }
            }
            (None, error) => println!("{}: 扫描失败: {}", report.name, error.as_deref().unwrap_or("")),
        }
    }
    Ok(())
}

fn handle_fix_fog(input: &Path, no_backup: bool) -> anyhow::Result<()> {
    validate_input(input)?;
    let fixer = FogFixer::new(FogFixOptions {
        backup: !no_backup,
        ..FogFixOptions::default()
    });
    let report = fixer.fix_file(&DefaultPluginSource, input, &mut NullProgress)?;

    if report.fixed_cells.is_empty() {
        println!("没有需要修复的单元格");
    } else {
        println!("修复了 {} 个单元格，写入 {} bytes", report.fixed_cells.len(), report.bytes_written);
        if let Some(backup) = &report.backup {
            println!("备份: {}", backup.display());
        }
    }
    Ok(())
}

fn handle_details(registry: &RecordRegistry, input: &Path, json: bool) -> anyhow::Result<()> {
    validate_input(input)?;
    let details = ModDetails::read_file(registry, &DefaultPluginSource, input, &mut NullProgress)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&details)?);
        return Ok(());
    }
    for group in &details.groups {
        println!("{} ({} 条记录)", group.label, group.records.len());
        for entry in &group.records {
            println!("  {} {}", entry.fid, entry.eid);
        }
    }
    Ok(())
}

fn handle_rebuild(registry: &RecordRegistry, input: &Path, output: Option<PathBuf>) -> anyhow::Result<()> {
    validate_input(input)?;
    let output = output.unwrap_or_else(|| {
        let mut name = input.as_os_str().to_os_string();
        name.push(".rebuilt");
        PathBuf::from(name)
    });

    let mut plugin = Plugin::load(input, registry)?;
    plugin.write_to_file(&output)?;

    let original = std::fs::read(input)?;
    let rebuilt = std::fs::read(&output)?;
    if original == rebuilt {
        info!("重建文件与原文件一致: {}", output.display());
    } else {
        let first_diff = original
            .iter()
            .zip(&rebuilt)
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| original.len().min(rebuilt.len()));
        bail!(
            "重建文件与原文件不一致: 首个差异位于 0x{:X} (原 {} bytes, 新 {} bytes)",
            first_diff,
            original.len(),
            rebuilt.len()
        );
    }
    Ok(())
}

fn handle_dump(registry: &RecordRegistry, input: &Path, record: Option<&str>) -> anyhow::Result<()> {
    validate_input(input)?;
    let mut plugin = Plugin::load(input, registry)?;
    print!("{}", plugin.stats());
    if !plugin.masters.is_empty() {
        println!("主文件: {}", plugin.masters.join(", "));
    }

    for group in &plugin.groups {
        let count = group
            .children
            .iter()
            .filter(|child| matches!(child, GroupChild::Record(_)))
            .count();
        println!("  {} 直属记录 {}", group.header.label_string(), count);
    }

    let Some(record) = record else {
        return Ok(());
    };
    let fid = u32::from_str_radix(record.trim_start_matches("0x"), 16)
        .map(FormId)
        .with_context(|| format!("无效的 FormID: {}", record))?;
    let Some(found) = plugin.records_mut().into_iter().find(|r| r.form_id() == fid) else {
        bail!("找不到记录 {}", fid);
    };
    if found.schema().is_none() {
        println!("{} {}: 没有结构定义", found.signature(), fid);
        for sub in found.iterate_subrecords(None)? {
            println!("  {} ({} bytes)", sub.signature, sub.data.len());
        }
    } else {
        let signature = found.signature();
        println!("{} {}: {:#?}", signature, fid, found.attrs()?);
    }
    Ok(())
}
