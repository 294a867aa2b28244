//! 单元格雾距修复
//!
//! 光照数据（XCLL）中近雾距、远雾距和雾裁剪距离全部为 0 的单元格会在部分
//! 显卡上整片发黑。修复时逐字节复制插件，只把这些单元格的近雾距改为一个
//! 很小的非零值。

use crate::datatypes::{write_u32, FormId, RecordFlags, Signature};
use crate::group::GroupType;
use crate::header::{read_sub_header, RecHeader, RecordHeader, SUB_HEADER_SIZE};
use crate::io::{ModReader, PluginSource};
use crate::progress::Progress;
use crate::record::{deflate_record_data, inflate_record_data};
use crate::utils::{create_backup, EspError, Result};
use serde::Serialize;
use std::io::{BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// XCLL 中参与判断的前36字节
pub const XCLL_LIGHTING_SIZE: usize = 36;
const FOG_NEAR_OFFSET: usize = 12;
const FOG_FAR_OFFSET: usize = 16;
const FOG_CLIP_OFFSET: usize = 32;

/// 默认写入的近雾距
pub const DEFAULT_FOG_NEAR: f32 = 0.0001;

fn f32_at(data: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// 光照数据是否有雾距缺陷
pub fn lighting_has_fog_defect(xcll: &[u8]) -> Result<bool> {
    if xcll.len() < XCLL_LIGHTING_SIZE {
        return Err(EspError::format(format!(
            "XCLL 数据只有 {} 字节，至少需要 {} 字节",
            xcll.len(),
            XCLL_LIGHTING_SIZE
        ))
        .with_subrecord(Signature::XCLL));
    }
    Ok(f32_at(xcll, FOG_NEAR_OFFSET) == 0.0
        && f32_at(xcll, FOG_FAR_OFFSET) == 0.0
        && f32_at(xcll, FOG_CLIP_OFFSET) == 0.0)
}

/// 在（已解压的）单元格数据中定位 XCLL 子记录的数据区间
fn find_lighting(payload: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut cursor = Cursor::new(payload);
    while cursor.position() + SUB_HEADER_SIZE <= payload.len() as u64 {
        let (sig, size) = read_sub_header(&mut cursor).map_err(EspError::into_format)?;
        let start = cursor.position() as usize;
        let end = start + size as usize;
        if end > payload.len() {
            return Err(EspError::format(format!(
                "Insufficient data for subrecord data: expected {} bytes",
                size
            ))
            .with_subrecord(sig)
            .with_offset(start as u64));
        }
        if sig == Signature::XCLL {
            return Ok(Some((start, end)));
        }
        cursor.set_position(end as u64);
    }
    Ok(None)
}

/// 单元格记录数据（可能压缩）是否有雾距缺陷；没有 XCLL 的单元格不算
pub fn cell_has_fog_defect(header: &RecordHeader, data: &[u8]) -> Result<bool> {
    let payload = cell_payload(header, data)?;
    match find_lighting(&payload)? {
        Some((start, end)) => lighting_has_fog_defect(&payload[start..end]),
        None => Ok(false),
    }
}

fn cell_payload(header: &RecordHeader, data: &[u8]) -> Result<Vec<u8>> {
    if header.flags().contains(RecordFlags::COMPRESSED) {
        inflate_record_data(data)
    } else {
        Ok(data.to_vec())
    }
}

/// 修补单元格数据，返回新的记录数据；无需修补时返回 `None`
///
/// 压缩的单元格解压、修补后重新压缩。
fn patch_cell(header: &RecordHeader, data: &[u8], near: f32) -> Result<Option<Vec<u8>>> {
    let mut payload = cell_payload(header, data)?;
    let Some((start, end)) = find_lighting(&payload)? else {
        return Ok(None);
    };
    if !lighting_has_fog_defect(&payload[start..end])? {
        return Ok(None);
    }
    let at = start + FOG_NEAR_OFFSET;
    payload[at..at + 4].copy_from_slice(&near.to_le_bytes());

    if header.flags().contains(RecordFlags::COMPRESSED) {
        deflate_record_data(&payload).map(Some)
    } else {
        Ok(Some(payload))
    }
}

/// 顶级组中只有 CELL 和 WRLD 含有单元格
pub(crate) fn holds_cells(label: Signature) -> bool {
    label == Signature::CELL || label == Signature::WRLD
}

/// 修复选项
#[derive(Debug, Clone)]
pub struct FogFixOptions {
    /// 替换前创建带时间戳的备份
    pub backup: bool,
    pub near_value: f32,
}

impl Default for FogFixOptions {
    fn default() -> Self {
        FogFixOptions {
            backup: true,
            near_value: DEFAULT_FOG_NEAR,
        }
    }
}

/// 修复结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct FogFixReport {
    pub fixed_cells: Vec<FormId>,
    /// 替换后文件的大小；没有修改时为 0
    pub bytes_written: u64,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct FogFixer {
    options: FogFixOptions,
}

impl FogFixer {
    pub fn new(options: FogFixOptions) -> Self {
        FogFixer { options }
    }

    /// 修复一个插件文件
    ///
    /// 先写同目录的临时文件；至少修复了一个单元格才替换原文件，否则丢弃
    /// 临时文件，原文件保持不动。
    pub fn fix_file(
        &self,
        source: &dyn PluginSource,
        path: &Path,
        progress: &mut dyn Progress,
    ) -> Result<FogFixReport> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut temp = NamedTempFile::new_in(dir)?;
        let fixed_cells = {
            // 读取端在替换前关闭
            let mut ins = ModReader::new(name.clone(), source.open(path)?)?;
            let mut out = BufWriter::new(temp.as_file_mut());
            let fixed = self.fix_stream(&mut ins, &mut out, progress)?;
            out.flush()?;
            fixed
        };

        if fixed_cells.is_empty() {
            debug!("{}: 没有需要修复的单元格", name);
            return Ok(FogFixReport::default());
        }

        let bytes_written = temp.as_file().metadata()?.len();
        let backup = if self.options.backup {
            Some(create_backup(path)?)
        } else {
            None
        };
        temp.persist(path).map_err(|e| e.error)?;

        info!("{}: 修复了 {} 个单元格", name, fixed_cells.len());
        Ok(FogFixReport {
            fixed_cells,
            bytes_written,
            backup,
        })
    }

    /// 复制整个插件流，同时修补有缺陷的单元格
    ///
    /// 单元格大小改变（压缩数据重新压缩）时，回写外层组的大小。
    pub fn fix_stream<R: Read + Seek, W: Write + Seek>(
        &self,
        ins: &mut ModReader<R>,
        out: &mut W,
        progress: &mut dyn Progress,
    ) -> Result<Vec<FormId>> {
        let total = ins.size().max(1) as f64;
        let mut fixed = Vec::new();
        // (输出中的组头位置, 输入中的组结束位置)
        let mut open_groups: Vec<(u64, u64)> = Vec::new();

        loop {
            let pos = ins.tell()?;
            close_groups(&mut open_groups, pos, out)?;
            if ins.at_end(ins.size())? {
                break;
            }
            progress.report(pos as f64 / total, ins.name())?;

            match ins.unpack_rec_header()? {
                RecHeader::Group(header) => {
                    let out_pos = out.stream_position()?;
                    out.write_all(&header.pack())?;
                    if header.group_type == GroupType::Top && !holds_cells(header.label_sig()) {
                        let blob = ins.read(header.blob_size() as usize)?;
                        out.write_all(&blob)?;
                    } else {
                        open_groups.push((out_pos, pos + header.size as u64));
                    }
                }
                RecHeader::Record(mut header) => {
                    let data = ins.read(header.size as usize)?;
                    let patched = if header.signature == Signature::CELL {
                        match patch_cell(&header, &data, self.options.near_value) {
                            Ok(patched) => patched,
                            Err(e) => {
                                warn!("跳过单元格 {} ({}): {}", header.form_id, ins.name(), e);
                                None
                            }
                        }
                    } else {
                        None
                    };

                    match patched {
                        Some(new_data) => {
                            debug!("修复单元格 {}", header.form_id);
                            fixed.push(header.form_id);
                            header.size = new_data.len() as u32;
                            out.write_all(&header.pack())?;
                            out.write_all(&new_data)?;
                        }
                        None => {
                            out.write_all(&header.pack())?;
                            out.write_all(&data)?;
                        }
                    }
                }
            }
        }

        Ok(fixed)
    }
}

/// 回写已经结束的组的大小
fn close_groups<W: Write + Seek>(open_groups: &mut Vec<(u64, u64)>, pos: u64, out: &mut W) -> Result<()> {
    while let Some(&(out_pos, in_end)) = open_groups.last() {
        if pos < in_end {
            break;
        }
        open_groups.pop();
        let end = out.stream_position()?;
        out.seek(SeekFrom::Start(out_pos + 4))?;
        write_u32(out, (end - out_pos) as u32)?;
        out.seek(SeekFrom::Start(end))?;
    }
    Ok(())
}
