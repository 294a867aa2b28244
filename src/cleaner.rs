//! 脏编辑扫描
//!
//! 直接在字节流上按组层级扫描插件，不构造完整记录：
//! - 已删除但仍保留的引用（UDR）
//! - 光照雾距全为 0 的单元格
//!
//! 详细模式下还会记录每个删除候选所在的单元格与世界空间，必要时再扫描
//! 一遍补全它们的编辑器ID和室外网格坐标。

use crate::catalog::RecordRegistry;
use crate::datatypes::{cstrip, read_i32, FormId, RecordFlags, Signature, PLUGIN_ENCODING};
use crate::fog::{cell_has_fog_defect, holds_cells};
use crate::group::{GroupHeader, GroupType};
use crate::header::{RecHeader, RecordHeader};
use crate::io::{ModReader, PluginSource};
use crate::progress::{Progress, SubProgress};
use crate::record::{inflate_record_data, Record};
use crate::subrecord::Subrecord;
use crate::utils::Result;
use bitflags::bitflags;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, info, trace, warn};

bitflags! {
    /// 扫描内容
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CleanFlags: u32 {
        /// 已删除的引用
        const UDR = 0x01;
        /// 与主文件完全相同的记录（由外部工具检测，这里总是为空）
        const ITM = 0x02;
        /// 雾距缺陷
        const FOG = 0x04;
        const DEFAULT = Self::UDR.bits() | Self::ITM.bits();
        const ALL = Self::UDR.bits() | Self::ITM.bits() | Self::FOG.bits();
    }
}

impl Default for CleanFlags {
    fn default() -> Self {
        CleanFlags::DEFAULT
    }
}

/// 单元格类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellKind {
    Interior,
    Exterior,
}

/// 一个删除候选
///
/// 简单模式下只有 `fid`，其余字段由详细模式填写。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UdrInfo {
    pub fid: FormId,
    pub signature: Option<Signature>,
    pub parent_fid: Option<FormId>,
    pub parent_eid: String,
    pub parent_kind: Option<CellKind>,
    pub grandparent_fid: Option<FormId>,
    pub grandparent_eid: String,
    /// 室外单元格的网格坐标
    pub pos: Option<(i32, i32)>,
}

impl UdrInfo {
    pub fn new(fid: FormId) -> Self {
        UdrInfo {
            fid,
            signature: None,
            parent_fid: None,
            parent_eid: String::new(),
            parent_kind: None,
            grandparent_fid: None,
            grandparent_eid: String::new(),
            pos: None,
        }
    }
}

/// 单个插件的扫描结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanResult {
    /// 按 FormID 排序
    pub udr: Vec<UdrInfo>,
    pub itm: BTreeSet<FormId>,
    pub fog: BTreeSet<FormId>,
}

impl ScanResult {
    pub fn is_clean(&self) -> bool {
        self.udr.is_empty() && self.itm.is_empty() && self.fog.is_empty()
    }
}

/// 批量扫描中一个文件的结果；`result` 为 `None` 表示该文件扫描失败
#[derive(Debug, Clone, Serialize)]
pub struct FileScanReport {
    pub name: String,
    pub result: Option<ScanResult>,
    pub error: Option<String>,
}

/// 扫描过程中的组层级位置
#[derive(Debug, Default)]
struct GroupContext {
    parent_fid: Option<FormId>,
    parent_kind: Option<CellKind>,
    grandparent_fid: Option<FormId>,
}

impl GroupContext {
    fn enter(&mut self, header: &GroupHeader) {
        match header.group_type {
            GroupType::WorldChildren => {
                self.grandparent_fid = Some(header.label_fid());
                self.parent_kind = Some(CellKind::Exterior);
                self.parent_fid = None;
            }
            GroupType::InteriorBlock => {
                self.parent_kind = Some(CellKind::Interior);
                self.parent_fid = None;
                self.grandparent_fid = None;
            }
            t if t.is_cell_children() => {
                self.parent_fid = Some(header.label_fid());
            }
            _ => {}
        }
    }
}

/// 插件清理扫描器
pub struct ModCleaner<'a> {
    registry: &'a RecordRegistry,
    source: &'a dyn PluginSource,
    what: CleanFlags,
    detailed: bool,
}

impl<'a> ModCleaner<'a> {
    pub fn new(registry: &'a RecordRegistry, source: &'a dyn PluginSource) -> Self {
        ModCleaner {
            registry,
            source,
            what: CleanFlags::DEFAULT,
            detailed: false,
        }
    }

    pub fn with_flags(mut self, what: CleanFlags) -> Self {
        self.what = what;
        self
    }

    /// 详细模式：记录删除候选的父单元格与世界空间
    pub fn detailed(mut self, detailed: bool) -> Self {
        self.detailed = detailed;
        self
    }

    /// 扫描一个插件文件
    pub fn scan(&self, path: &Path, progress: &mut dyn Progress) -> Result<ScanResult> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut ins = ModReader::new(name, self.source.open(path)?)?;
        self.scan_reader(&mut ins, progress)
    }

    /// 按顺序扫描多个插件
    ///
    /// 单个文件失败只记录在它的报告里，继续下一个文件；取消时立即返回
    /// `Cancelled`，已完成文件的报告保留在 `reports` 中。
    pub fn scan_many(
        &self,
        paths: &[&Path],
        progress: &mut dyn Progress,
        reports: &mut Vec<FileScanReport>,
    ) -> Result<()> {
        let count = paths.len().max(1) as f64;
        for (i, path) in paths.iter().enumerate() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            progress.report(i as f64 / count, &name)?;

            let mut sub = SubProgress::new(progress, i as f64 / count, (i + 1) as f64 / count);
            match self.scan(path, &mut sub) {
                Ok(result) => {
                    info!(
                        "{}: {} 个删除候选, {} 个雾距缺陷单元格",
                        name,
                        result.udr.len(),
                        result.fog.len()
                    );
                    reports.push(FileScanReport {
                        name,
                        result: Some(result),
                        error: None,
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("扫描 {} 失败: {}", name, e);
                    reports.push(FileScanReport {
                        name,
                        result: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(())
    }

    /// 扫描已打开的插件流
    pub fn scan_reader<R: Read + Seek>(
        &self,
        ins: &mut ModReader<R>,
        progress: &mut dyn Progress,
    ) -> Result<ScanResult> {
        let mut result = ScanResult::default();
        if !self.what.intersects(CleanFlags::UDR | CleanFlags::FOG) {
            return Ok(result);
        }
        if read_masters(ins)?.is_empty() {
            debug!("{} 没有主文件，跳过扫描", ins.name());
            return Ok(result);
        }

        let (pass1_end, pass2_end) = if self.detailed { (0.5, 1.0) } else { (1.0, 1.0) };
        let mut udr = BTreeMap::new();
        let mut parents_to_scan: BTreeMap<FormId, BTreeSet<FormId>> = BTreeMap::new();
        {
            let mut sub = SubProgress::new(progress, 0.0, pass1_end);
            self.first_pass(ins, &mut sub, &mut udr, &mut parents_to_scan, &mut result.fog)?;
        }
        if !parents_to_scan.is_empty() {
            let mut sub = SubProgress::new(progress, pass1_end, pass2_end);
            backfill_parents(ins, &mut sub, &mut udr, &parents_to_scan)?;
        }

        result.udr = udr.into_values().collect();
        Ok(result)
    }

    fn first_pass<R: Read + Seek>(
        &self,
        ins: &mut ModReader<R>,
        progress: &mut dyn Progress,
        udr: &mut BTreeMap<FormId, UdrInfo>,
        parents_to_scan: &mut BTreeMap<FormId, BTreeSet<FormId>>,
        fog: &mut BTreeSet<FormId>,
    ) -> Result<()> {
        let do_udr = self.what.contains(CleanFlags::UDR);
        let do_fog = self.what.contains(CleanFlags::FOG);
        let total = ins.size().max(1) as f64;
        let mut context = GroupContext::default();

        ins.seek(0)?;
        while !ins.at_end(ins.size())? {
            let pos = ins.tell()?;
            progress.report(pos as f64 / total, ins.name())?;

            match ins.unpack_rec_header()? {
                RecHeader::Group(header) => {
                    if header.group_type == GroupType::Top && !holds_cells(header.label_sig()) {
                        trace!("跳过顶级组 {}", header.label_string());
                        ins.skip(header.blob_size())?;
                    } else if self.detailed {
                        context.enter(&header);
                    }
                }
                RecHeader::Record(header) => {
                    let fid = header.form_id;
                    if do_udr
                        && header.flags().contains(RecordFlags::DELETED)
                        && self.registry.is_udr_type(header.signature)
                    {
                        let info = if self.detailed {
                            if let Some(parent) = context.parent_fid {
                                parents_to_scan.entry(parent).or_default().insert(fid);
                            }
                            if let Some(grandparent) = context.grandparent_fid {
                                parents_to_scan.entry(grandparent).or_default().insert(fid);
                            }
                            UdrInfo {
                                signature: Some(header.signature),
                                parent_fid: context.parent_fid,
                                parent_kind: context.parent_kind,
                                grandparent_fid: context.grandparent_fid,
                                ..UdrInfo::new(fid)
                            }
                        } else {
                            UdrInfo::new(fid)
                        };
                        debug!("删除候选 {} {}", header.signature, fid);
                        udr.insert(fid, info);
                    }

                    if do_fog && header.signature == Signature::CELL {
                        let data = ins.read(header.size as usize)?;
                        match cell_has_fog_defect(&header, &data) {
                            Ok(true) => {
                                debug!("雾距缺陷单元格 {}", fid);
                                fog.insert(fid);
                            }
                            Ok(false) => {}
                            Err(e) => warn!("无法检查单元格 {} ({}): {}", fid, ins.name(), e),
                        }
                    } else {
                        ins.skip(header.size as u64)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// 第二遍：读取父单元格和世界空间，补全编辑器ID与坐标
fn backfill_parents<R: Read + Seek>(
    ins: &mut ModReader<R>,
    progress: &mut dyn Progress,
    udr: &mut BTreeMap<FormId, UdrInfo>,
    parents_to_scan: &BTreeMap<FormId, BTreeSet<FormId>>,
) -> Result<()> {
    let total = ins.size().max(1) as f64;
    ins.seek(0)?;
    while !ins.at_end(ins.size())? {
        let pos = ins.tell()?;
        progress.report(pos as f64 / total, ins.name())?;

        match ins.unpack_rec_header()? {
            RecHeader::Group(header) => {
                if header.group_type == GroupType::Top && !holds_cells(header.label_sig()) {
                    ins.skip(header.blob_size())?;
                }
            }
            RecHeader::Record(header) => {
                let Some(children) = parents_to_scan.get(&header.form_id) else {
                    ins.skip(header.size as u64)?;
                    continue;
                };
                let signature = header.signature;
                let fid = header.form_id;
                let record = Record::load(header, ins, None, false)?;
                let (eid, pos) = match parent_info(&record) {
                    Ok(info) => info,
                    Err(e) => {
                        warn!("{}", record.error_string("reading", &e));
                        continue;
                    }
                };

                for child in children {
                    let Some(info) = udr.get_mut(child) else { continue };
                    if signature == Signature::CELL {
                        info.parent_eid = eid.clone();
                        if info.parent_kind == Some(CellKind::Exterior) {
                            info.pos = pos;
                        }
                    } else if signature == Signature::WRLD {
                        info.grandparent_eid = eid.clone();
                    }
                }
                trace!("补全父记录 {} {}: '{}'", signature, fid, eid);
            }
        }
    }
    Ok(())
}

/// 父记录的编辑器ID与网格坐标
fn parent_info(record: &Record) -> Result<(String, Option<(i32, i32)>)> {
    let mut eid = String::new();
    let mut pos = None;
    for sub in record.iterate_subrecords(Some(&[Signature::EDID, Signature::XCLC]))? {
        if sub.signature == Signature::EDID {
            eid = sub.as_zstring();
        } else {
            let mut grid = sub.data.as_slice();
            pos = Some((read_i32(&mut grid)?, read_i32(&mut grid)?));
        }
    }
    Ok((eid, pos))
}

/// 读取文件开头插件头中的主文件列表
pub fn read_masters<R: Read + Seek>(ins: &mut ModReader<R>) -> Result<Vec<String>> {
    ins.seek(0)?;
    let header = match ins.unpack_rec_header()? {
        RecHeader::Record(header) if header.signature == Signature::TES4 => header,
        other => {
            return Err(ins.error_at(format!("文件开头应为 TES4 记录，实际为 {}", other.signature()), 0));
        }
    };
    let data = ins.read(header.size as usize)?;
    let masters = masters_from_header(&header, &data).map_err(|e| e.with_file(ins.name()))?;
    ins.seek(0)?;
    Ok(masters)
}

pub(crate) fn masters_from_header(header: &RecordHeader, data: &[u8]) -> Result<Vec<String>> {
    let payload = if header.flags().contains(RecordFlags::COMPRESSED) {
        inflate_record_data(data)?
    } else {
        data.to_vec()
    };
    Ok(Subrecord::parse_all(&payload)
        .map_err(|e| e.with_record(header.signature, header.form_id))?
        .iter()
        .filter(|sub| sub.signature == Signature::MAST)
        .map(|sub| {
            let (decoded, _) = PLUGIN_ENCODING.decode_without_bom_handling(cstrip(&sub.data));
            decoded.into_owned()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::common::sample_registry;
    use crate::header::write_subrecord;
    use crate::io::DefaultPluginSource;
    use crate::progress::{FnProgress, NullProgress};
    use crate::utils::EspError;

    fn record(sig: &[u8; 4], fid: u32, flags: RecordFlags, subs: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
        let mut data = Vec::new();
        for (sig, payload) in subs {
            write_subrecord(&mut data, Signature::new(sig), payload).unwrap();
        }
        let mut header = RecordHeader::new(Signature::new(sig), FormId(fid), flags);
        header.size = data.len() as u32;
        let mut out = header.pack().to_vec();
        out.extend(data);
        out
    }

    fn group(label: [u8; 4], group_type: GroupType, children: &[Vec<u8>]) -> Vec<u8> {
        let body = children.concat();
        let mut out = GroupHeader::new(label, group_type, 24 + body.len() as u32).pack().to_vec();
        out.extend(body);
        out
    }

    fn tes4(masters: &[&str]) -> Vec<u8> {
        let mut hedr = Vec::new();
        hedr.extend(1.7f32.to_le_bytes());
        hedr.extend(0u32.to_le_bytes());
        hedr.extend(0x800u32.to_le_bytes());
        let names: Vec<Vec<u8>> = masters.iter().map(|m| format!("{}\0", m).into_bytes()).collect();
        let mut subs: Vec<(&[u8; 4], &[u8])> = vec![(b"HEDR", &hedr)];
        for name in &names {
            subs.push((b"MAST", name));
            subs.push((b"DATA", &[0u8; 8]));
        }
        record(b"TES4", 0, RecordFlags::empty(), &subs)
    }

    fn interior_plugin(masters: &[&str]) -> Vec<u8> {
        let cell_fid = 0x0100_0C01u32;
        let cell = record(b"CELL", cell_fid, RecordFlags::empty(), &[(b"EDID", b"TestCell\0")]);
        let refr = record(b"REFR", 0x0000_1234, RecordFlags::DELETED, &[(b"NAME", &[1, 0, 0, 0])]);
        let kept = record(b"REFR", 0x0100_0801, RecordFlags::empty(), &[(b"NAME", &[1, 0, 0, 0])]);
        let temporary = group(cell_fid.to_le_bytes(), GroupType::CellTemporaryChildren, &[refr, kept]);
        let block = group(0u32.to_le_bytes(), GroupType::InteriorBlock, &[cell, temporary]);
        let gmst = group(*b"GMST", GroupType::Top, &[record(b"GMST", 0x0100_0001, RecordFlags::DELETED, &[])]);
        let mut out = tes4(masters);
        out.extend(gmst);
        out.extend(group(*b"CELL", GroupType::Top, &[block]));
        out
    }

    fn scan(bytes: Vec<u8>, what: CleanFlags, detailed: bool) -> ScanResult {
        let registry = sample_registry().unwrap();
        let mut ins = ModReader::from_bytes("Test.esp", bytes);
        ModCleaner::new(&registry, &DefaultPluginSource)
            .with_flags(what)
            .detailed(detailed)
            .scan_reader(&mut ins, &mut NullProgress)
            .unwrap()
    }

    #[test]
    fn test_detailed_interior_candidate() {
        let result = scan(interior_plugin(&["Skyrim.esm"]), CleanFlags::ALL, true);
        assert!(result.itm.is_empty());
        assert_eq!(result.udr.len(), 1);
        let info = &result.udr[0];
        assert_eq!(info.fid, FormId(0x1234));
        assert_eq!(info.signature, Some(Signature::new(b"REFR")));
        assert_eq!(info.parent_fid, Some(FormId(0x0100_0C01)));
        assert_eq!(info.parent_eid, "TestCell");
        assert_eq!(info.parent_kind, Some(CellKind::Interior));
        assert_eq!(info.grandparent_fid, None);
        assert_eq!(info.pos, None);
    }

    #[test]
    fn test_simple_mode_only_fids() {
        let result = scan(interior_plugin(&["Skyrim.esm"]), CleanFlags::DEFAULT, false);
        assert_eq!(result.udr, vec![UdrInfo::new(FormId(0x1234))]);
    }

    #[test]
    fn test_no_masters_not_scanned() {
        let result = scan(interior_plugin(&[]), CleanFlags::ALL, true);
        assert!(result.is_clean());
    }

    #[test]
    fn test_itm_only_returns_empty() {
        let result = scan(interior_plugin(&["Skyrim.esm"]), CleanFlags::ITM, true);
        assert!(result.is_clean());
    }

    #[test]
    fn test_exterior_candidate_position() {
        let wrld_fid = 0x0100_0A01u32;
        let cell_fid = 0x0100_0C02u32;
        let mut xclc = Vec::new();
        xclc.extend((-3i32).to_le_bytes());
        xclc.extend(7i32.to_le_bytes());
        xclc.extend(0u32.to_le_bytes());
        let wrld = record(b"WRLD", wrld_fid, RecordFlags::empty(), &[(b"EDID", b"Tamriel\0")]);
        let cell = record(b"CELL", cell_fid, RecordFlags::empty(), &[(b"EDID", b"\0"), (b"XCLC", &xclc)]);
        let achr = record(b"ACHR", 0x0000_5678, RecordFlags::DELETED, &[]);
        let children = group(cell_fid.to_le_bytes(), GroupType::CellPersistentChildren, &[achr]);
        let sub_block = group([0, 0, 0, 0], GroupType::ExteriorSubBlock, &[cell, children]);
        let block = group([0, 0, 0, 0], GroupType::ExteriorBlock, &[sub_block]);
        let world_children = group(wrld_fid.to_le_bytes(), GroupType::WorldChildren, &[block]);
        let mut bytes = tes4(&["Skyrim.esm"]);
        bytes.extend(group(*b"WRLD", GroupType::Top, &[wrld, world_children]));

        let result = scan(bytes, CleanFlags::UDR, true);
        let info = &result.udr[0];
        assert_eq!(info.parent_kind, Some(CellKind::Exterior));
        assert_eq!(info.grandparent_fid, Some(FormId(wrld_fid)));
        assert_eq!(info.grandparent_eid, "Tamriel");
        assert_eq!(info.parent_eid, "");
        assert_eq!(info.pos, Some((-3, 7)));
    }

    #[test]
    fn test_bad_lighting_is_skipped() {
        let cell = record(b"CELL", 0x0100_0C03, RecordFlags::empty(), &[(b"XCLL", &[0u8; 8])]);
        let mut bytes = tes4(&["Skyrim.esm"]);
        bytes.extend(group(*b"CELL", GroupType::Top, &[cell]));
        let result = scan(bytes, CleanFlags::FOG, false);
        assert!(result.fog.is_empty());
    }

    #[test]
    fn test_scan_many_keeps_going_and_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("Good.esp");
        let broken = dir.path().join("Broken.esp");
        std::fs::write(&good, interior_plugin(&["Skyrim.esm"])).unwrap();
        let mut truncated = interior_plugin(&["Skyrim.esm"]);
        truncated.truncate(truncated.len() - 10);
        std::fs::write(&broken, truncated).unwrap();

        let registry = sample_registry().unwrap();
        let cleaner = ModCleaner::new(&registry, &DefaultPluginSource);
        let mut reports = Vec::new();
        cleaner
            .scan_many(&[broken.as_path(), good.as_path()], &mut NullProgress, &mut reports)
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].result.is_none());
        assert!(reports[0].error.is_some());
        assert_eq!(reports[1].result.as_ref().map(|r| r.udr.len()), Some(1));

        // 第二个文件开始时取消
        let mut cancel = FnProgress(|f: f64, _: &str| if f >= 0.5 { Err(EspError::Cancelled) } else { Ok(()) });
        let mut reports = Vec::new();
        let err = cleaner
            .scan_many(&[good.as_path(), good.as_path()], &mut cancel, &mut reports)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "Good.esp");
    }
}
