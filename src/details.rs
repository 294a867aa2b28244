//! 插件详情：每个顶级组中记录的 FormID 与编辑器ID 列表

use crate::catalog::RecordRegistry;
use crate::datatypes::{FormId, RawString, RecordFlags, Signature, PLUGIN_ENCODING};
use crate::group::GroupType;
use crate::header::RecHeader;
use crate::io::{ModReader, PluginSource};
use crate::progress::Progress;
use crate::record::inflate_record_data;
use crate::subrecord::Subrecord;
use crate::utils::Result;
use serde::Serialize;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailEntry {
    pub fid: FormId,
    pub eid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDetails {
    pub label: Signature,
    pub records: Vec<DetailEntry>,
}

/// 按组列出记录，组的顺序与文件中首次出现的顺序一致
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModDetails {
    pub groups: Vec<GroupDetails>,
}

impl ModDetails {
    pub fn group(&self, label: Signature) -> Option<&GroupDetails> {
        self.groups.iter().find(|g| g.label == label)
    }

    fn records_for(&mut self, label: Signature) -> &mut Vec<DetailEntry> {
        let index = match self.groups.iter().position(|g| g.label == label) {
            Some(index) => index,
            None => {
                self.groups.push(GroupDetails {
                    label,
                    records: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[index].records
    }

    pub fn read_file(
        registry: &RecordRegistry,
        source: &dyn PluginSource,
        path: &Path,
        progress: &mut dyn Progress,
    ) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut ins = ModReader::new(name, source.open(path)?)?;
        Self::read_from(registry, &mut ins, progress)
    }

    /// 读取整个插件流
    ///
    /// 插件头不属于任何组，不出现在结果中；复杂组（单元格、对话等）整体跳过。
    pub fn read_from<R: Read + Seek>(
        registry: &RecordRegistry,
        ins: &mut ModReader<R>,
        progress: &mut dyn Progress,
    ) -> Result<Self> {
        let mut details = ModDetails::default();
        let total = ins.size().max(1) as f64;
        let mut current: Option<Signature> = None;

        while !ins.at_end(ins.size())? {
            match ins.unpack_rec_header()? {
                RecHeader::Group(header) => {
                    let pos = ins.tell()?;
                    progress.report(pos as f64 / total, &header.label_string())?;
                    if header.group_type != GroupType::Top {
                        continue;
                    }
                    let label = header.label_sig();
                    if registry.is_complex_group(label) {
                        trace!("跳过复杂组 {}", label);
                        ins.skip(header.blob_size())?;
                        current = None;
                    } else {
                        details.records_for(label);
                        current = Some(label);
                    }
                }
                RecHeader::Record(header) => {
                    let data = ins.read(header.size as usize)?;
                    let Some(label) = current else { continue };
                    let payload = if header.flags().contains(RecordFlags::COMPRESSED) {
                        inflate_record_data(&data)
                            .map_err(|e| e.with_record(header.signature, header.form_id).with_file(ins.name()))?
                    } else {
                        data
                    };
                    let eid = editor_id(&payload)
                        .map_err(|e| e.with_record(header.signature, header.form_id).with_file(ins.name()))?;
                    details.records_for(label).push(DetailEntry { fid: header.form_id, eid });
                }
            }
        }

        debug!("{}: {} 个组", ins.name(), details.groups.len());
        Ok(details)
    }
}

/// 编辑器ID：去掉结尾的 NULL，按行分别用插件编码解码
fn editor_id(payload: &[u8]) -> Result<String> {
    let subrecords = Subrecord::parse_all(payload)?;
    let Some(edid) = subrecords.iter().find(|sub| sub.signature == Signature::EDID) else {
        return Ok(String::new());
    };
    let end = edid.data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    Ok(edid.data[..end]
        .split(|&b| b == b'\n')
        .map(|line| RawString::decode_with(line, Some(PLUGIN_ENCODING)).content)
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::common::sample_registry;
    use crate::group::GroupHeader;
    use crate::header::{write_subrecord, RecordHeader};
    use crate::progress::NullProgress;
    use crate::record::deflate_record_data;

    fn record(sig: &[u8; 4], fid: u32, eid: &[u8], compressed: bool) -> Vec<u8> {
        let mut data = Vec::new();
        write_subrecord(&mut data, Signature::EDID, eid).unwrap();
        write_subrecord(&mut data, Signature::new(b"DATA"), &[1, 2]).unwrap();
        let flags = if compressed { RecordFlags::COMPRESSED } else { RecordFlags::empty() };
        if compressed {
            data = deflate_record_data(&data).unwrap();
        }
        let mut header = RecordHeader::new(Signature::new(sig), FormId(fid), flags);
        header.size = data.len() as u32;
        let mut out = header.pack().to_vec();
        out.extend(data);
        out
    }

    fn top(label: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
        let body = children.concat();
        let mut out = GroupHeader::new(*label, GroupType::Top, 24 + body.len() as u32).pack().to_vec();
        out.extend(body);
        out
    }

    #[test]
    fn test_groups_and_editor_ids() {
        let mut bytes = record(b"TES4", 0, b"", false);
        bytes.extend(top(
            b"GMST",
            &[
                record(b"GMST", 0x0100_0001, b"fFirst\0", false),
                record(b"GMST", 0x0100_0002, b"sCaf\xe9\nLine\0\0", true),
            ],
        ));
        bytes.extend(top(b"CELL", &[record(b"CELL", 0x0100_0003, b"Skipped\0", false)]));
        bytes.extend(top(b"GMST", &[record(b"GMST", 0x0100_0004, b"", false)]));

        let registry = sample_registry().unwrap();
        let mut ins = ModReader::from_bytes("Details.esp", bytes);
        let details = ModDetails::read_from(&registry, &mut ins, &mut NullProgress).unwrap();

        assert_eq!(details.groups.len(), 1);
        assert!(details.group(Signature::TES4).is_none());
        assert!(details.group(Signature::CELL).is_none());
        let gmst = details.group(Signature::new(b"GMST")).unwrap();
        let entries: Vec<(u32, &str)> = gmst.records.iter().map(|e| (e.fid.0, e.eid.as_str())).collect();
        assert_eq!(
            entries,
            vec![(0x0100_0001, "fFirst"), (0x0100_0002, "sCafé\nLine"), (0x0100_0004, "")]
        );
    }

    #[test]
    fn test_mis_sized_compressed_record() {
        let mut rec = record(b"GMST", 0x0100_0001, b"fBroken\0", true);
        // 篡改声明的解压后长度
        rec[24] = rec[24].wrapping_add(1);
        let bytes = top(b"GMST", &[rec]);
        let registry = sample_registry().unwrap();
        let mut ins = ModReader::from_bytes("Details.esp", bytes);
        let err = ModDetails::read_from(&registry, &mut ins, &mut NullProgress).unwrap_err();
        assert!(err.to_string().contains("Mis-sized compressed data"), "{}", err);
    }
}
