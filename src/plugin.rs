//! 整个插件的内存模型
//!
//! 加载时记录只读取原始数据，按注册表绑定结构定义，首次访问属性时解码；
//! 未修改的记录写回时原样输出，因此直接重建未修改的插件与原文件逐字节相同。

mod stats;
mod writer;

pub use stats::PluginStats;

use crate::catalog::RecordRegistry;
use crate::datatypes::{FormId, RecordFlags, Signature};
use crate::group::Group;
use crate::header::RecHeader;
use crate::io::{DefaultPluginSource, ModReader, PluginSource};
use crate::record::Record;
use crate::utils::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// ESP/ESM/ESL 插件
#[derive(Debug)]
pub struct Plugin {
    /// 文件路径
    pub path: PathBuf,
    /// 头部记录（TES4）
    pub header: Record,
    /// 顶级组列表
    pub groups: Vec<Group>,
    /// 主文件列表
    pub masters: Vec<String>,
}

impl Plugin {
    /// 从文件系统加载插件
    pub fn load(path: &Path, registry: &RecordRegistry) -> Result<Self> {
        Self::load_from(&DefaultPluginSource, path, registry)
    }

    /// 通过指定数据源加载插件
    pub fn load_from(source: &dyn PluginSource, path: &Path, registry: &RecordRegistry) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut ins = ModReader::new(name, source.open(path)?)?;

        let header = match ins.unpack_rec_header()? {
            RecHeader::Record(header) if header.signature == Signature::TES4 => header,
            other => {
                return Err(ins.error_at(format!("文件开头应为 TES4 记录，实际为 {}", other.signature()), 0));
            }
        };
        ins.set_localized(header.flags().contains(RecordFlags::LOCALIZED));
        let header = Record::load(header, &mut ins, registry.schema_for(Signature::TES4).cloned(), false)?;
        let masters = header
            .iterate_subrecords(Some(&[Signature::MAST]))?
            .iter()
            .map(|sub| sub.as_zstring())
            .collect();

        let mut groups = Vec::new();
        while !ins.at_end(ins.size())? {
            let pos = ins.tell()?;
            match ins.unpack_rec_header()? {
                RecHeader::Group(group_header) => groups.push(Group::read(group_header, &mut ins, registry)?),
                RecHeader::Record(rec) => {
                    return Err(ins.error_at(format!("顶级只能是组，发现了 {} 记录", rec.signature), pos));
                }
            }
        }

        debug!("加载 {}: {} 个顶级组", path.display(), groups.len());
        Ok(Plugin {
            path: path.to_path_buf(),
            header,
            groups,
            masters,
        })
    }

    /// 获取插件名称
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn extension_is(&self, ext: &str) -> bool {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
            .unwrap_or(false)
    }

    /// 获取插件类型
    pub fn plugin_type(&self) -> &'static str {
        if self.extension_is("esm") {
            "主文件 (ESM)"
        } else if self.extension_is("esl") {
            "轻量级文件 (ESL)"
        } else if self.extension_is("esp") {
            "插件 (ESP)"
        } else {
            "未知"
        }
    }

    /// 是否为主文件（扩展名或 ESM 标志）
    pub fn is_master(&self) -> bool {
        self.extension_is("esm") || self.header.flags().contains(RecordFlags::MASTER_FILE)
    }

    /// 是否本地化
    pub fn is_localized(&self) -> bool {
        self.header.flags().contains(RecordFlags::LOCALIZED)
    }

    /// 是否为轻量插件（扩展名或 LightMaster 标志）
    pub fn is_light(&self) -> bool {
        self.extension_is("esl") || self.header.flags().contains(RecordFlags::LIGHT_MASTER)
    }

    /// 所有组中记录的可变引用（不含插件头）
    pub fn records_mut(&mut self) -> Vec<&mut Record> {
        let mut records = Vec::new();
        for group in &mut self.groups {
            group.collect_records_mut(&mut records);
        }
        records
    }

    /// 对所有记录的 FormID 引用调用 `mapper`
    ///
    /// `save` 为真时写回并把有引用的记录标记为已修改。
    pub fn remap_fids(&mut self, mapper: &mut dyn FnMut(FormId) -> FormId, save: bool) -> Result<()> {
        for record in self.records_mut() {
            record.map_fids(mapper, save)?;
        }
        Ok(())
    }
}
