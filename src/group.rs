use crate::catalog::RecordRegistry;
use crate::datatypes::{FormId, Signature};
use crate::header::{RecHeader, RECORD_HEADER_SIZE};
use crate::io::ModReader;
use crate::record::Record;
use crate::utils::{EspError, Result};
use std::io::{Read, Seek};

/// 组类型
///
/// 标签的含义取决于组类型：顶级组的标签是记录类型，其余大多是父记录的 FormID。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    /// 顶级组
    Top,
    /// 世界空间子组（标签为 WRLD FormID）
    WorldChildren,
    /// 室内单元格块
    InteriorBlock,
    /// 室内单元格子块
    InteriorSubBlock,
    /// 室外单元格块
    ExteriorBlock,
    /// 室外单元格子块
    ExteriorSubBlock,
    /// 单元格子组
    CellChildren,
    /// 对话主题子组
    TopicChildren,
    /// 单元格持久子组
    CellPersistentChildren,
    /// 单元格临时子组
    CellTemporaryChildren,
    /// 单元格远景子组
    CellVisibleDistantChildren,
    /// 未知类型
    Unknown(i32),
}

impl GroupType {
    /// 转换为i32值
    pub fn to_i32(&self) -> i32 {
        match self {
            GroupType::Top => 0,
            GroupType::WorldChildren => 1,
            GroupType::InteriorBlock => 2,
            GroupType::InteriorSubBlock => 3,
            GroupType::ExteriorBlock => 4,
            GroupType::ExteriorSubBlock => 5,
            GroupType::CellChildren => 6,
            GroupType::TopicChildren => 7,
            GroupType::CellPersistentChildren => 8,
            GroupType::CellTemporaryChildren => 9,
            GroupType::CellVisibleDistantChildren => 10,
            GroupType::Unknown(value) => *value,
        }
    }

    /// 是否为某个单元格的子组（标签是该单元格的 FormID）
    pub fn is_cell_children(&self) -> bool {
        matches!(
            self,
            GroupType::CellChildren
                | GroupType::CellPersistentChildren
                | GroupType::CellTemporaryChildren
                | GroupType::CellVisibleDistantChildren
        )
    }
}

impl From<i32> for GroupType {
    fn from(value: i32) -> Self {
        match value {
            0 => GroupType::Top,
            1 => GroupType::WorldChildren,
            2 => GroupType::InteriorBlock,
            3 => GroupType::InteriorSubBlock,
            4 => GroupType::ExteriorBlock,
            5 => GroupType::ExteriorSubBlock,
            6 => GroupType::CellChildren,
            7 => GroupType::TopicChildren,
            8 => GroupType::CellPersistentChildren,
            9 => GroupType::CellTemporaryChildren,
            10 => GroupType::CellVisibleDistantChildren,
            _ => GroupType::Unknown(value),
        }
    }
}

/// 组头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHeader {
    /// 组大小(包含头部24字节)
    pub size: u32,
    /// 标签
    pub label: [u8; 4],
    /// 组类型
    pub group_type: GroupType,
    /// 时间戳
    pub timestamp: u16,
    /// 版本控制信息
    pub version_control_info: u16,
    /// 未知字段
    pub unknown: u32,
}

impl GroupHeader {
    pub fn new(label: [u8; 4], group_type: GroupType, size: u32) -> Self {
        GroupHeader {
            size,
            label,
            group_type,
            timestamp: 0,
            version_control_info: 0,
            unknown: 0,
        }
    }

    /// 头部之后的数据大小
    pub fn blob_size(&self) -> u64 {
        (self.size as u64).saturating_sub(RECORD_HEADER_SIZE)
    }

    /// 标签作为 FormID（世界空间/单元格子组）
    pub fn label_fid(&self) -> FormId {
        FormId::from_le_bytes(self.label)
    }

    /// 标签作为记录类型（顶级组）
    pub fn label_sig(&self) -> Signature {
        Signature::new(&self.label)
    }

    /// 获取组标签字符串
    pub fn label_string(&self) -> String {
        String::from_utf8_lossy(&self.label).into_owned()
    }

    pub fn pack(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[0..4].copy_from_slice(Signature::GRUP.as_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.label);
        out[12..16].copy_from_slice(&self.group_type.to_i32().to_le_bytes());
        out[16..18].copy_from_slice(&self.timestamp.to_le_bytes());
        out[18..20].copy_from_slice(&self.version_control_info.to_le_bytes());
        out[20..24].copy_from_slice(&self.unknown.to_le_bytes());
        out
    }
}

/// 组结构
#[derive(Debug)]
pub struct Group {
    pub header: GroupHeader,
    /// 子元素
    pub children: Vec<GroupChild>,
}

/// 组子元素
#[derive(Debug)]
pub enum GroupChild {
    /// 子组
    Group(Box<Group>),
    /// 记录
    Record(Record),
}

impl Group {
    pub fn new(label: [u8; 4], group_type: GroupType) -> Self {
        Group {
            header: GroupHeader::new(label, group_type, RECORD_HEADER_SIZE as u32),
            children: Vec::new(),
        }
    }

    /// 读取组内容（头部已被读取）
    ///
    /// 记录只读取原始数据，按注册表绑定结构定义，首次访问属性时再解码。
    pub fn read<R: Read + Seek>(
        header: GroupHeader,
        reader: &mut ModReader<R>,
        registry: &RecordRegistry,
    ) -> Result<Self> {
        let data_end = reader.tell()? + header.blob_size();
        if data_end > reader.size() {
            let pos = reader.tell()?;
            return Err(reader.error_at(
                format!("Insufficient data for group data: expected {} bytes", header.blob_size()),
                pos,
            ));
        }

        let mut children = Vec::new();
        while !reader.at_end(data_end)? {
            match reader.unpack_rec_header()? {
                RecHeader::Group(child) => {
                    let child_group = Group::read(child, reader, registry)?;
                    children.push(GroupChild::Group(Box::new(child_group)));
                }
                RecHeader::Record(rec_header) => {
                    let schema = registry.schema_for(rec_header.signature).cloned();
                    let record = Record::load(rec_header, reader, schema, false)?;
                    children.push(GroupChild::Record(record));
                }
            }
        }

        if reader.tell()? != data_end {
            return Err(EspError::format(format!(
                "组 {} 的子元素越过了组边界",
                header.label_string()
            )));
        }

        Ok(Group { header, children })
    }

    /// 获取所有记录
    pub fn records(&self) -> Vec<&Record> {
        let mut records = Vec::new();
        self.collect_records(&mut records);
        records
    }

    /// 递归收集所有记录
    fn collect_records<'a>(&'a self, records: &mut Vec<&'a Record>) {
        for child in &self.children {
            match child {
                GroupChild::Group(group) => group.collect_records(records),
                GroupChild::Record(record) => records.push(record),
            }
        }
    }

    /// 递归收集所有记录的可变引用
    pub fn collect_records_mut<'a>(&'a mut self, records: &mut Vec<&'a mut Record>) {
        for child in &mut self.children {
            match child {
                GroupChild::Group(group) => group.collect_records_mut(records),
                GroupChild::Record(record) => records.push(record),
            }
        }
    }
}
