//! 组合元素：顺序组合、嵌套组、重复组

use super::object::MelObject;
use super::value::Value;
use super::Element;
use crate::datatypes::{FormId, Signature};
use crate::io::ModReader;
use crate::melset::MelSet;
use crate::utils::{EspError, Result};
use std::io::{Read, Seek, Write};
use std::sync::Arc;

/// 顺序组合：多个子元素共用一个位置，没有自己的属性
#[derive(Debug)]
pub struct MelSequential {
    pub(crate) elements: Vec<Arc<Element>>,
}

impl MelSequential {
    pub(crate) fn new(elements: Vec<Element>) -> Self {
        MelSequential {
            elements: elements.into_iter().map(Arc::new).collect(),
        }
    }

    pub(crate) fn load<R: Read + Seek>(
        &self,
        target: &mut MelObject,
        ins: &mut ModReader<R>,
        sig: Signature,
        size: u32,
    ) -> Result<()> {
        let child = self
            .elements
            .iter()
            .rev()
            .find(|child| child.signatures().contains(&sig))
            .ok_or_else(|| EspError::format("Unexpected subrecord").with_subrecord(sig))?;
        child.load_mel(target, ins, sig, size)
    }
}

/// 嵌套组：一个属性保存一个子对象，子元素由自己的结构定义描述
#[derive(Debug)]
pub struct MelGroup {
    pub(crate) attr: String,
    pub(crate) schema: Arc<MelSet>,
}

impl MelGroup {
    pub(crate) fn new(attr: &str, elements: Vec<Element>) -> Result<Self> {
        Ok(MelGroup {
            attr: attr.to_string(),
            schema: Arc::new(MelSet::new(elements)?),
        })
    }

    pub(crate) fn load<R: Read + Seek>(
        &self,
        target: &mut MelObject,
        ins: &mut ModReader<R>,
        sig: Signature,
        size: u32,
    ) -> Result<()> {
        let slot = target.get_or_default(&self.attr)?;
        let obj = slot.as_group_mut().ok_or_else(|| {
            EspError::format(format!("Attribute '{}' does not hold a group", self.attr))
        })?;
        self.schema.load_subrecord(obj, ins, sig, size, None)
    }

    pub(crate) fn dump<W: Write + ?Sized>(&self, target: &MelObject, out: &mut W) -> Result<()> {
        // 从未读写过的组不输出
        if let Some(Value::Group(obj)) = target.get(&self.attr) {
            self.schema.dump_data(obj, out)?;
        }
        Ok(())
    }

    pub(crate) fn map_fids(
        &self,
        target: &mut MelObject,
        mapper: &mut dyn FnMut(FormId) -> FormId,
        save: bool,
    ) -> Result<()> {
        if let Some(Value::Group(obj)) = target.get_mut(&self.attr) {
            self.schema.map_fids(obj, mapper, save)?;
        }
        Ok(())
    }
}

/// 重复组：按第一个子元素的类型切分实例
///
/// 遇到第一个子元素的类型就开始新实例，其余类型追加到最近的实例。
#[derive(Debug)]
pub struct MelGroups {
    pub(crate) attr: String,
    pub(crate) schema: Arc<MelSet>,
    pub(crate) first_sigs: Vec<Signature>,
}

impl MelGroups {
    pub(crate) fn new(attr: &str, elements: Vec<Element>) -> Result<Self> {
        let first = elements.first().ok_or_else(|| {
            EspError::definition(format!("Repeating group '{}' has no elements", attr))
        })?;
        first.check_definition()?;
        let first_sigs = first.signatures();
        if first_sigs.is_empty() {
            return Err(EspError::definition(format!(
                "The first element of repeating group '{}' must consume a subrecord",
                attr
            )));
        }
        Ok(MelGroups {
            attr: attr.to_string(),
            schema: Arc::new(MelSet::new(elements)?),
            first_sigs,
        })
    }

    pub(crate) fn load<R: Read + Seek>(
        &self,
        target: &mut MelObject,
        ins: &mut ModReader<R>,
        sig: Signature,
        size: u32,
    ) -> Result<()> {
        let starts_instance = self.first_sigs.contains(&sig);
        let slot = target.get_or_default(&self.attr)?;
        let list = slot.as_groups_mut().ok_or_else(|| {
            EspError::format(format!("Attribute '{}' does not hold a group list", self.attr))
        })?;
        if starts_instance {
            list.push(MelObject::new(self.schema.clone()));
        }
        let current = list.last_mut().ok_or_else(|| {
            EspError::format(format!(
                "Subrecord {} of '{}' appeared before the start of any instance",
                sig, self.attr
            ))
        })?;
        self.schema.load_subrecord(current, ins, sig, size, None)
    }

    pub(crate) fn dump<W: Write + ?Sized>(&self, target: &MelObject, out: &mut W) -> Result<()> {
        if let Some(Value::Groups(list)) = target.get(&self.attr) {
            for obj in list {
                self.schema.dump_data(obj, out)?;
            }
        }
        Ok(())
    }

    pub(crate) fn map_fids(
        &self,
        target: &mut MelObject,
        mapper: &mut dyn FnMut(FormId) -> FormId,
        save: bool,
    ) -> Result<()> {
        if let Some(Value::Groups(list)) = target.get_mut(&self.attr) {
            for obj in list {
                self.schema.map_fids(obj, mapper, save)?;
            }
        }
        Ok(())
    }
}
