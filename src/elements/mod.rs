//! 元素模型
//!
//! 每个元素描述一种子记录的二进制格式以及它对应的属性。元素是不可变的结构
//! 定义，同类型的所有记录共享，不保存任何记录状态。

pub mod basic;
pub mod collections;
pub mod object;
pub mod strings;
pub mod structs;
pub mod value;

pub use basic::NumKind;
pub use object::MelObject;
pub use structs::Field;
pub use value::{FlagLayout, FlagSet, Value};

use self::basic::{MelBase, MelFid, MelFlags, MelNum};
use self::collections::{MelGroup, MelGroups, MelSequential};
use self::strings::{MelLString, MelString, MelStrings};
use self::structs::{FieldAction, MelStruct};
use crate::datatypes::{FormId, Signature};
use crate::header::write_subrecord;
use crate::io::ModReader;
use crate::melset::MelSet;
use crate::utils::{EspError, Result};
use encoding_rs::Encoding;
use std::io::{Read, Seek, Write};
use std::sync::Arc;

/// 声明时的子记录类型
///
/// 声明接受任意字节串，长度在构建结构定义时检查。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigSpec(Vec<u8>);

impl SigSpec {
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        SigSpec(bytes.as_ref().to_vec())
    }

    pub fn resolve(&self) -> Result<Signature> {
        Signature::try_from(&self.0[..])
    }

    fn label(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

/// 元素
#[derive(Debug)]
pub enum Element {
    /// 原始数据
    Base(SigSpec, MelBase),
    /// 废弃数据：读取后丢弃，从不写出
    Null(SigSpec),
    Num(SigSpec, MelNum),
    Flags(SigSpec, MelFlags),
    Fid(SigSpec, MelFid),
    String(SigSpec, MelString),
    /// 可本地化字符串
    LString(SigSpec, MelLString),
    Strings(SigSpec, MelStrings),
    Struct(SigSpec, MelStruct),
    Sequential(MelSequential),
    /// 正常解码但从不写出（旧格式）
    ReadOnly(Arc<Element>),
    Group(MelGroup),
    Groups(MelGroups),
    /// 只能经由分发器到达，不进入静态分发表
    Routed(Arc<Element>),
}

impl Element {
    pub fn base(sig: impl AsRef<[u8]>, attr: &str) -> Self {
        Element::Base(SigSpec::new(sig), MelBase { attr: attr.to_string() })
    }

    pub fn null(sig: impl AsRef<[u8]>) -> Self {
        Element::Null(SigSpec::new(sig))
    }

    pub fn num(sig: impl AsRef<[u8]>, attr: &str, kind: NumKind) -> Self {
        Element::Num(
            SigSpec::new(sig),
            MelNum {
                attr: attr.to_string(),
                kind,
                default: Value::None,
            },
        )
    }

    pub fn num_with_default(sig: impl AsRef<[u8]>, attr: &str, kind: NumKind, default: impl Into<Value>) -> Self {
        Element::Num(
            SigSpec::new(sig),
            MelNum {
                attr: attr.to_string(),
                kind,
                default: default.into(),
            },
        )
    }

    pub fn flags(sig: impl AsRef<[u8]>, attr: &str, kind: NumKind, names: &[&str]) -> Self {
        Element::Flags(
            SigSpec::new(sig),
            MelFlags {
                attr: attr.to_string(),
                kind,
                layout: Arc::new(FlagLayout::new(names)),
            },
        )
    }

    pub fn fid(sig: impl AsRef<[u8]>, attr: &str) -> Self {
        Element::Fid(SigSpec::new(sig), MelFid { attr: attr.to_string() })
    }

    pub fn string(sig: impl AsRef<[u8]>, attr: &str) -> Self {
        Self::string_sized(sig, attr, 0, 0)
    }

    /// 带长度限制的字符串（字节数，含结尾 null）
    pub fn string_sized(sig: impl AsRef<[u8]>, attr: &str, max_size: usize, min_size: usize) -> Self {
        Element::String(
            SigSpec::new(sig),
            MelString {
                attr: attr.to_string(),
                max_size,
                min_size,
                encoding: None,
            },
        )
    }

    pub fn string_encoded(sig: impl AsRef<[u8]>, attr: &str, encoding: &'static Encoding) -> Self {
        Element::String(
            SigSpec::new(sig),
            MelString {
                attr: attr.to_string(),
                max_size: 0,
                min_size: 0,
                encoding: Some(encoding),
            },
        )
    }

    pub fn lstring(sig: impl AsRef<[u8]>, attr: &str) -> Self {
        Element::LString(
            SigSpec::new(sig),
            MelLString {
                string: MelString {
                    attr: attr.to_string(),
                    max_size: 0,
                    min_size: 0,
                    encoding: None,
                },
            },
        )
    }

    pub fn strings(sig: impl AsRef<[u8]>, attr: &str) -> Self {
        Element::Strings(
            SigSpec::new(sig),
            MelStrings {
                attr: attr.to_string(),
                encoding: None,
            },
        )
    }

    pub fn structure(sig: impl AsRef<[u8]>, layout: &str, fields: Vec<Field>) -> Result<Self> {
        let sig = SigSpec::new(sig);
        let st = MelStruct::build(&sig.label(), layout, fields, false)?;
        Ok(Element::Struct(sig, st))
    }

    /// 全部字段等于默认值时不写出的结构
    pub fn optional_struct(sig: impl AsRef<[u8]>, layout: &str, fields: Vec<Field>) -> Result<Self> {
        let sig = SigSpec::new(sig);
        let st = MelStruct::build(&sig.label(), layout, fields, true)?;
        Ok(Element::Struct(sig, st))
    }

    /// 定长字符串：单字段结构
    pub fn fixed_string(sig: impl AsRef<[u8]>, attr: &str, size: usize) -> Result<Self> {
        Self::structure(sig, &format!("{}s", size), vec![Field::fixed_string(attr)])
    }

    pub fn sequential(elements: Vec<Element>) -> Self {
        Element::Sequential(MelSequential::new(elements))
    }

    pub fn read_only(element: Element) -> Self {
        Element::ReadOnly(Arc::new(element))
    }

    pub fn group(attr: &str, elements: Vec<Element>) -> Result<Self> {
        Ok(Element::Group(MelGroup::new(attr, elements)?))
    }

    pub fn groups(attr: &str, elements: Vec<Element>) -> Result<Self> {
        Ok(Element::Groups(MelGroups::new(attr, elements)?))
    }

    pub fn routed(element: Element) -> Self {
        Element::Routed(Arc::new(element))
    }

    fn leaf_sig(&self) -> Option<&SigSpec> {
        match self {
            Element::Base(sig, _)
            | Element::Null(sig)
            | Element::Num(sig, _)
            | Element::Flags(sig, _)
            | Element::Fid(sig, _)
            | Element::String(sig, _)
            | Element::LString(sig, _)
            | Element::Strings(sig, _)
            | Element::Struct(sig, _) => Some(sig),
            _ => None,
        }
    }

    fn leaf_attr(&self) -> Option<&str> {
        match self {
            Element::Base(_, e) => Some(&e.attr),
            Element::Num(_, e) => Some(&e.attr),
            Element::Flags(_, e) => Some(&e.attr),
            Element::Fid(_, e) => Some(&e.attr),
            Element::String(_, e) => Some(&e.attr),
            Element::LString(_, e) => Some(&e.string.attr),
            Element::Strings(_, e) => Some(&e.attr),
            _ => None,
        }
    }

    /// 检查所有声明的子记录类型都是4字节，位标志名字数不超过数值宽度
    pub fn check_definition(&self) -> Result<()> {
        match self {
            Element::Sequential(seq) => seq.elements.iter().try_for_each(|e| e.check_definition()),
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.check_definition(),
            Element::Flags(sig, flags) if !flags.layout.fits(flags.kind) => Err(EspError::definition(format!(
                "{}: {} flag names do not fit in {:?}",
                sig.label(),
                flags.layout.names().len(),
                flags.kind
            ))),
            // 嵌套结构定义在构建时已检查
            Element::Group(_) | Element::Groups(_) => Ok(()),
            leaf => match leaf.leaf_sig() {
                Some(sig) => sig.resolve().map(|_| ()),
                None => Ok(()),
            },
        }
    }

    /// 该元素能消费的全部子记录类型
    pub fn signatures(&self) -> Vec<Signature> {
        match self {
            Element::Sequential(seq) => seq.elements.iter().flat_map(|e| e.signatures()).collect(),
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.signatures(),
            Element::Group(group) => group.schema.signatures().collect(),
            Element::Groups(groups) => groups.schema.signatures().collect(),
            leaf => leaf.leaf_sig().and_then(|sig| sig.resolve().ok()).into_iter().collect(),
        }
    }

    /// 该元素填充的属性名
    pub fn attrs_used(&self) -> Vec<String> {
        match self {
            Element::Null(_) => Vec::new(),
            Element::Struct(_, st) => st.attrs().map(str::to_string).collect(),
            Element::Sequential(seq) => seq.elements.iter().flat_map(|e| e.attrs_used()).collect(),
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.attrs_used(),
            Element::Group(group) => vec![group.attr.clone()],
            Element::Groups(groups) => vec![groups.attr.clone()],
            leaf => leaf.leaf_attr().map(str::to_string).into_iter().collect(),
        }
    }

    /// 属性默认值
    pub(crate) fn defaulters(&self, out: &mut Vec<(String, Value)>) {
        match self {
            Element::Null(_) => {}
            Element::Num(_, num) => out.push((num.attr.clone(), num.default.clone())),
            Element::Strings(_, strings) => out.push((strings.attr.clone(), Value::Strings(Vec::new()))),
            Element::Struct(_, st) => {
                out.extend(st.fields.iter().map(|f| (f.attr.clone(), f.default.clone())))
            }
            Element::Sequential(seq) => seq.elements.iter().for_each(|e| e.defaulters(out)),
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.defaulters(out),
            Element::Group(group) => out.push((
                group.attr.clone(),
                Value::Group(MelObject::new(group.schema.clone())),
            )),
            Element::Groups(groups) => out.push((groups.attr.clone(), Value::Groups(Vec::new()))),
            leaf => {
                if let Some(attr) = leaf.leaf_attr() {
                    out.push((attr.to_string(), Value::None));
                }
            }
        }
    }

    /// 列表类属性
    pub(crate) fn listers(&self, out: &mut Vec<String>) {
        match self {
            Element::Strings(_, strings) => out.push(strings.attr.clone()),
            Element::Groups(groups) => out.push(groups.attr.clone()),
            Element::Sequential(seq) => seq.elements.iter().for_each(|e| e.listers(out)),
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.listers(out),
            _ => {}
        }
    }

    /// 嵌套结构定义（属性名 → 结构）
    pub(crate) fn providers(&self, out: &mut Vec<(String, Arc<MelSet>)>) {
        match self {
            Element::Group(group) => out.push((group.attr.clone(), group.schema.clone())),
            Element::Groups(groups) => out.push((groups.attr.clone(), groups.schema.clone())),
            Element::Sequential(seq) => seq.elements.iter().for_each(|e| e.providers(out)),
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.providers(out),
            _ => {}
        }
    }

    /// 是否包含 FormID 引用
    pub fn has_fids(&self) -> bool {
        match self {
            Element::Fid(..) => true,
            Element::Struct(_, st) => st
                .fields
                .iter()
                .any(|f| matches!(f.action, FieldAction::Fid)),
            Element::Sequential(seq) => seq.elements.iter().any(|e| e.has_fids()),
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.has_fids(),
            Element::Group(group) => group.schema.has_fids(),
            Element::Groups(groups) => groups.schema.has_fids(),
            _ => false,
        }
    }

    /// 固定的数据大小（已知时）
    pub fn static_size(&self) -> Option<usize> {
        match self {
            Element::Num(_, num) => Some(num.kind.width()),
            Element::Flags(_, flags) => Some(flags.kind.width()),
            Element::Fid(..) => Some(4),
            Element::Struct(_, st) => Some(st.size()),
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.static_size(),
            _ => None,
        }
    }

    /// 从流中读取恰好 `size` 字节并写入目标对象
    pub fn load_mel<R: Read + Seek>(
        &self,
        target: &mut MelObject,
        ins: &mut ModReader<R>,
        sig: Signature,
        size: u32,
    ) -> Result<()> {
        let decode_err = |message: String| EspError::format(message).with_subrecord(sig);
        match self {
            Element::Null(_) => ins.skip(size as u64),
            Element::Sequential(seq) => seq.load(target, ins, sig, size),
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.load_mel(target, ins, sig, size),
            Element::Group(group) => group.load(target, ins, sig, size),
            Element::Groups(groups) => groups.load(target, ins, sig, size),
            Element::Struct(_, st) => {
                let data = ins.read(size as usize)?;
                for (attr, value) in st.unpack(&data).map_err(decode_err)? {
                    target.set(&attr, value);
                }
                Ok(())
            }
            Element::Base(_, base) => {
                let data = ins.read(size as usize)?;
                target.set(&base.attr, base.decode(data));
                Ok(())
            }
            Element::Num(_, num) => {
                let data = ins.read(size as usize)?;
                target.set(&num.attr, num.decode(&data).map_err(decode_err)?);
                Ok(())
            }
            Element::Flags(_, flags) => {
                let data = ins.read(size as usize)?;
                target.set(&flags.attr, flags.decode(&data).map_err(decode_err)?);
                Ok(())
            }
            Element::Fid(_, fid) => {
                let data = ins.read(size as usize)?;
                target.set(&fid.attr, fid.decode(&data).map_err(decode_err)?);
                Ok(())
            }
            Element::String(_, string) => {
                let data = ins.read(size as usize)?;
                target.set(&string.attr, string.decode(&data));
                Ok(())
            }
            Element::LString(_, lstring) => {
                let data = ins.read(size as usize)?;
                let value = lstring.decode(&data, ins.is_localized()).map_err(decode_err)?;
                target.set(&lstring.string.attr, value);
                Ok(())
            }
            Element::Strings(_, strings) => {
                let data = ins.read(size as usize)?;
                target.set(&strings.attr, strings.decode(&data));
                Ok(())
            }
        }
    }

    /// 计算子记录数据；`None` 表示不写出该子记录
    ///
    /// 组合元素没有单独的数据，总是返回 `None`，由 `dump_data` 处理。
    pub fn pack_subrecord_data(&self, target: &MelObject) -> Result<Option<Vec<u8>>> {
        let packed = match self {
            Element::Struct(sig, st) => {
                let values: Vec<Value> = st.fields.iter().map(|f| target.value(&f.attr)).collect();
                return st.pack(&values).map_err(|(attr, e)| pack_error(sig, &attr, e));
            }
            Element::Base(_, base) => base.encode(&target.current(&base.attr)),
            Element::Num(_, num) => num.encode(&target.current(&num.attr)),
            Element::Flags(_, flags) => flags.encode(&target.current(&flags.attr)),
            Element::Fid(_, fid) => fid.encode(&target.current(&fid.attr)),
            Element::String(_, string) => string.encode(&target.current(&string.attr)),
            Element::LString(_, lstring) => lstring.encode(&target.current(&lstring.string.attr)),
            Element::Strings(_, strings) => strings.encode(&target.current(&strings.attr)),
            _ => return Ok(None),
        };
        match (packed, self.leaf_sig(), self.leaf_attr()) {
            (Ok(data), _, _) => Ok(data),
            (Err(e), Some(sig), Some(attr)) => Err(pack_error(sig, attr, e)),
            (Err(e), _, _) => Err(EspError::format(e)),
        }
    }

    /// 写出子记录头与数据
    pub fn dump_data<W: Write + ?Sized>(&self, target: &MelObject, out: &mut W) -> Result<()> {
        match self {
            Element::Null(_) | Element::ReadOnly(_) => Ok(()),
            Element::Sequential(seq) => {
                for child in &seq.elements {
                    child.dump_data(target, out)?;
                }
                Ok(())
            }
            Element::Routed(inner) => inner.dump_data(target, out),
            Element::Group(group) => group.dump(target, out),
            Element::Groups(groups) => groups.dump(target, out),
            leaf => {
                if let (Some(data), Some(sig)) = (leaf.pack_subrecord_data(target)?, leaf.leaf_sig()) {
                    write_subrecord(out, sig.resolve()?, &data)?;
                }
                Ok(())
            }
        }
    }

    /// 对每个 FormID 调用一次 `mapper`，`save` 时写回结果
    pub fn map_fids(
        &self,
        target: &mut MelObject,
        mapper: &mut dyn FnMut(FormId) -> FormId,
        save: bool,
    ) -> Result<()> {
        match self {
            Element::Fid(_, fid) => map_attr(target, &fid.attr, mapper, save),
            Element::Struct(_, st) => {
                for field in st.fields.iter().filter(|f| matches!(f.action, FieldAction::Fid)) {
                    map_attr(target, &field.attr, mapper, save);
                }
            }
            Element::Sequential(seq) => {
                for child in &seq.elements {
                    child.map_fids(target, mapper, save)?;
                }
            }
            Element::ReadOnly(inner) | Element::Routed(inner) => inner.map_fids(target, mapper, save)?,
            Element::Group(group) => group.map_fids(target, mapper, save)?,
            Element::Groups(groups) => groups.map_fids(target, mapper, save)?,
            _ => {}
        }
        Ok(())
    }
}

fn map_attr(target: &mut MelObject, attr: &str, mapper: &mut dyn FnMut(FormId) -> FormId, save: bool) {
    if let Some(Value::FormId(fid)) = target.get(attr) {
        let mapped = mapper(*fid);
        if save {
            target.set(attr, Value::FormId(mapped));
        }
    }
}

fn pack_error(sig: &SigSpec, attr: &str, reason: String) -> EspError {
    let err = EspError::format(format!(
        "Cannot pack attribute '{}' of {}: {}",
        attr,
        sig.label(),
        reason
    ));
    match sig.resolve() {
        Ok(sig) => err.with_subrecord(sig),
        Err(_) => err,
    }
}

/// 收集静态分发表项：顺序组合展开为子元素，仅分发器可达的元素不登记
pub(crate) fn collect_loaders(element: &Arc<Element>, out: &mut Vec<(Signature, Arc<Element>)>) {
    match element.as_ref() {
        Element::Routed(_) => {}
        Element::Sequential(seq) => seq.elements.iter().for_each(|child| collect_loaders(child, out)),
        other => out.extend(other.signatures().into_iter().map(|sig| (sig, element.clone()))),
    }
}
