use super::basic::NumKind;
use super::object::MelObject;
use crate::datatypes::FormId;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// 位标志的名字表，位置即位序号
#[derive(Debug, PartialEq, Eq)]
pub struct FlagLayout {
    names: Vec<String>,
}

impl FlagLayout {
    pub fn new(names: &[&str]) -> Self {
        FlagLayout {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn bit_of(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .position(|n| n == name)
            .filter(|&p| p < 64)
            .map(|p| p as u32)
    }

    /// 名字数不超过该整数类型的位数
    pub fn fits(&self, kind: NumKind) -> bool {
        !kind.is_float() && self.names.len() <= kind.width() * 8
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// 按名字访问的位标志值
///
/// 比较只看位，名字表只用于访问和显示；未命名的位原样保留。
#[derive(Clone)]
pub struct FlagSet {
    bits: u64,
    layout: Arc<FlagLayout>,
}

impl FlagSet {
    pub fn new(bits: u64, layout: Arc<FlagLayout>) -> Self {
        FlagSet { bits, layout }
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// 未知名字视为未设置
    pub fn get(&self, name: &str) -> bool {
        self.layout
            .bit_of(name)
            .map(|bit| self.bits & (1 << bit) != 0)
            .unwrap_or(false)
    }

    /// 设置命名位，未知名字返回 false
    pub fn set(&mut self, name: &str, on: bool) -> bool {
        match self.layout.bit_of(name) {
            Some(bit) => {
                if on {
                    self.bits |= 1 << bit;
                } else {
                    self.bits &= !(1 << bit);
                }
                true
            }
            None => false,
        }
    }

    /// 已设置的命名位
    pub fn active(&self) -> Vec<&str> {
        self.layout
            .names()
            .iter()
            .enumerate()
            .take(64)
            .filter(|(bit, _)| self.bits & (1 << bit) != 0)
            .map(|(_, name)| name.as_str())
            .collect()
    }
}

impl PartialEq for FlagSet {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl fmt::Debug for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlagSet(0x{:X} {:?})", self.bits, self.active())
    }
}

/// 属性值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// 未设置（编码时省略对应子记录）
    #[default]
    None,
    Bytes(Vec<u8>),
    Int(i64),
    Float(f32),
    Flags(FlagSet),
    FormId(FormId),
    Str(String),
    Strings(Vec<String>),
    /// 嵌套组
    Group(MelObject),
    /// 重复组实例
    Groups(Vec<MelObject>),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Flags(flags) => Some(flags.bits() as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_fid(&self) -> Option<FormId> {
        match self {
            Value::FormId(fid) => Some(*fid),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_flags(&self) -> Option<&FlagSet> {
        match self {
            Value::Flags(flags) => Some(flags),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Value::Strings(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&MelObject> {
        match self {
            Value::Group(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut MelObject> {
        match self {
            Value::Group(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_groups(&self) -> Option<&[MelObject]> {
        match self {
            Value::Groups(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_groups_mut(&mut self) -> Option<&mut Vec<MelObject>> {
        match self {
            Value::Groups(list) => Some(list),
            _ => None,
        }
    }

    /// 类型名（错误信息用）
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bytes(_) => "bytes",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Flags(_) => "flags",
            Value::FormId(_) => "form id",
            Value::Str(_) => "string",
            Value::Strings(_) => "string list",
            Value::Group(_) => "group",
            Value::Groups(_) => "group list",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<FormId> for Value {
    fn from(v: FormId) -> Self {
        Value::FormId(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_none(),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
                serializer.serialize_str(&hex)
            }
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f32(*v),
            Value::Flags(flags) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("bits", &flags.bits())?;
                map.serialize_entry("set", &flags.active())?;
                map.end()
            }
            Value::FormId(fid) => fid.serialize(serializer),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Strings(list) => list.serialize(serializer),
            Value::Group(obj) => obj.serialize(serializer),
            Value::Groups(list) => list.serialize(serializer),
        }
    }
}
