use super::value::Value;
use crate::melset::MelSet;
use crate::utils::{EspError, Result};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// 记录或嵌套组的属性存储
///
/// 只保存显式设置过的属性。读取从未设置的属性时，`get_or_default`
/// 按结构定义构造默认值（标量、空列表或新的嵌套组）并缓存下来。
#[derive(Debug, Clone)]
pub struct MelObject {
    schema: Arc<MelSet>,
    attrs: BTreeMap<String, Value>,
}

impl MelObject {
    pub fn new(schema: Arc<MelSet>) -> Self {
        MelObject {
            schema,
            attrs: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<MelSet> {
        &self.schema
    }

    /// 已保存的属性（不构造默认值）
    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.attrs.get(attr)
    }

    pub fn get_mut(&mut self, attr: &str) -> Option<&mut Value> {
        self.attrs.get_mut(attr)
    }

    /// 属性的当前值：已保存的值，否则是结构定义的默认值
    pub fn current(&self, attr: &str) -> Cow<'_, Value> {
        match self.attrs.get(attr) {
            Some(value) => Cow::Borrowed(value),
            None => Cow::Owned(self.schema.default_for(attr).unwrap_or_default()),
        }
    }

    pub fn value(&self, attr: &str) -> Value {
        self.current(attr).into_owned()
    }

    /// 取得属性，未设置时先存入默认值
    pub fn get_or_default(&mut self, attr: &str) -> Result<&mut Value> {
        let schema = &self.schema;
        match self.attrs.entry(attr.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let default = schema.default_for(attr).ok_or_else(|| {
                    EspError::State(format!("Unknown attribute '{}'", attr))
                })?;
                Ok(entry.insert(default))
            }
        }
    }

    pub fn set(&mut self, attr: &str, value: impl Into<Value>) {
        self.attrs.insert(attr.to_string(), value.into());
    }

    pub fn remove(&mut self, attr: &str) -> Option<Value> {
        self.attrs.remove(attr)
    }

    /// 按点分路径读取嵌套属性，如 `model.modPath`
    ///
    /// 路径上未设置的组按默认值处理，不会修改对象。
    pub fn get_path(&self, path: &str) -> Option<Value> {
        match path.split_once('.') {
            None => {
                let value = self.value(path);
                if value.is_none() && !self.schema.knows_attr(path) {
                    None
                } else {
                    Some(value)
                }
            }
            Some((head, rest)) => match self.attrs.get(head) {
                Some(Value::Group(inner)) => inner.get_path(rest),
                Some(_) => None,
                None => self.schema.dotted_default(path),
            },
        }
    }

    /// 已保存属性的个数
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attrs.iter()
    }
}

impl PartialEq for MelObject {
    /// 未设置的属性与其默认值相等
    fn eq(&self, other: &Self) -> bool {
        let mut names: BTreeSet<&str> = self.schema.attr_names().map(String::as_str).collect();
        names.extend(other.schema.attr_names().map(String::as_str));
        names.extend(self.attrs.keys().map(String::as_str));
        names.extend(other.attrs.keys().map(String::as_str));
        names
            .into_iter()
            .all(|name| self.current(name) == other.current(name))
    }
}

impl Serialize for MelObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attrs.len()))?;
        for (name, value) in &self.attrs {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
