//! 结构化子记录：按布局字符串打包的多个字段
//!
//! 布局码：`b B h H i I l L q Q f`，可带重复次数，`Ns` 表示 N 字节原始数据。
//! 开头的 `=` 可有可无；一律小端、无对齐。

use super::basic::NumKind;
use super::value::{FlagLayout, FlagSet, Value};
use crate::datatypes::{cstrip, FormId, RawString};
use crate::utils::{EspError, Result};
use encoding_rs::Encoding;
use std::sync::Arc;

/// 单个字段的存储格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCode {
    Num(NumKind),
    Bytes(usize),
}

impl FieldCode {
    pub fn size(&self) -> usize {
        match self {
            FieldCode::Num(kind) => kind.width(),
            FieldCode::Bytes(n) => *n,
        }
    }
}

/// 解析布局字符串
pub fn parse_layout(layout: &str) -> Result<Vec<FieldCode>> {
    let body = layout.strip_prefix('=').unwrap_or(layout);
    let mut codes = Vec::new();
    let mut count = String::new();

    for ch in body.chars() {
        if ch.is_ascii_digit() {
            count.push(ch);
            continue;
        }
        let repeat: usize = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .map_err(|_| EspError::definition(format!("Bad repeat count in layout '{}'", layout)))?
        };
        count.clear();

        if ch == 's' {
            codes.push(FieldCode::Bytes(repeat));
            continue;
        }
        let kind = NumKind::from_code(ch).ok_or_else(|| {
            EspError::definition(format!("Unknown code '{}' in layout '{}'", ch, layout))
        })?;
        codes.extend(std::iter::repeat(FieldCode::Num(kind)).take(repeat));
    }

    if !count.is_empty() {
        return Err(EspError::definition(format!(
            "Layout '{}' ends with a repeat count",
            layout
        )));
    }
    Ok(codes)
}

/// 字段的值转换
#[derive(Debug, Clone)]
pub enum FieldAction {
    Plain,
    /// 4字节整数解释为 FormID，参与引用重映射
    Fid,
    Flags(Arc<FlagLayout>),
    /// 定长字节解释为字符串：解码到第一个 null，编码时截断/补齐
    FixedString(Option<&'static Encoding>),
}

/// 结构字段声明
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) attr: String,
    pub(crate) default: Option<Value>,
    pub(crate) action: FieldAction,
}

impl Field {
    pub fn new(attr: &str) -> Self {
        Field {
            attr: attr.to_string(),
            default: None,
            action: FieldAction::Plain,
        }
    }

    pub fn fid(attr: &str) -> Self {
        Field {
            action: FieldAction::Fid,
            ..Field::new(attr)
        }
    }

    pub fn flags(attr: &str, names: &[&str]) -> Self {
        Field {
            action: FieldAction::Flags(Arc::new(FlagLayout::new(names))),
            ..Field::new(attr)
        }
    }

    pub fn fixed_string(attr: &str) -> Self {
        Field {
            action: FieldAction::FixedString(None),
            ..Field::new(attr)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// 编译后的字段：存储格式 + 转换 + 默认值
#[derive(Debug, Clone)]
pub(crate) struct StructField {
    pub(crate) attr: String,
    pub(crate) code: FieldCode,
    pub(crate) action: FieldAction,
    pub(crate) default: Value,
}

impl StructField {
    fn compile(field: Field, code: FieldCode) -> std::result::Result<Self, String> {
        match (&field.action, code) {
            (FieldAction::Plain, _) => {}
            (FieldAction::Fid, FieldCode::Num(NumKind::I32 | NumKind::U32)) => {}
            (FieldAction::Flags(layout), FieldCode::Num(kind)) if layout.fits(kind) => {}
            (FieldAction::FixedString(_), FieldCode::Bytes(_)) => {}
            (action, code) => {
                return Err(format!("action {:?} does not apply to {:?}", action, code));
            }
        }

        let implicit = match (&field.action, code) {
            (FieldAction::Fid, _) => Value::FormId(FormId::NULL),
            (FieldAction::Flags(layout), _) => Value::Flags(FlagSet::new(0, layout.clone())),
            (FieldAction::FixedString(_), _) => Value::Str(String::new()),
            (FieldAction::Plain, FieldCode::Num(kind)) if kind.is_float() => Value::Float(0.0),
            (FieldAction::Plain, FieldCode::Num(_)) => Value::Int(0),
            (FieldAction::Plain, FieldCode::Bytes(n)) => Value::Bytes(vec![0; n]),
        };

        let mut compiled = StructField {
            attr: field.attr,
            code,
            action: field.action,
            default: implicit,
        };
        if let Some(explicit) = field.default {
            // 默认值必须能被打包
            compiled.pack(&explicit)?;
            compiled.default = match (&compiled.action, explicit) {
                (FieldAction::Flags(layout), Value::Int(bits)) => {
                    Value::Flags(FlagSet::new(bits as u64, layout.clone()))
                }
                (_, value) => value,
            };
        }
        Ok(compiled)
    }

    pub(crate) fn unpack(&self, data: &[u8]) -> Value {
        match (&self.action, self.code) {
            (FieldAction::Fid, FieldCode::Num(kind)) => Value::FormId(FormId(kind.decode_bits(data) as u32)),
            (FieldAction::Flags(layout), FieldCode::Num(kind)) => {
                Value::Flags(FlagSet::new(kind.decode_bits(data), layout.clone()))
            }
            (FieldAction::FixedString(encoding), FieldCode::Bytes(_)) => {
                Value::Str(RawString::decode_with(cstrip(data), *encoding).content)
            }
            (_, FieldCode::Num(kind)) => kind.decode(data),
            (_, FieldCode::Bytes(_)) => Value::Bytes(data.to_vec()),
        }
    }

    pub(crate) fn pack(&self, value: &Value) -> std::result::Result<Vec<u8>, String> {
        match (&self.action, self.code, value) {
            (FieldAction::Fid, _, Value::FormId(fid)) => Ok(fid.0.to_le_bytes().to_vec()),
            (FieldAction::Fid, _, other) => Err(format!("expected a form id, found {}", other.kind())),
            (FieldAction::FixedString(encoding), FieldCode::Bytes(n), Value::Str(text)) => {
                Ok(RawString::encode_complex(text, n + 1, n + 1, *encoding))
            }
            (_, FieldCode::Num(kind), value) => kind.encode(value),
            (_, FieldCode::Bytes(n), Value::Bytes(data)) if data.len() == n => Ok(data.clone()),
            (_, FieldCode::Bytes(n), Value::Bytes(data)) => {
                Err(format!("expected {} bytes, found {}", n, data.len()))
            }
            (_, FieldCode::Bytes(_), other) => Err(format!("expected bytes, found {}", other.kind())),
        }
    }
}

/// 结构化子记录
#[derive(Debug, Clone)]
pub struct MelStruct {
    pub(crate) fields: Vec<StructField>,
    pub(crate) size: usize,
    /// 所有字段都等于默认值时省略整个子记录
    pub(crate) optional: bool,
}

impl MelStruct {
    pub(crate) fn build(sig_label: &str, layout: &str, fields: Vec<Field>, optional: bool) -> Result<Self> {
        let codes = parse_layout(layout)?;
        if codes.len() != fields.len() {
            return Err(EspError::definition(format!(
                "{}: layout '{}' has {} fields but {} attributes were declared",
                sig_label,
                layout,
                codes.len(),
                fields.len()
            )));
        }
        let size = codes.iter().map(FieldCode::size).sum();
        let fields = fields
            .into_iter()
            .zip(codes)
            .map(|(field, code)| {
                let attr = field.attr.clone();
                StructField::compile(field, code).map_err(|e| {
                    EspError::definition(format!("{}: field '{}': {}", sig_label, attr, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MelStruct {
            fields,
            size,
            optional,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn attrs(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.attr.as_str())
    }

    /// 解包为 (属性, 值) 列表
    pub(crate) fn unpack(&self, data: &[u8]) -> std::result::Result<Vec<(String, Value)>, String> {
        if data.len() != self.size {
            return Err(format!("expected {} bytes, got {}", self.size, data.len()));
        }
        let mut at = 0;
        Ok(self
            .fields
            .iter()
            .map(|field| {
                let width = field.code.size();
                let value = field.unpack(&data[at..at + width]);
                at += width;
                (field.attr.clone(), value)
            })
            .collect())
    }

    /// 打包字段值；可选结构全为默认值时返回 `None`
    ///
    /// 失败时返回出错的属性名和原因。
    pub(crate) fn pack(&self, values: &[Value]) -> std::result::Result<Option<Vec<u8>>, (String, String)> {
        if self.optional
            && self
                .fields
                .iter()
                .zip(values)
                .all(|(field, value)| *value == field.default)
        {
            return Ok(None);
        }
        let mut out = Vec::with_capacity(self.size);
        for (field, value) in self.fields.iter().zip(values) {
            let bytes = field.pack(value).map_err(|e| (field.attr.clone(), e))?;
            out.extend(bytes);
        }
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layout_counts() {
        let codes = parse_layout("=12s2f2l2f").unwrap();
        assert_eq!(codes.len(), 7);
        assert_eq!(codes[0], FieldCode::Bytes(12));
        assert_eq!(codes.iter().map(FieldCode::size).sum::<usize>(), 36);
        assert!(parse_layout("3x").is_err());
        assert!(parse_layout("2f3").is_err());
    }

    #[test]
    fn test_field_count_mismatch() {
        let err = MelStruct::build("DATA", "2f", vec![Field::new("x")], false).unwrap_err();
        assert!(matches!(err, EspError::Definition(_)));
    }

    #[test]
    fn test_action_must_fit_code() {
        assert!(MelStruct::build("DATA", "f", vec![Field::fid("ref")], false).is_err());
        assert!(MelStruct::build("DATA", "4s", vec![Field::flags("f", &["a"])], false).is_err());
        assert!(MelStruct::build("DATA", "B", vec![Field::new("x").with_default(300i64)], false).is_err());
    }

    #[test]
    fn test_unpack_applies_actions() {
        let st = MelStruct::build(
            "DATA",
            "=I4sHf",
            vec![
                Field::fid("owner"),
                Field::fixed_string("tag"),
                Field::flags("flags", &["a", "b"]),
                Field::new("scale"),
            ],
            false,
        )
        .unwrap();
        let mut data = 0x0100_0ABCu32.to_le_bytes().to_vec();
        data.extend(b"ab\0\0");
        data.extend(2u16.to_le_bytes());
        data.extend(0.25f32.to_le_bytes());

        let values = st.unpack(&data).unwrap();
        assert_eq!(values[0].1, Value::FormId(FormId(0x0100_0ABC)));
        assert_eq!(values[1].1, Value::from("ab"));
        assert!(values[2].1.as_flags().unwrap().get("b"));
        assert_eq!(values[3].1, Value::Float(0.25));

        let plain: Vec<Value> = values.into_iter().map(|(_, v)| v).collect();
        assert_eq!(st.pack(&plain).unwrap(), Some(data));
        assert!(st.unpack(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_pack_reports_attribute() {
        let st = MelStruct::build("DATA", "B", vec![Field::new("level")], false).unwrap();
        let (attr, _) = st.pack(&[Value::Int(1000)]).unwrap_err();
        assert_eq!(attr, "level");
    }
}
