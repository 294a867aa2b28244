//! 字符串元素

use super::value::Value;
use crate::datatypes::{cstrip, RawString};
use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::Encoding;

/// 以 null 结尾的字符串
///
/// `max_size`/`min_size` 以字节计且包含结尾的 null，0 表示不限制。
#[derive(Debug, Clone)]
pub struct MelString {
    pub(crate) attr: String,
    pub(crate) max_size: usize,
    pub(crate) min_size: usize,
    /// 未指定时解码自动检测编码，编码使用插件默认编码
    pub(crate) encoding: Option<&'static Encoding>,
}

impl MelString {
    pub fn decode(&self, data: &[u8]) -> Value {
        Value::Str(RawString::decode_with(cstrip(data), self.encoding).content)
    }

    pub fn encode(&self, value: &Value) -> Result<Option<Vec<u8>>, String> {
        match value {
            Value::None => Ok(None),
            Value::Str(text) => {
                let mut data =
                    RawString::encode_complex(text, self.max_size, self.min_size, self.encoding);
                data.push(0);
                Ok(Some(data))
            }
            other => Err(format!("expected a string, found {}", other.kind())),
        }
    }
}

/// 可本地化字符串
///
/// 本地化插件中数据是4字节字符串ID，解码为整数；否则与 `MelString` 相同。
/// 编码按值的类型决定写出字符串ID还是字符串。
#[derive(Debug, Clone)]
pub struct MelLString {
    pub(crate) string: MelString,
}

impl MelLString {
    pub fn decode(&self, data: &[u8], localized: bool) -> Result<Value, String> {
        if !localized {
            return Ok(self.string.decode(data));
        }
        if data.len() != 4 {
            return Err(format!("expected a 4 byte string id, got {} bytes", data.len()));
        }
        Ok(Value::Int(LittleEndian::read_u32(data) as i64))
    }

    pub fn encode(&self, value: &Value) -> Result<Option<Vec<u8>>, String> {
        match value {
            Value::Int(id) => u32::try_from(*id)
                .map(|id| Some(id.to_le_bytes().to_vec()))
                .map_err(|_| format!("string id {} is out of range", id)),
            other => self.string.encode(other),
        }
    }
}

/// 多个以 null 分隔的字符串打包在一个子记录中
#[derive(Debug, Clone)]
pub struct MelStrings {
    pub(crate) attr: String,
    pub(crate) encoding: Option<&'static Encoding>,
}

impl MelStrings {
    pub fn decode(&self, data: &[u8]) -> Value {
        let body = data.strip_suffix(&[0]).unwrap_or(data);
        if body.is_empty() {
            return Value::Strings(Vec::new());
        }
        Value::Strings(
            body.split(|&b| b == 0)
                .map(|part| RawString::decode_with(part, self.encoding).content)
                .collect(),
        )
    }

    pub fn encode(&self, value: &Value) -> Result<Option<Vec<u8>>, String> {
        match value {
            Value::None => Ok(None),
            Value::Strings(list) if list.is_empty() => Ok(None),
            Value::Strings(list) => {
                let mut data = Vec::new();
                for text in list {
                    data.extend(RawString::encode(text, self.encoding));
                    data.push(0);
                }
                Ok(Some(data))
            }
            other => Err(format!("expected a string list, found {}", other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(max_size: usize, min_size: usize) -> MelString {
        MelString {
            attr: "full".into(),
            max_size,
            min_size,
            encoding: None,
        }
    }

    #[test]
    fn test_string_stops_at_null() {
        assert_eq!(string(0, 0).decode(b"Iron Sword\0\0junk"), Value::from("Iron Sword"));
    }

    #[test]
    fn test_string_size_limits() {
        assert_eq!(
            string(5, 0).encode(&Value::from("abcdefgh")).unwrap(),
            Some(b"abcd\0".to_vec())
        );
        assert_eq!(
            string(0, 4).encode(&Value::from("a")).unwrap(),
            Some(b"a\0\0\0".to_vec())
        );
        assert_eq!(string(0, 0).encode(&Value::None).unwrap(), None);
        assert!(string(0, 0).encode(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_lstring_id_or_text() {
        let full = MelLString { string: string(0, 0) };
        let id = 0x0000_0A01u32.to_le_bytes();
        assert_eq!(full.decode(&id, true).unwrap(), Value::Int(0xA01));
        assert_eq!(full.encode(&Value::Int(0xA01)).unwrap(), Some(id.to_vec()));
        // 非本地化插件中同样的字节就是字符串
        assert!(matches!(full.decode(&id, false).unwrap(), Value::Str(_)));
        assert_eq!(full.encode(&Value::from("Sword")).unwrap(), Some(b"Sword\0".to_vec()));
        assert!(full.decode(b"Sword\0", true).is_err());
        assert!(full.encode(&Value::Int(-1)).is_err());
    }

    #[test]
    fn test_strings_split_and_join() {
        let strings = MelStrings {
            attr: "masters".into(),
            encoding: Some(encoding_rs::WINDOWS_1252),
        };
        let decoded = strings.decode(b"Skyrim.esm\0Update.esm\0");
        assert_eq!(
            decoded.as_strings().unwrap(),
            &["Skyrim.esm".to_string(), "Update.esm".to_string()]
        );
        assert_eq!(
            strings.encode(&decoded).unwrap(),
            Some(b"Skyrim.esm\0Update.esm\0".to_vec())
        );
        assert_eq!(strings.encode(&Value::Strings(Vec::new())).unwrap(), None);
    }
}
