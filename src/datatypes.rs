use crate::utils::{EspError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use encoding_rs::Encoding;
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{Read, Write};

// 基础整数类型读取函数
pub fn read_u16<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<u16> {
    reader.read_u16::<LittleEndian>()
}

pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<u32> {
    reader.read_u32::<LittleEndian>()
}

pub fn read_i32<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<i32> {
    reader.read_i32::<LittleEndian>()
}

// 基础整数类型写入函数
pub fn write_u16<W: Write + ?Sized>(writer: &mut W, value: u16) -> std::io::Result<()> {
    writer.write_u16::<LittleEndian>(value)
}

pub fn write_u32<W: Write + ?Sized>(writer: &mut W, value: u32) -> std::io::Result<()> {
    writer.write_u32::<LittleEndian>(value)
}

/// 4字节记录/子记录类型标识
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; 4]);

impl Signature {
    pub const GRUP: Signature = Signature(*b"GRUP");
    pub const XXXX: Signature = Signature(*b"XXXX");
    pub const TES4: Signature = Signature(*b"TES4");
    pub const CELL: Signature = Signature(*b"CELL");
    pub const WRLD: Signature = Signature(*b"WRLD");
    pub const DIAL: Signature = Signature(*b"DIAL");
    pub const EDID: Signature = Signature(*b"EDID");
    pub const MAST: Signature = Signature(*b"MAST");
    pub const XCLL: Signature = Signature(*b"XCLL");
    pub const XCLC: Signature = Signature(*b"XCLC");

    pub const fn new(bytes: &[u8; 4]) -> Self {
        Signature(*bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = EspError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 4] = bytes.try_into().map_err(|_| {
            EspError::definition(format!(
                "Invalid signature '{}': signatures must be 4 bytes in length",
                String::from_utf8_lossy(bytes)
            ))
        })?;
        Ok(Signature(array))
    }
}

impl TryFrom<&str> for Signature {
    type Error = EspError;

    fn try_from(text: &str) -> Result<Self> {
        Signature::try_from(text.as_bytes())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// 记录标识（FormID）
///
/// 高8位是主文件索引，低24位是对象索引。0 为空引用。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FormId(pub u32);

impl FormId {
    pub const NULL: FormId = FormId(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn mod_index(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn object_index(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        FormId(u32::from_le_bytes(bytes))
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl fmt::Debug for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormId({:08X})", self.0)
    }
}

impl Serialize for FormId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// 浮点数规范化：保留6位小数，消除二进制噪声
///
/// 只在解码时应用，编码时原样写出。
pub fn round_float(value: f32) -> f32 {
    if !value.is_finite() {
        return value;
    }
    ((value as f64 * 1_000_000.0).round() / 1_000_000.0) as f32
}

// 支持的编码（按尝试顺序）
const SUPPORTED_ENCODINGS: &[&str] = &["utf-8", "windows-1252", "windows-1250", "windows-1251"];

/// 插件字符串的默认编码
pub const PLUGIN_ENCODING: &Encoding = encoding_rs::WINDOWS_1252;

#[derive(Debug, Clone)]
pub struct RawString {
    pub content: String,
    pub encoding: String,
}

impl RawString {
    /// 尝试多种编码解码
    pub fn decode(data: &[u8]) -> Self {
        for encoding_name in SUPPORTED_ENCODINGS {
            if let Some(encoding) = Encoding::for_label(encoding_name.as_bytes()) {
                let (decoded, _, had_errors) = encoding.decode(data);
                if !had_errors {
                    return RawString {
                        content: decoded.into_owned(),
                        encoding: encoding_name.to_string(),
                    };
                }
            }
        }

        // 回退到UTF-8，忽略错误
        RawString {
            content: String::from_utf8_lossy(data).into_owned(),
            encoding: "utf-8".to_string(),
        }
    }

    /// 使用指定编码解码，未指定时自动检测
    pub fn decode_with(data: &[u8], encoding: Option<&'static Encoding>) -> Self {
        match encoding {
            Some(encoding) => {
                let (decoded, _) = encoding.decode_without_bom_handling(data);
                RawString {
                    content: decoded.into_owned(),
                    encoding: encoding.name().to_string(),
                }
            }
            None => Self::decode(data),
        }
    }

    /// Z字符串解析(以null结尾)
    pub fn parse_zstring(data: &[u8]) -> Self {
        Self::decode(cstrip(data))
    }

    /// 编码字符串，首选编码无法表示时回退到UTF-8
    pub fn encode(text: &str, encoding: Option<&'static Encoding>) -> Vec<u8> {
        let encoding = encoding.unwrap_or(PLUGIN_ENCODING);
        let (encoded, _, had_errors) = encoding.encode(text);
        if had_errors {
            text.as_bytes().to_vec()
        } else {
            encoded.into_owned()
        }
    }

    /// 按长度限制编码字符串（不含结尾的null）
    ///
    /// `max_size` 与 `min_size` 都包含结尾的null：超长时按字符截断到
    /// `max_size - 1` 字节，过短时用null补足到 `min_size - 1` 字节。
    pub fn encode_complex(
        text: &str,
        max_size: usize,
        min_size: usize,
        encoding: Option<&'static Encoding>,
    ) -> Vec<u8> {
        let mut bytes = if max_size > 0 {
            let text = text.trim_end();
            let limit = max_size - 1;
            let mut encoded = Self::encode(text, encoding);
            let mut chars: Vec<char> = text.chars().collect();
            while encoded.len() > limit && !chars.is_empty() {
                chars.pop();
                let truncated: String = chars.iter().collect();
                encoded = Self::encode(&truncated, encoding);
            }
            encoded
        } else {
            Self::encode(text, encoding)
        };
        if min_size > 0 && bytes.len() < min_size - 1 {
            bytes.resize(min_size - 1, 0);
        }
        bytes
    }
}

/// 截断到第一个null
pub fn cstrip(data: &[u8]) -> &[u8] {
    let null_pos = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    &data[..null_pos]
}

// 记录标志位定义（flags1）
//
// 同一位在不同记录类型上含义不同，这里取最常用的名字。
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecordFlags: u32 {
        const MASTER_FILE = 0x00000001;            // ESM标志
        const NOT_PLAYABLE = 0x00000004;           // ARMO: 不可玩
        const FORM_INITIALIZED = 0x00000010;       // 运行时
        const DELETED = 0x00000020;                // 已删除
        const BORDER_REGION = 0x00000040;          // REGN: 边界区域 / REFR: 不显示在地图
        const LOCALIZED = 0x00000080;              // TES4: 本地化
        const INACCESSIBLE = 0x00000100;           // REFR: 不可进入
        const LIGHT_MASTER = 0x00000200;           // TES4: ESL标志
        const PERSISTENT = 0x00000400;             // 持久化
        const INITIALLY_DISABLED = 0x00000800;     // 初始禁用
        const IGNORED = 0x00001000;                // 忽略
        const NO_VOICE_FILTER = 0x00002000;
        const CANNOT_SAVE = 0x00004000;
        const VISIBLE_DISTANT = 0x00008000;        // 远距离可见
        const RANDOM_ANIM_START = 0x00010000;
        const DANGEROUS = 0x00020000;
        const COMPRESSED = 0x00040000;             // 压缩
        const CANT_WAIT = 0x00080000;
        const IGNORE_OBJECT_INTERACTION = 0x00100000;
        const IS_MARKER = 0x00800000;
        const DESTRUCTIBLE = 0x01000000;
        const OBSTACLE = 0x02000000;
        const NAVMESH_FILTER = 0x04000000;
        const BOUNDING_BOX = 0x08000000;
        const NON_PIPBOY = 0x10000000;
        const REFRACTED_BY_WATER = 0x20000000;
        const NO_RESPAWN = 0x40000000;
        const MULTIBOUND = 0x80000000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_must_be_four_bytes() {
        assert!(Signature::try_from("EDID").is_ok());
        assert!(matches!(Signature::try_from("EDI"), Err(EspError::Definition(_))));
        assert!(Signature::try_from(&b"EDIDX"[..]).is_err());
        assert_eq!(Signature::new(b"CELL").to_string(), "CELL");
    }

    #[test]
    fn test_form_id_parts() {
        let fid = FormId(0x0100_0ABC);
        assert_eq!(fid.mod_index(), 1);
        assert_eq!(fid.object_index(), 0xABC);
        assert!(!fid.is_null());
        assert_eq!(fid.to_string(), "01000ABC");
        assert_eq!(serde_json::to_string(&fid).unwrap(), "\"01000ABC\"");
    }

    #[test]
    fn test_round_float() {
        assert_eq!(round_float(0.100_000_01), 0.1);
        assert_eq!(round_float(1.5), 1.5);
        assert!(round_float(f32::NAN).is_nan());
    }

    #[test]
    fn test_encode_complex_limits() {
        assert_eq!(RawString::encode_complex("abcdef", 4, 0, None), b"abc");
        assert_eq!(RawString::encode_complex("ab", 0, 5, None), b"ab\0\0");
        assert_eq!(RawString::encode_complex("Iron Sword", 0, 0, None), b"Iron Sword");
    }

    #[test]
    fn test_encode_falls_back_to_utf8() {
        let bytes = RawString::encode("铁剑", None);
        assert_eq!(bytes, "铁剑".as_bytes());
        assert_eq!(RawString::parse_zstring(b"Caf\xe9\0junk").content, "Café");
    }

    #[test]
    fn test_record_flags_keep_unknown_bits() {
        let flags = RecordFlags::from_bits_retain(0x0020_0020);
        assert!(flags.contains(RecordFlags::DELETED));
        assert_eq!(flags.bits(), 0x0020_0020);
    }
}
