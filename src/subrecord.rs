use crate::datatypes::Signature;
use crate::header::{read_sub_header, write_subrecord, SUB_HEADER_SIZE};
use crate::utils::{EspError, Result};
use std::io::{Cursor, Read, Write};

/// 子记录结构（未解码的原始数据）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subrecord {
    /// 子记录类型
    pub signature: Signature,
    /// 原始数据（不含头部）
    pub data: Vec<u8>,
}

impl Subrecord {
    pub fn new(signature: Signature, data: Vec<u8>) -> Self {
        Subrecord { signature, data }
    }

    /// 解析子记录，XXXX 扩展大小在这里被透明处理
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let total = cursor.get_ref().len() as u64;
        if cursor.position() + SUB_HEADER_SIZE > total {
            return Err(EspError::format("Insufficient data for subrecord header"));
        }

        let (signature, size) = read_sub_header(cursor).map_err(EspError::into_format)?;

        if cursor.position() + size as u64 > total {
            return Err(EspError::format(format!(
                "Insufficient data for subrecord data: expected {} bytes",
                size
            ))
            .with_subrecord(signature));
        }

        let mut data = vec![0u8; size as usize];
        cursor.read_exact(&mut data)?;

        Ok(Subrecord { signature, data })
    }

    /// 解析一段记录数据中的全部子记录
    ///
    /// 记录末尾不足一个子记录头的 NULL 填充会被忽略。
    pub fn parse_all(data: &[u8]) -> Result<Vec<Subrecord>> {
        let mut subrecords = Vec::new();
        let mut cursor = Cursor::new(data);

        while cursor.position() < data.len() as u64 {
            let remaining = data.len() as u64 - cursor.position();

            if remaining < SUB_HEADER_SIZE {
                let remaining_bytes = &data[cursor.position() as usize..];
                if remaining_bytes.iter().all(|&b| b == 0) {
                    tracing::trace!("跳过 {} 字节的 NULL 填充", remaining);
                    break;
                }
                return Err(EspError::format(format!(
                    "记录末尾有 {} 字节非 NULL 数据，无法解析为子记录: {:02X?}",
                    remaining, remaining_bytes
                ))
                .with_offset(cursor.position()));
            }

            let pos_before = cursor.position();
            let subrecord = Subrecord::parse(&mut cursor).map_err(|e| e.with_offset(pos_before))?;
            subrecords.push(subrecord);
        }

        Ok(subrecords)
    }

    /// 以 null 结尾字符串的方式解码数据
    pub fn as_zstring(&self) -> String {
        crate::datatypes::RawString::parse_zstring(&self.data).content
    }

    /// 写出头部与数据（必要时带 XXXX）
    pub fn dump<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        write_subrecord(out, self.signature, &self.data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_with_overflow() {
        let mut data = Vec::new();
        Subrecord::new(Signature::EDID, b"Cell\0".to_vec()).dump(&mut data).unwrap();
        Subrecord::new(Signature::new(b"OFST"), vec![7u8; 70000]).dump(&mut data).unwrap();

        let parsed = Subrecord::parse_all(&data).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].as_zstring(), "Cell");
        assert_eq!(parsed[1].signature, Signature::new(b"OFST"));
        assert_eq!(parsed[1].data.len(), 70000);
    }

    #[test]
    fn test_truncated_data_is_format_error() {
        let data = [b'E', b'D', b'I', b'D', 0x10, 0x00, b'x'];
        let err = Subrecord::parse_all(&data).unwrap_err();
        assert!(matches!(err, EspError::Format { .. }));
    }
}
