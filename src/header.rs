//! 记录头、组头与子记录头的编解码

use crate::datatypes::{read_u16, read_u32, write_u16, write_u32, FormId, RecordFlags, Signature};
use crate::group::GroupHeader;
use crate::utils::{EspError, Result};
use std::io::{Read, Write};

/// 记录头与组头的固定大小
pub const RECORD_HEADER_SIZE: u64 = 24;
/// 子记录头大小（4字节类型 + 2字节大小）
pub const SUB_HEADER_SIZE: u64 = 6;
/// 子记录头能直接表示的最大数据长度
pub const MAX_SUBRECORD_SIZE: usize = 0xFFFF;

/// 普通记录头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub signature: Signature,
    /// 数据大小（不含头部）
    pub size: u32,
    pub flags1: u32,
    pub form_id: FormId,
    /// 时间戳与版本控制信息
    pub flags2: u32,
    pub form_version: u16,
    pub extra: u16,
}

impl RecordHeader {
    pub fn new(signature: Signature, form_id: FormId, flags: RecordFlags) -> Self {
        RecordHeader {
            signature,
            size: 0,
            flags1: flags.bits(),
            form_id,
            flags2: 0,
            form_version: 0,
            extra: 0,
        }
    }

    pub fn flags(&self) -> RecordFlags {
        RecordFlags::from_bits_retain(self.flags1)
    }

    pub fn pack(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[0..4].copy_from_slice(self.signature.as_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.flags1.to_le_bytes());
        out[12..16].copy_from_slice(&self.form_id.0.to_le_bytes());
        out[16..20].copy_from_slice(&self.flags2.to_le_bytes());
        out[20..22].copy_from_slice(&self.form_version.to_le_bytes());
        out[22..24].copy_from_slice(&self.extra.to_le_bytes());
        out
    }
}

/// 文件中任意位置的24字节头：记录或组
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecHeader {
    Record(RecordHeader),
    Group(GroupHeader),
}

impl RecHeader {
    /// 读取一个头
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; 24];
        reader.read_exact(&mut bytes)?;
        Self::parse(&bytes)
    }

    /// 从24字节解析头
    pub fn parse(bytes: &[u8; 24]) -> Result<Self> {
        let signature = Signature::new(&[bytes[0], bytes[1], bytes[2], bytes[3]]);
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);

        if signature == Signature::GRUP {
            let size = u32_at(4);
            if (size as u64) < RECORD_HEADER_SIZE {
                return Err(EspError::format(format!(
                    "组大小太小: {} bytes (最小应为24字节)",
                    size
                )));
            }
            Ok(RecHeader::Group(GroupHeader {
                size,
                label: [bytes[8], bytes[9], bytes[10], bytes[11]],
                group_type: (u32_at(12) as i32).into(),
                timestamp: u16_at(16),
                version_control_info: u16_at(18),
                unknown: u32_at(20),
            }))
        } else {
            Ok(RecHeader::Record(RecordHeader {
                signature,
                size: u32_at(4),
                flags1: u32_at(8),
                form_id: FormId(u32_at(12)),
                flags2: u32_at(16),
                form_version: u16_at(20),
                extra: u16_at(22),
            }))
        }
    }

    pub fn signature(&self) -> Signature {
        match self {
            RecHeader::Record(header) => header.signature,
            RecHeader::Group(_) => Signature::GRUP,
        }
    }

    /// 头部之后的数据大小
    pub fn blob_size(&self) -> u64 {
        match self {
            RecHeader::Record(header) => header.size as u64,
            RecHeader::Group(header) => header.blob_size(),
        }
    }

    pub fn pack(&self) -> [u8; 24] {
        match self {
            RecHeader::Record(header) => header.pack(),
            RecHeader::Group(header) => header.pack(),
        }
    }
}

/// 读取子记录头，透明处理 XXXX 扩展大小
///
/// 返回真实的子记录类型和数据大小。
pub fn read_sub_header<R: Read + ?Sized>(reader: &mut R) -> Result<(Signature, u32)> {
    let mut sig = [0u8; 4];
    reader.read_exact(&mut sig)?;
    let size = read_u16(reader)? as u32;
    let sig = Signature::new(&sig);
    if sig != Signature::XXXX {
        return Ok((sig, size));
    }
    if size != 4 {
        return Err(EspError::format(format!(
            "XXXX 子记录大小异常: {} (应为4)",
            size
        )));
    }
    let real_size = read_u32(reader)?;
    let mut real_sig = [0u8; 4];
    reader.read_exact(&mut real_sig)?;
    // 真实头部中的大小总是0，丢弃
    read_u16(reader)?;
    Ok((Signature::new(&real_sig), real_size))
}

/// 写出子记录头与数据，超过 0xFFFF 字节时先写 XXXX 子记录
pub fn write_subrecord<W: Write + ?Sized>(out: &mut W, sig: Signature, data: &[u8]) -> std::io::Result<()> {
    let mut stored_size = data.len();
    if stored_size > MAX_SUBRECORD_SIZE {
        out.write_all(Signature::XXXX.as_bytes())?;
        write_u16(out, 4)?;
        write_u32(out, data.len() as u32)?;
        stored_size = 0;
    }
    out.write_all(sig.as_bytes())?;
    write_u16(out, stored_size as u16)?;
    out.write_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupType;
    use std::io::Cursor;

    #[test]
    fn test_sub_header_plain() {
        let data = [b'E', b'D', b'I', b'D', 0x05, 0x00];
        let (sig, size) = read_sub_header(&mut Cursor::new(&data[..])).unwrap();
        assert_eq!(sig, Signature::EDID);
        assert_eq!(size, 5);
    }

    #[test]
    fn test_overflow_marker_round_trip() {
        let payload = vec![0xABu8; 70000];
        let mut out = Vec::new();
        write_subrecord(&mut out, Signature::new(b"OFST"), &payload).unwrap();

        // XXXX(6) + 4 + 真实头(6) + 数据
        assert_eq!(out.len(), 6 + 4 + 6 + 70000);
        assert_eq!(&out[0..4], b"XXXX");
        assert_eq!(&out[4..6], &4u16.to_le_bytes());
        assert_eq!(&out[6..10], &70000u32.to_le_bytes());
        assert_eq!(&out[10..14], b"OFST");
        assert_eq!(&out[14..16], &0u16.to_le_bytes());

        let mut cursor = Cursor::new(&out[..]);
        let (sig, size) = read_sub_header(&mut cursor).unwrap();
        assert_eq!(sig, Signature::new(b"OFST"));
        assert_eq!(size, 70000);
        assert_eq!(cursor.position(), 16);
    }

    #[test]
    fn test_exactly_max_size_has_no_marker() {
        let payload = vec![0u8; MAX_SUBRECORD_SIZE];
        let mut out = Vec::new();
        write_subrecord(&mut out, Signature::new(b"DATA"), &payload).unwrap();
        assert_eq!(&out[0..4], b"DATA");
        assert_eq!(out.len(), 6 + MAX_SUBRECORD_SIZE);
    }

    #[test]
    fn test_record_header_pack_parse() {
        let mut header = RecordHeader::new(
            Signature::new(b"REFR"),
            FormId(0x0100_0800),
            RecordFlags::DELETED | RecordFlags::PERSISTENT,
        );
        header.size = 42;
        header.form_version = 44;
        let packed = header.pack();
        match RecHeader::parse(&packed).unwrap() {
            RecHeader::Record(parsed) => assert_eq!(parsed, header),
            RecHeader::Group(_) => panic!("应该解析为记录头"),
        }
    }

    #[test]
    fn test_group_header_parse() {
        let header = GroupHeader::new(*b"CELL", GroupType::Top, 24 + 10);
        let parsed = RecHeader::parse(&header.pack()).unwrap();
        assert_eq!(parsed.signature(), Signature::GRUP);
        assert_eq!(parsed.blob_size(), 10);
        assert_eq!(parsed, RecHeader::Group(header));
    }

    #[test]
    fn test_group_too_small() {
        let mut bytes = GroupHeader::new(*b"CELL", GroupType::Top, 24).pack();
        bytes[4..8].copy_from_slice(&8u32.to_le_bytes());
        assert!(RecHeader::parse(&bytes).is_err());
    }
}
