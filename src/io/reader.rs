use crate::datatypes::Signature;
use crate::header::{read_sub_header, RecHeader, RECORD_HEADER_SIZE};
use crate::utils::{EspError, Result};
use std::io::{Cursor, Read, Seek, SeekFrom};

/// 插件流读取器
///
/// 包装任意可寻址的流，记录文件名和总长度，读取越界时产生带文件名和
/// 偏移的格式错误，而不是裸的IO错误。
#[derive(Debug)]
pub struct ModReader<R> {
    name: String,
    ins: R,
    size: u64,
    localized: bool,
}

impl ModReader<Cursor<Vec<u8>>> {
    /// 从内存数据创建读取器（解压后的记录数据等）
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        ModReader {
            name: name.into(),
            ins: Cursor::new(data),
            size,
            localized: false,
        }
    }
}

impl<R: Read + Seek> ModReader<R> {
    pub fn new(name: impl Into<String>, mut ins: R) -> Result<Self> {
        let size = ins.seek(SeekFrom::End(0))?;
        ins.seek(SeekFrom::Start(0))?;
        Ok(ModReader {
            name: name.into(),
            ins,
            size,
            localized: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 流的总长度
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 本地化插件中可本地化字符串以字符串ID保存
    pub fn is_localized(&self) -> bool {
        self.localized
    }

    pub fn set_localized(&mut self, localized: bool) {
        self.localized = localized;
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.ins.stream_position()?)
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.size {
            return Err(self.error_at(
                format!("Attempted to seek past end of stream ({} > {})", pos, self.size),
                pos,
            ));
        }
        self.ins.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// 向前跳过若干字节
    pub fn skip(&mut self, count: u64) -> Result<()> {
        let pos = self.tell()?;
        self.seek(pos + count)
    }

    /// 是否已到达给定位置（或文件末尾）
    pub fn at_end(&mut self, end: u64) -> Result<bool> {
        let pos = self.tell()?;
        Ok(pos >= end.min(self.size))
    }

    /// 精确读取 `count` 字节
    pub fn read(&mut self, count: usize) -> Result<Vec<u8>> {
        let pos = self.tell()?;
        if pos + count as u64 > self.size {
            return Err(self.error_at(
                format!(
                    "Attempted to read {} bytes, only {} remaining",
                    count,
                    self.size.saturating_sub(pos)
                ),
                pos,
            ));
        }
        let mut buf = vec![0u8; count];
        self.ins.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取记录头或组头
    pub fn unpack_rec_header(&mut self) -> Result<RecHeader> {
        let pos = self.tell()?;
        if pos + RECORD_HEADER_SIZE > self.size {
            return Err(self.error_at("Insufficient data for record header", pos));
        }
        RecHeader::read(&mut self.ins).map_err(|e| self.attach(e.into_format(), pos))
    }

    /// 读取子记录头（XXXX 已被透明处理）
    pub fn unpack_sub_header(&mut self) -> Result<(Signature, u32)> {
        let pos = self.tell()?;
        read_sub_header(&mut self.ins).map_err(|e| self.attach(e.into_format(), pos))
    }

    /// 在指定偏移处构造格式错误
    pub fn error_at(&self, message: impl Into<String>, offset: u64) -> EspError {
        self.attach(EspError::format(message), offset)
    }

    fn attach(&self, err: EspError, offset: u64) -> EspError {
        err.with_file(&self.name).with_offset(offset)
    }

    pub fn into_inner(self) -> R {
        self.ins
    }
}

impl<R: Read> Read for ModReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.ins.read(buf)
    }
}
