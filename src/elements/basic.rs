//! 标量类元素：原始数据、废弃数据、数值、位标志、FormID

use super::value::{FlagLayout, FlagSet, Value};
use crate::datatypes::{round_float, FormId};
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;

/// 定长数值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
}

impl NumKind {
    /// 结构布局字符串中的类型码
    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'b' => NumKind::I8,
            'B' => NumKind::U8,
            'h' => NumKind::I16,
            'H' => NumKind::U16,
            'i' | 'l' => NumKind::I32,
            'I' | 'L' => NumKind::U32,
            'q' => NumKind::I64,
            'Q' => NumKind::U64,
            'f' => NumKind::F32,
            _ => return None,
        })
    }

    pub fn width(&self) -> usize {
        match self {
            NumKind::I8 | NumKind::U8 => 1,
            NumKind::I16 | NumKind::U16 => 2,
            NumKind::I32 | NumKind::U32 | NumKind::F32 => 4,
            NumKind::I64 | NumKind::U64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, NumKind::F32)
    }

    /// 调用方保证 `data.len() == self.width()`
    pub fn decode(&self, data: &[u8]) -> Value {
        match self {
            NumKind::I8 => Value::Int(data[0] as i8 as i64),
            NumKind::U8 => Value::Int(data[0] as i64),
            NumKind::I16 => Value::Int(LittleEndian::read_i16(data) as i64),
            NumKind::U16 => Value::Int(LittleEndian::read_u16(data) as i64),
            NumKind::I32 => Value::Int(LittleEndian::read_i32(data) as i64),
            NumKind::U32 => Value::Int(LittleEndian::read_u32(data) as i64),
            NumKind::I64 => Value::Int(LittleEndian::read_i64(data)),
            // 超出 i64 的值按位保存，编码时原样还原
            NumKind::U64 => Value::Int(LittleEndian::read_u64(data) as i64),
            NumKind::F32 => Value::Float(round_float(LittleEndian::read_f32(data))),
        }
    }

    /// 按位读取为无符号整数（位标志用）
    pub fn decode_bits(&self, data: &[u8]) -> u64 {
        match self.width() {
            1 => data[0] as u64,
            2 => LittleEndian::read_u16(data) as u64,
            4 => LittleEndian::read_u32(data) as u64,
            _ => LittleEndian::read_u64(data),
        }
    }

    /// 写出位标志，超出宽度的位是错误
    pub fn encode_bits(&self, bits: u64) -> Result<Vec<u8>, String> {
        let width = self.width();
        if width < 8 && bits >> (width * 8) != 0 {
            return Err(format!("flags 0x{:X} do not fit in {} bytes", bits, width));
        }
        Ok(bits.to_le_bytes()[..width].to_vec())
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, String> {
        match (self, value) {
            (NumKind::F32, Value::Float(v)) => Ok(v.to_le_bytes().to_vec()),
            (NumKind::F32, Value::Int(v)) => Ok((*v as f32).to_le_bytes().to_vec()),
            (_, Value::Flags(flags)) if !self.is_float() => self.encode_bits(flags.bits()),
            (kind, Value::Int(v)) if !kind.is_float() => {
                let out_of_range = || format!("{} is out of range for {:?}", v, kind);
                Ok(match kind {
                    NumKind::I8 => i8::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
                    NumKind::U8 => u8::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
                    NumKind::I16 => i16::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
                    NumKind::U16 => u16::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
                    NumKind::I32 => i32::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
                    NumKind::U32 => u32::try_from(*v).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
                    NumKind::I64 => v.to_le_bytes().to_vec(),
                    NumKind::U64 => (*v as u64).to_le_bytes().to_vec(),
                    NumKind::F32 => return Err(out_of_range()),
                })
            }
            (kind, other) => Err(format!("cannot store a {} value as {:?}", other.kind(), kind)),
        }
    }
}

/// 原始数据：不解释，原样保存和写出
#[derive(Debug, Clone)]
pub struct MelBase {
    pub(crate) attr: String,
}

impl MelBase {
    pub fn decode(&self, data: Vec<u8>) -> Value {
        Value::Bytes(data)
    }

    pub fn encode(&self, value: &Value) -> Result<Option<Vec<u8>>, String> {
        match value {
            Value::None => Ok(None),
            Value::Bytes(data) => Ok(Some(data.clone())),
            other => Err(format!("expected raw bytes, found {}", other.kind())),
        }
    }
}

/// 数值
#[derive(Debug, Clone)]
pub struct MelNum {
    pub(crate) attr: String,
    pub(crate) kind: NumKind,
    pub(crate) default: Value,
}

impl MelNum {
    pub fn decode(&self, data: &[u8]) -> Result<Value, String> {
        if data.len() != self.kind.width() {
            return Err(format!(
                "expected {} bytes for {:?}, got {}",
                self.kind.width(),
                self.kind,
                data.len()
            ));
        }
        Ok(self.kind.decode(data))
    }

    pub fn encode(&self, value: &Value) -> Result<Option<Vec<u8>>, String> {
        match value {
            Value::None => Ok(None),
            other => self.kind.encode(other).map(Some),
        }
    }
}

/// 整数位标志
#[derive(Debug, Clone)]
pub struct MelFlags {
    pub(crate) attr: String,
    pub(crate) kind: NumKind,
    pub(crate) layout: Arc<FlagLayout>,
}

impl MelFlags {
    pub fn decode(&self, data: &[u8]) -> Result<Value, String> {
        if data.len() != self.kind.width() {
            return Err(format!(
                "expected {} bytes of flags, got {}",
                self.kind.width(),
                data.len()
            ));
        }
        Ok(Value::Flags(FlagSet::new(
            self.kind.decode_bits(data),
            self.layout.clone(),
        )))
    }

    pub fn encode(&self, value: &Value) -> Result<Option<Vec<u8>>, String> {
        match value {
            Value::None => Ok(None),
            Value::Flags(flags) => self.kind.encode_bits(flags.bits()).map(Some),
            Value::Int(bits) => self.kind.encode_bits(*bits as u64).map(Some),
            other => Err(format!("expected flags, found {}", other.kind())),
        }
    }
}

/// 单个 FormID 引用
#[derive(Debug, Clone)]
pub struct MelFid {
    pub(crate) attr: String,
}

impl MelFid {
    pub fn decode(&self, data: &[u8]) -> Result<Value, String> {
        if data.len() != 4 {
            return Err(format!("expected 4 bytes for a form id, got {}", data.len()));
        }
        Ok(Value::FormId(FormId(LittleEndian::read_u32(data))))
    }

    pub fn encode(&self, value: &Value) -> Result<Option<Vec<u8>>, String> {
        match value {
            Value::None => Ok(None),
            Value::FormId(fid) => Ok(Some(fid.0.to_le_bytes().to_vec())),
            other => Err(format!("expected a form id, found {}", other.kind())),
        }
    }
}
