use crate::datatypes::{FormId, RecordFlags, Signature};
use crate::elements::{MelObject, Value};
use crate::header::RecordHeader;
use crate::io::ModReader;
use crate::melset::MelSet;
use crate::subrecord::Subrecord;
use crate::utils::{EspError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::io::{Read, Seek, Write};
use std::sync::Arc;

/// 重新压缩记录时使用的 zlib 级别
const COMPRESSION_LEVEL: u32 = 6;

/// 解压整条记录的数据（4字节未压缩长度 + zlib 流）
pub fn inflate_record_data(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 4 {
        return Err(EspError::format("压缩数据太短，无法包含解压大小"));
    }
    let expected = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

    let mut decompressed = Vec::with_capacity(expected);
    ZlibDecoder::new(&data[4..])
        .read_to_end(&mut decompressed)
        .map_err(|e| EspError::format(format!("zlib 解压失败: {}", e)))?;

    if decompressed.len() != expected {
        return Err(EspError::format(format!(
            "Mis-sized compressed data. Expected {}, got {}.",
            expected,
            decompressed.len()
        )));
    }
    Ok(decompressed)
}

/// 压缩整条记录的数据，带4字节长度前缀
pub fn deflate_record_data(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;

    let mut result = Vec::with_capacity(compressed.len() + 4);
    result.extend_from_slice(&(data.len() as u32).to_le_bytes());
    result.extend_from_slice(&compressed);
    Ok(result)
}

/// 记录
///
/// 读取时只保存原始数据；首次访问属性时按结构定义整体解码。修改属性会
/// 标记为已修改，查询大小或写出时重新编码，之后修改标记清除。
/// 没有结构定义的记录（未知类型）始终保持原始数据。
#[derive(Debug, Clone)]
pub struct Record {
    header: RecordHeader,
    /// 最近一次读取或编码的数据（保持压缩状态）
    data: Option<Vec<u8>>,
    /// `data` 是否为压缩数据；与头部标志不同时说明压缩标志刚被修改
    data_compressed: bool,
    schema: Option<Arc<MelSet>>,
    attrs: Option<MelObject>,
    changed: bool,
    /// 来源文件名（错误信息用）
    in_name: String,
    /// 来源插件是否本地化（解码可本地化字符串用）
    localized: bool,
}

impl Record {
    /// 从流中读取记录数据（头部已被读取）
    pub fn load<R: Read + Seek>(
        header: RecordHeader,
        ins: &mut ModReader<R>,
        schema: Option<Arc<MelSet>>,
        do_unpack: bool,
    ) -> Result<Self> {
        let data = ins
            .read(header.size as usize)
            .map_err(|e| e.with_record(header.signature, header.form_id))?;

        let data_compressed = header.flags().contains(RecordFlags::COMPRESSED);
        let mut record = Record {
            header,
            data: Some(data),
            data_compressed,
            schema,
            attrs: None,
            changed: false,
            in_name: ins.name().to_string(),
            localized: ins.is_localized(),
        };
        if do_unpack && record.schema.is_some() {
            record.unpack()?;
        }
        Ok(record)
    }

    /// 新建记录：没有原始数据，属性全部为默认值
    pub fn create(header: RecordHeader, schema: Arc<MelSet>) -> Self {
        Record {
            header,
            data: None,
            data_compressed: false,
            attrs: Some(MelObject::new(schema.clone())),
            schema: Some(schema),
            changed: true,
            in_name: String::new(),
            localized: false,
        }
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn signature(&self) -> Signature {
        self.header.signature
    }

    pub fn form_id(&self) -> FormId {
        self.header.form_id
    }

    /// 修改 FormID 只影响头部，不需要重新编码
    pub fn set_form_id(&mut self, form_id: FormId) {
        self.header.form_id = form_id;
    }

    pub fn flags(&self) -> RecordFlags {
        self.header.flags()
    }

    /// 设置标志位；压缩标志变化时需要重新编码
    pub fn set_flags(&mut self, flags: RecordFlags) {
        if flags.contains(RecordFlags::COMPRESSED) != self.is_compressed() {
            self.changed = true;
        }
        self.header.flags1 = flags.bits();
    }

    pub fn is_deleted(&self) -> bool {
        self.flags().contains(RecordFlags::DELETED)
    }

    pub fn is_compressed(&self) -> bool {
        self.flags().contains(RecordFlags::COMPRESSED)
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    pub fn schema(&self) -> Option<&Arc<MelSet>> {
        self.schema.as_ref()
    }

    /// 是否已解码
    pub fn is_unpacked(&self) -> bool {
        self.attrs.is_some()
    }

    /// 最近一次读取或编码的数据
    pub fn raw_data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// 解压后的原始数据
    fn payload(&self) -> Result<Cow<'_, [u8]>> {
        let data = self
            .data
            .as_deref()
            .ok_or_else(|| EspError::State(format!("{} 记录没有原始数据", self.describe())))?;
        if self.data_compressed {
            inflate_record_data(data)
                .map(Cow::Owned)
                .map_err(|e| self.with_context(e))
        } else {
            Ok(Cow::Borrowed(data))
        }
    }

    /// 整体解码属性
    ///
    /// 解码要么完全成功，要么不保留任何属性。
    pub fn unpack(&mut self) -> Result<()> {
        if self.attrs.is_some() {
            return Ok(());
        }
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| EspError::State(format!("{} 记录没有结构定义，无法解码", self.describe())))?;

        let payload = self.payload()?.into_owned();
        let end = payload.len() as u64;
        let mut ins = ModReader::from_bytes(self.in_name.clone(), payload);
        ins.set_localized(self.localized);
        let attrs = MelSet::load_object(&schema, &mut ins, end).map_err(|e| self.with_context(e))?;

        tracing::trace!("解码记录 {}: {} 个属性", self.describe(), attrs.len());
        self.attrs = Some(attrs);
        Ok(())
    }

    /// 已解码的属性（不触发解码）
    pub fn decoded(&self) -> Option<&MelObject> {
        self.attrs.as_ref()
    }

    /// 属性（首次访问时解码）
    pub fn attrs(&mut self) -> Result<&MelObject> {
        self.unpack()?;
        self.attrs
            .as_ref()
            .ok_or_else(|| EspError::State("记录解码后没有属性".to_string()))
    }

    /// 可修改的属性，调用即标记为已修改
    pub fn attrs_mut(&mut self) -> Result<&mut MelObject> {
        self.unpack()?;
        self.changed = true;
        self.attrs
            .as_mut()
            .ok_or_else(|| EspError::State("记录解码后没有属性".to_string()))
    }

    /// 读取属性的当前值
    pub fn get_attr(&mut self, attr: &str) -> Result<Value> {
        Ok(self.attrs()?.value(attr))
    }

    pub fn set_attr(&mut self, attr: &str, value: impl Into<Value>) -> Result<()> {
        self.attrs_mut()?.set(attr, value);
        Ok(())
    }

    /// 当前数据大小，已修改时先重新编码
    pub fn get_size(&mut self) -> Result<u32> {
        if self.changed {
            self.encode()?;
        }
        if self.data.is_none() {
            return Err(EspError::State(format!("{} 记录没有可写出的数据", self.describe())));
        }
        Ok(self.header.size)
    }

    fn encode(&mut self) -> Result<()> {
        let mut raw = Vec::new();
        match (&self.attrs, &self.schema) {
            (Some(attrs), Some(schema)) => {
                schema.dump_data(attrs, &mut raw).map_err(|e| self.with_context(e))?;
            }
            _ => {
                // 没有解码：重新打包原始子记录
                for subrecord in Subrecord::parse_all(&self.payload()?).map_err(|e| self.with_context(e))? {
                    subrecord.dump(&mut raw)?;
                }
            }
        }

        let data = if self.is_compressed() {
            let compressed = deflate_record_data(&raw)?;
            tracing::debug!("重新压缩记录 {}: {} -> {} bytes", self.describe(), raw.len(), compressed.len());
            compressed
        } else {
            raw
        };

        self.header.size = data.len() as u32;
        self.data = Some(data);
        self.data_compressed = self.is_compressed();
        self.changed = false;
        Ok(())
    }

    /// 写出头部与数据
    ///
    /// 未修改的记录原样写出。
    pub fn dump<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<()> {
        self.get_size()?;
        let data = self
            .data
            .as_deref()
            .ok_or_else(|| EspError::State(format!("{} 记录没有可写出的数据", self.describe())))?;
        out.write_all(&self.header.pack())?;
        out.write_all(data)?;
        Ok(())
    }

    /// 对每个 FormID 引用调用一次 `mapper`
    ///
    /// `save` 为真时写回映射结果并标记为已修改。没有结构定义的记录没有可
    /// 识别的引用。
    pub fn map_fids(&mut self, mapper: &mut dyn FnMut(FormId) -> FormId, save: bool) -> Result<()> {
        let Some(schema) = self.schema.clone() else {
            return Ok(());
        };
        if !schema.has_fids() {
            return Ok(());
        }
        self.unpack()?;
        if let Some(attrs) = self.attrs.as_mut() {
            schema.map_fids(attrs, mapper, save)?;
        }
        if save {
            self.changed = true;
        }
        Ok(())
    }

    /// 记录引用的全部 FormID（按元素声明顺序）
    pub fn referenced_fids(&mut self) -> Result<Vec<FormId>> {
        let mut fids = Vec::new();
        self.map_fids(
            &mut |fid| {
                fids.push(fid);
                fid
            },
            false,
        )?;
        Ok(fids)
    }

    /// 原始数据中的子记录，可按类型过滤
    ///
    /// 不解码、不经过结构定义；记录被修改但尚未重新编码时看到的是旧数据。
    pub fn iterate_subrecords(&self, filter: Option<&[Signature]>) -> Result<Vec<Subrecord>> {
        let payload = self.payload()?;
        let subrecords = Subrecord::parse_all(&payload).map_err(|e| self.with_context(e))?;
        Ok(match filter {
            Some(sigs) => subrecords
                .into_iter()
                .filter(|sr| sigs.contains(&sr.signature))
                .collect(),
            None => subrecords,
        })
    }

    /// 第一个指定类型子记录的字符串内容
    pub fn sub_string(&self, sig: Signature) -> Result<Option<String>> {
        Ok(self
            .iterate_subrecords(Some(&[sig]))?
            .first()
            .map(Subrecord::as_zstring))
    }

    /// 编辑器ID
    pub fn editor_id(&self) -> Result<Option<String>> {
        self.sub_string(Signature::EDID)
    }

    /// 解码后的深拷贝，标记为已修改（写出时重新编码）
    pub fn type_copy(&mut self) -> Result<Record> {
        self.unpack()?;
        Ok(Record {
            header: self.header.clone(),
            data: None,
            data_compressed: false,
            schema: self.schema.clone(),
            attrs: self.attrs.clone(),
            changed: true,
            in_name: self.in_name.clone(),
            localized: self.localized,
        })
    }

    /// 用于日志的错误描述
    pub fn error_string(&self, action: &str, err: &EspError) -> String {
        let eid = self.editor_id().ok().flatten().unwrap_or_default();
        format!(
            "Error {} {} record: {} (eid = '{}') in {}: {}",
            action,
            self.header.signature,
            self.header.form_id,
            eid,
            self.in_name,
            err
        )
    }

    fn describe(&self) -> String {
        format!("{} {}", self.header.signature, self.header.form_id)
    }

    fn with_context(&self, err: EspError) -> EspError {
        let err = err.with_record(self.header.signature, self.header.form_id);
        if self.in_name.is_empty() {
            err
        } else {
            err.with_file(&self.in_name)
        }
    }
}
