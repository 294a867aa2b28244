use crate::datatypes::{FormId, Signature};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 错误发生位置的上下文信息
///
/// 随着错误向外传播逐层补全：元素只知道子记录，记录知道自己的类型和
/// FormID，读取器知道文件名和偏移。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub file: Option<String>,
    pub record: Option<Signature>,
    pub form_id: Option<FormId>,
    pub subrecord: Option<Signature>,
    pub offset: Option<u64>,
}

impl ErrorContext {
    fn is_empty(&self) -> bool {
        self.file.is_none()
            && self.record.is_none()
            && self.form_id.is_none()
            && self.subrecord.is_none()
            && self.offset.is_none()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::new();
        if let Some(file) = &self.file {
            parts.push(file.clone());
        }
        match (self.record, self.subrecord) {
            (Some(rec), Some(sub)) => parts.push(format!("{}.{}", rec, sub)),
            (Some(rec), None) => parts.push(rec.to_string()),
            (None, Some(sub)) => parts.push(format!("?.{}", sub)),
            (None, None) => {}
        }
        if let Some(fid) = self.form_id {
            parts.push(fid.to_string());
        }
        if let Some(offset) = self.offset {
            parts.push(format!("@0x{:X}", offset));
        }
        write!(f, " [{}]", parts.join(" "))
    }
}

/// 自定义错误类型
#[derive(Error, Debug)]
pub enum EspError {
    /// 二进制数据不符合格式（头部损坏、大小不匹配、未知子记录等）
    #[error("Format error{context}: {message}")]
    Format {
        message: String,
        context: ErrorContext,
    },

    /// 记录定义自相矛盾，在任何文件IO之前发现
    #[error("Definition error: {0}")]
    Definition(String),

    /// 错误的调用顺序或状态
    #[error("State error: {0}")]
    State(String),

    /// 进度回调请求取消
    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EspError>;

impl EspError {
    /// 创建不带上下文的格式错误
    pub fn format(message: impl Into<String>) -> Self {
        EspError::Format {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn definition(message: impl Into<String>) -> Self {
        EspError::Definition(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EspError::Cancelled)
    }

    /// 把IO错误转换为格式错误，其余错误原样返回
    ///
    /// 记录内部读到流末尾属于数据损坏，而不是IO故障。
    pub fn into_format(self) -> Self {
        match self {
            EspError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                EspError::format(format!("unexpected end of data: {}", e))
            }
            other => other,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            EspError::Format { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn with_file(mut self, file: &str) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.file.get_or_insert_with(|| file.to_string());
        }
        self
    }

    pub fn with_record(mut self, record: Signature, form_id: FormId) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.record.get_or_insert(record);
            ctx.form_id.get_or_insert(form_id);
        }
        self
    }

    pub fn with_subrecord(mut self, subrecord: Signature) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.subrecord.get_or_insert(subrecord);
        }
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.offset.get_or_insert(offset);
        }
        self
    }
}

/// 创建文件备份
pub fn create_backup(file_path: &Path) -> Result<PathBuf> {
    if !file_path.exists() {
        return Err(EspError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "原文件不存在",
        )));
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
    let extension = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("esp");
    let backup_path = file_path.with_extension(format!("{}.{}.bak", extension, timestamp));

    std::fs::copy(file_path, &backup_path)?;

    Ok(backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_filled_once() {
        let err = EspError::format("Unexpected subrecord")
            .with_subrecord(Signature::new(b"XXYY"))
            .with_record(Signature::new(b"REFR"), FormId(0x0100_0ABC))
            .with_file("Test.esp")
            .with_file("Other.esp")
            .with_offset(0x40);

        let msg = err.to_string();
        assert!(msg.contains("Test.esp"), "{}", msg);
        assert!(!msg.contains("Other.esp"));
        assert!(msg.contains("REFR.XXYY"));
        assert!(msg.contains("01000ABC"));
        assert!(msg.contains("@0x40"));
    }

    #[test]
    fn test_context_ignored_for_other_kinds() {
        let err = EspError::Cancelled.with_file("Test.esp");
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_eof_becomes_format_error() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err = EspError::from(io).into_format();
        assert!(matches!(err, EspError::Format { .. }));
    }

    #[test]
    fn test_create_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Fog.esp");
        std::fs::write(&file, b"TES4").unwrap();

        let backup = create_backup(&file).unwrap();
        assert!(backup.exists());
        assert_eq!(std::fs::read(backup).unwrap(), b"TES4");

        assert!(create_backup(&dir.path().join("missing.esp")).is_err());
    }
}
