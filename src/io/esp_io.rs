/// 插件文件 IO 实现
///
/// 提供基于文件系统的默认读写实现
use super::traits::{PluginSource, PluginWriter, ReadSeek};
use crate::utils::Result;
use memmap2::Mmap;
use std::io::{Cursor, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// 默认的插件数据源（内存映射文件）
#[derive(Debug, Clone, Default)]
pub struct DefaultPluginSource;

impl PluginSource for DefaultPluginSource {
    fn open(&self, path: &Path) -> Result<Box<dyn ReadSeek>> {
        let file = std::fs::File::open(path)?;
        // 空文件无法映射
        if file.metadata()?.len() == 0 {
            return Ok(Box::new(Cursor::new(Vec::new())));
        }
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Box::new(Cursor::new(mmap)))
    }
}

/// 默认的插件写入器：先写同目录临时文件，再替换目标
#[derive(Debug, Clone, Default)]
pub struct DefaultPluginWriter;

impl PluginWriter for DefaultPluginWriter {
    fn replace(&self, path: &Path, data: &[u8]) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(data)?;
        temp.flush()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    #[test]
    fn test_default_source_reads_and_seeks() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("source.esp");
        std::fs::write(&test_file, b"TES4\x00\x00\x00\x00").unwrap();

        let mut stream = DefaultPluginSource.open(&test_file).unwrap();
        stream.seek(SeekFrom::Start(4)).unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![0u8; 4]);
    }

    #[test]
    fn test_default_source_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("empty.esp");
        std::fs::write(&test_file, b"").unwrap();

        let mut stream = DefaultPluginSource.open(&test_file).unwrap();
        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 0);
    }

    #[test]
    fn test_writer_replaces_and_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("nested").join("out.esp");

        DefaultPluginWriter.replace(&test_file, &[1, 2, 3, 4]).unwrap();
        assert_eq!(std::fs::read(&test_file).unwrap(), vec![1, 2, 3, 4]);

        DefaultPluginWriter.replace(&test_file, &[5]).unwrap();
        assert_eq!(std::fs::read(&test_file).unwrap(), vec![5]);
        // 只留下目标文件，没有残留的临时文件
        let entries = std::fs::read_dir(test_file.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
