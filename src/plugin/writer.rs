use super::Plugin;
use crate::group::{Group, GroupChild};
use crate::io::{DefaultPluginWriter, PluginWriter};
use crate::utils::Result;
use std::path::Path;

impl Plugin {
    /// 写入文件
    ///
    /// 先在内存中完整编码，任何记录编码失败都不会触碰目标文件；之后原子
    /// 替换目标。
    pub fn write_to_file(&mut self, path: &Path) -> Result<()> {
        self.write_with(&DefaultPluginWriter, path)
    }

    pub fn write_with(&mut self, writer: &dyn PluginWriter, path: &Path) -> Result<()> {
        let output = self.to_bytes()?;
        writer.replace(path, &output)?;
        tracing::info!("写出 {}: {} bytes", path.display(), output.len());
        Ok(())
    }

    /// 编码整个插件
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.header.dump(&mut output)?;
        for group in &mut self.groups {
            write_group(group, &mut output)?;
        }
        Ok(output)
    }
}

/// 写入组，组大小在子元素写完后回填
fn write_group(group: &mut Group, output: &mut Vec<u8>) -> Result<()> {
    let start = output.len();
    output.extend_from_slice(&group.header.pack());

    for child in &mut group.children {
        match child {
            GroupChild::Group(subgroup) => write_group(subgroup, output)?,
            GroupChild::Record(record) => record.dump(output)?,
        }
    }

    let actual_size = (output.len() - start) as u32;
    group.header.size = actual_size;
    output[start + 4..start + 8].copy_from_slice(&actual_size.to_le_bytes());
    Ok(())
}
