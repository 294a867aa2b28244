/// IO 抽象层 - trait 定义
///
/// 引擎不做文件发现和路径解析，只通过这些接口取得字节流。
use crate::utils::Result;
use std::io::{Read, Seek};
use std::path::Path;

/// 可读可寻址的字节流
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// 插件数据源
///
/// # 职责
/// - 按路径打开一个插件的字节流
/// - 不负责解析，仅负责 IO
pub trait PluginSource {
    /// 打开插件，返回的流在离开作用域时关闭
    fn open(&self, path: &Path) -> Result<Box<dyn ReadSeek>>;
}

/// 插件写入器
///
/// # 职责
/// - 用新的完整内容替换目标文件
/// - 替换必须是原子的：任何时候目标路径上都不会出现写了一半的文件
pub trait PluginWriter {
    fn replace(&self, path: &Path, data: &[u8]) -> Result<()>;
}
