/// IO 抽象层模块
///
/// 引擎只依赖可读可寻址的字节流，文件的打开和替换通过这里的 trait 注入。
///
/// - **traits**: 插件数据源/写入器接口
/// - **esp_io**: 基于文件系统的默认实现（内存映射读取、临时文件原子替换）
/// - **reader**: 带文件名和偏移上下文的流读取器
pub mod esp_io;
pub mod reader;
pub mod traits;

pub use esp_io::{DefaultPluginSource, DefaultPluginWriter};
pub use reader::ModReader;
pub use traits::{PluginSource, PluginWriter, ReadSeek};
