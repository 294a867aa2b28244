pub mod catalog;
pub mod cleaner;
pub mod datatypes;
pub mod details;
pub mod distributor;
pub mod elements;
pub mod fog;
pub mod group;
pub mod header;
pub mod io;
pub mod melset;
pub mod plugin;
pub mod progress;
pub mod record;
pub mod subrecord;
pub mod utils;

// 重新导出主要结构
pub use catalog::RecordRegistry;
pub use cleaner::{CleanFlags, FileScanReport, ModCleaner, ScanResult, UdrInfo};
pub use datatypes::{FormId, RecordFlags, Signature};
pub use details::ModDetails;
pub use elements::{Element, MelObject, Value};
pub use fog::{FogFixOptions, FogFixReport, FogFixer};
pub use group::Group;
pub use melset::MelSet;
pub use plugin::Plugin;
pub use progress::{NullProgress, Progress};
pub use record::Record;
pub use subrecord::Subrecord;
pub use utils::{EspError, Result};

// 常量定义
pub const SUPPORTED_EXTENSIONS: &[&str] = &["esp", "esm", "esl"];
