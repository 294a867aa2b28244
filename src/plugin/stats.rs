use super::Plugin;
use crate::group::{Group, GroupChild};
use serde::Serialize;

/// 插件统计信息
#[derive(Debug, Clone, Serialize)]
pub struct PluginStats {
    pub name: String,
    pub plugin_type: String,
    pub is_master: bool,
    pub is_localized: bool,
    pub is_light: bool,
    pub master_count: usize,
    pub group_count: usize,
    /// 含插件头
    pub record_count: usize,
}

impl std::fmt::Display for PluginStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== 插件统计信息 ===")?;
        writeln!(f, "名称: {}", self.name)?;
        writeln!(f, "类型: {}", self.plugin_type)?;
        writeln!(f, "主文件: {}", if self.is_master { "是" } else { "否" })?;
        writeln!(f, "本地化: {}", if self.is_localized { "是" } else { "否" })?;
        writeln!(f, "轻量: {}", if self.is_light { "是" } else { "否" })?;
        writeln!(f, "依赖主文件数: {}", self.master_count)?;
        writeln!(f, "组数量: {}", self.group_count)?;
        writeln!(f, "记录数量: {}", self.record_count)?;
        Ok(())
    }
}

impl Plugin {
    /// 获取统计信息
    pub fn stats(&self) -> PluginStats {
        PluginStats {
            name: self.name(),
            plugin_type: self.plugin_type().to_string(),
            is_master: self.is_master(),
            is_localized: self.is_localized(),
            is_light: self.is_light(),
            master_count: self.masters.len(),
            group_count: self.groups.iter().map(count_groups).sum(),
            record_count: 1 + self.groups.iter().map(count_records).sum::<usize>(),
        }
    }
}

fn count_records(group: &Group) -> usize {
    group
        .children
        .iter()
        .map(|child| match child {
            GroupChild::Group(subgroup) => count_records(subgroup),
            GroupChild::Record(_) => 1,
        })
        .sum()
}

/// 组本身加上所有子组
fn count_groups(group: &Group) -> usize {
    1 + group
        .children
        .iter()
        .map(|child| match child {
            GroupChild::Group(subgroup) => count_groups(subgroup),
            GroupChild::Record(_) => 0,
        })
        .sum::<usize>()
}
