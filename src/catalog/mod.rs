//! 记录类型注册表
//!
//! 把记录类型映射到编译好的结构定义，并保存扫描器需要的两张表：
//! 可作为删除候选的记录类型，以及详情扫描时整体跳过的复杂组。
//! 注册表在启动时构建一次，以引用传入各个扫描器。

pub mod common;

use crate::datatypes::Signature;
use crate::melset::MelSet;
use crate::utils::{EspError, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// 默认的删除候选记录类型（Oblivion 的 ACRE、通用的 ACHR/REFR、Skyrim 的 NAVM/PHZD/PGRE）
pub const DEFAULT_UDR_TYPES: [&[u8; 4]; 6] = [b"ACRE", b"ACHR", b"REFR", b"NAVM", b"PHZD", b"PGRE"];

/// 默认的复杂组
pub const DEFAULT_COMPLEX_GROUPS: [&[u8; 4]; 3] = [b"CELL", b"DIAL", b"WRLD"];

#[derive(Debug)]
pub struct RecordRegistry {
    schemas: HashMap<Signature, Arc<MelSet>>,
    udr_types: BTreeSet<Signature>,
    complex_groups: BTreeSet<Signature>,
}

impl RecordRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// 记录类型的结构定义，未注册的类型保持原始数据
    pub fn schema_for(&self, sig: Signature) -> Option<&Arc<MelSet>> {
        self.schemas.get(&sig)
    }

    pub fn is_udr_type(&self, sig: Signature) -> bool {
        self.udr_types.contains(&sig)
    }

    pub fn is_complex_group(&self, label: Signature) -> bool {
        self.complex_groups.contains(&label)
    }

    /// 已注册的记录类型（有序）
    pub fn record_types(&self) -> Vec<Signature> {
        let mut sigs: Vec<Signature> = self.schemas.keys().copied().collect();
        sigs.sort();
        sigs
    }
}

/// 注册表构建器
#[derive(Debug)]
pub struct RegistryBuilder {
    schemas: HashMap<Signature, Arc<MelSet>>,
    udr_types: BTreeSet<Signature>,
    complex_groups: BTreeSet<Signature>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        RegistryBuilder {
            schemas: HashMap::new(),
            udr_types: DEFAULT_UDR_TYPES.iter().map(|s| Signature::new(s)).collect(),
            complex_groups: DEFAULT_COMPLEX_GROUPS.iter().map(|s| Signature::new(s)).collect(),
        }
    }
}

impl RegistryBuilder {
    /// 注册一种记录类型
    ///
    /// `allow_duplicate_attrs` 为假时检查属性重名；新旧两种子记录共用一个
    /// 属性的记录类型需要显式允许。
    pub fn register(mut self, sig: &[u8; 4], schema: MelSet, allow_duplicate_attrs: bool) -> Result<Self> {
        let sig = Signature::new(sig);
        if !allow_duplicate_attrs {
            schema.check_duplicate_attrs(sig)?;
        }
        if self.schemas.insert(sig, Arc::new(schema)).is_some() {
            return Err(EspError::definition(format!("记录类型 {} 重复注册", sig)));
        }
        Ok(self)
    }

    /// 替换删除候选记录类型列表
    pub fn udr_types(mut self, sigs: &[&[u8; 4]]) -> Self {
        self.udr_types = sigs.iter().map(|s| Signature::new(s)).collect();
        self
    }

    /// 追加复杂组（如 Fallout 4 的 QUST）
    pub fn complex_group(mut self, label: &[u8; 4]) -> Self {
        self.complex_groups.insert(Signature::new(label));
        self
    }

    pub fn build(self) -> RecordRegistry {
        RecordRegistry {
            schemas: self.schemas,
            udr_types: self.udr_types,
            complex_groups: self.complex_groups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{Element, NumKind};

    #[test]
    fn test_default_tables() {
        let registry = RecordRegistry::builder().build();
        assert!(registry.is_udr_type(Signature::new(b"REFR")));
        assert!(registry.is_udr_type(Signature::new(b"PGRE")));
        assert!(!registry.is_udr_type(Signature::CELL));
        assert!(registry.is_complex_group(Signature::DIAL));
        assert!(!registry.is_complex_group(Signature::new(b"QUST")));

        let registry = RecordRegistry::builder()
            .udr_types(&[b"REFR"])
            .complex_group(b"QUST")
            .build();
        assert!(!registry.is_udr_type(Signature::new(b"ACHR")));
        assert!(registry.is_complex_group(Signature::new(b"QUST")));
    }

    #[test]
    fn test_duplicate_attrs_need_opt_in() {
        let shadowed = || {
            MelSet::new(vec![
                Element::read_only(Element::num(b"DNAM", "value", NumKind::U16)),
                Element::num(b"DAT2", "value", NumKind::U16),
            ])
            .unwrap()
        };
        let err = RecordRegistry::builder().register(b"TEST", shadowed(), false).unwrap_err();
        assert!(matches!(err, EspError::Definition(_)));

        let registry = RecordRegistry::builder()
            .register(b"TEST", shadowed(), true)
            .unwrap()
            .build();
        assert!(registry.schema_for(Signature::new(b"TEST")).is_some());
    }

    #[test]
    fn test_double_registration() {
        let schema = || MelSet::new(vec![Element::string(b"EDID", "eid")]).unwrap();
        let err = RecordRegistry::builder()
            .register(b"GMST", schema(), false)
            .unwrap()
            .register(b"GMST", schema(), false)
            .unwrap_err();
        assert!(matches!(err, EspError::Definition(_)));
    }
}
