//! 记录结构定义（元素集合）
//!
//! 构建时一次性编译出默认值表、列表属性、按点分路径展开的嵌套结构、
//! 子记录分发表以及含 FormID 的元素子集。构建完成后不可变，
//! 以 `Arc<MelSet>` 在同类型的所有记录间共享。

use crate::datatypes::{FormId, Signature};
use crate::distributor::{DecodeState, Distributor};
use crate::elements::{collect_loaders, Element, MelObject, Value};
use crate::header::SUB_HEADER_SIZE;
use crate::io::ModReader;
use crate::utils::{EspError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Read, Seek, Write};
use std::sync::Arc;

#[derive(Debug)]
pub struct MelSet {
    elements: Vec<Arc<Element>>,
    defaults: BTreeMap<String, Value>,
    listers: BTreeSet<String>,
    /// 嵌套结构，键为点分路径
    providers: BTreeMap<String, Arc<MelSet>>,
    /// 嵌套属性的默认值，键为点分路径（如 `model.modPath`）
    dotted_defaults: BTreeMap<String, Value>,
    loaders: HashMap<Signature, Arc<Element>>,
    form_elements: Vec<Arc<Element>>,
    all_sigs: BTreeSet<Signature>,
    distributor: Option<Box<dyn Distributor>>,
}

impl MelSet {
    pub fn new(elements: Vec<Element>) -> Result<Self> {
        Self::build(elements, None)
    }

    /// 带分发器的结构定义
    pub fn with_distributor(elements: Vec<Element>, distributor: impl Distributor + 'static) -> Result<Self> {
        Self::build(elements, Some(Box::new(distributor)))
    }

    fn build(elements: Vec<Element>, distributor: Option<Box<dyn Distributor>>) -> Result<Self> {
        let elements: Vec<Arc<Element>> = elements.into_iter().map(Arc::new).collect();
        for element in &elements {
            element.check_definition()?;
        }

        let mut pairs = Vec::new();
        let mut lists = Vec::new();
        let mut nested = Vec::new();
        for element in &elements {
            element.defaulters(&mut pairs);
            element.listers(&mut lists);
            element.providers(&mut nested);
        }

        let mut defaults: BTreeMap<String, Value> = BTreeMap::new();
        for (attr, value) in pairs {
            match defaults.get(&attr) {
                Some(existing) if *existing != value => {
                    return Err(EspError::definition(format!(
                        "Conflicting defaults for attribute '{}': {:?} vs {:?}",
                        attr, existing, value
                    )));
                }
                Some(_) => {}
                None => {
                    defaults.insert(attr, value);
                }
            }
        }

        let mut providers = BTreeMap::new();
        let mut dotted_defaults = BTreeMap::new();
        for (attr, schema) in nested {
            for (key, value) in schema.defaults.iter().chain(schema.dotted_defaults.iter()) {
                dotted_defaults.insert(format!("{}.{}", attr, key), value.clone());
            }
            for (key, inner) in &schema.providers {
                providers.insert(format!("{}.{}", attr, key), inner.clone());
            }
            providers.insert(attr, schema);
        }

        let mut entries = Vec::new();
        for element in &elements {
            collect_loaders(element, &mut entries);
        }
        let mut loaders: HashMap<Signature, Arc<Element>> = HashMap::new();
        for (sig, element) in entries {
            if let Some(previous) = loaders.insert(sig, element.clone()) {
                if !Arc::ptr_eq(&previous, &element) {
                    return Err(EspError::definition(format!(
                        "Subrecord signature {} is claimed by more than one element",
                        sig
                    )));
                }
            }
        }

        if let Some(distributor) = &distributor {
            if let Some(bad) = distributor.targets().into_iter().find(|&i| i >= elements.len()) {
                return Err(EspError::definition(format!(
                    "Distributor routes to element {} but only {} elements exist",
                    bad,
                    elements.len()
                )));
            }
        }

        let all_sigs = elements.iter().flat_map(|e| e.signatures()).collect();
        let form_elements = elements.iter().filter(|e| e.has_fids()).cloned().collect();

        Ok(MelSet {
            elements,
            defaults,
            listers: lists.into_iter().collect(),
            providers,
            dotted_defaults,
            loaders,
            form_elements,
            all_sigs,
            distributor,
        })
    }

    pub fn elements(&self) -> &[Arc<Element>] {
        &self.elements
    }

    /// 全部可消费的子记录类型（含仅分发器可达的）
    pub fn signatures(&self) -> impl Iterator<Item = Signature> + '_ {
        self.all_sigs.iter().copied()
    }

    pub fn default_for(&self, attr: &str) -> Option<Value> {
        self.defaults.get(attr).cloned()
    }

    pub fn knows_attr(&self, attr: &str) -> bool {
        self.defaults.contains_key(attr)
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &String> {
        self.defaults.keys()
    }

    pub fn dotted_default(&self, path: &str) -> Option<Value> {
        self.dotted_defaults.get(path).cloned()
    }

    pub fn provider(&self, path: &str) -> Option<&Arc<MelSet>> {
        self.providers.get(path)
    }

    pub fn is_list(&self, attr: &str) -> bool {
        self.listers.contains(attr)
    }

    /// 静态分发表查找
    pub fn loader(&self, sig: Signature) -> Option<&Arc<Element>> {
        self.loaders.get(&sig)
    }

    pub fn has_fids(&self) -> bool {
        !self.form_elements.is_empty()
    }

    /// 检查多个元素是否使用同一属性
    ///
    /// 允许覆盖的记录类型不调用此检查；那时同一属性以声明顺序中最后
    /// 解码的元素为准。
    pub fn check_duplicate_attrs(&self, rec_sig: Signature) -> Result<()> {
        let mut seen = BTreeSet::new();
        for element in &self.elements {
            for attr in element.attrs_used() {
                if !seen.insert(attr.clone()) {
                    return Err(EspError::definition(format!(
                        "{}: attribute '{}' is used by more than one element",
                        rec_sig, attr
                    )));
                }
            }
        }
        Ok(())
    }

    /// 解码一个子记录：先问分发器，再查静态分发表
    pub fn load_subrecord<R: Read + Seek>(
        &self,
        target: &mut MelObject,
        ins: &mut ModReader<R>,
        sig: Signature,
        size: u32,
        previous: Option<Signature>,
    ) -> Result<()> {
        if let Some(distributor) = &self.distributor {
            let state = DecodeState {
                record: &*target,
                previous,
            };
            if let Some(index) = distributor.route(&state, sig) {
                let element = self.elements.get(index).ok_or_else(|| {
                    EspError::format(format!("Distributor chose missing element {}", index))
                })?;
                return element.load_mel(target, ins, sig, size);
            }
        }
        match self.loaders.get(&sig) {
            Some(element) => element.load_mel(target, ins, sig, size),
            None => Err(EspError::format("Unexpected subrecord").with_subrecord(sig)),
        }
    }

    /// 解码 `end` 之前的全部子记录
    ///
    /// 任何失败都会使整个对象作废；成功时才返回属性。
    pub fn load_object<R: Read + Seek>(
        schema: &Arc<MelSet>,
        ins: &mut ModReader<R>,
        end: u64,
    ) -> Result<MelObject> {
        let mut target = MelObject::new(schema.clone());
        let mut previous = None;

        while !ins.at_end(end)? {
            let pos = ins.tell()?;
            if end - pos < SUB_HEADER_SIZE {
                let tail = ins.read((end - pos) as usize)?;
                if tail.iter().all(|&b| b == 0) {
                    break;
                }
                return Err(ins.error_at(format!("{} stray bytes after the last subrecord", tail.len()), pos));
            }

            let (sig, size) = ins.unpack_sub_header()?;
            let start = ins.tell()?;
            if start + size as u64 > end {
                return Err(ins
                    .error_at(format!("Subrecord of {} bytes runs past the end of the record", size), start)
                    .with_subrecord(sig));
            }

            schema
                .load_subrecord(&mut target, ins, sig, size, previous)
                .map_err(|e| e.into_format().with_subrecord(sig).with_file(ins.name()).with_offset(start))?;

            let consumed = ins.tell()? - start;
            if consumed != size as u64 {
                return Err(ins
                    .error_at(format!("Element consumed {} bytes of a {} byte subrecord", consumed, size), start)
                    .with_subrecord(sig));
            }
            previous = Some(sig);
        }

        Ok(target)
    }

    /// 按声明顺序编码全部元素
    pub fn dump_data<W: Write + ?Sized>(&self, target: &MelObject, out: &mut W) -> Result<()> {
        for element in &self.elements {
            element.dump_data(target, out)?;
        }
        Ok(())
    }

    pub fn map_fids(
        &self,
        target: &mut MelObject,
        mapper: &mut dyn FnMut(FormId) -> FormId,
        save: bool,
    ) -> Result<()> {
        for element in &self.form_elements {
            element.map_fids(target, mapper, save)?;
        }
        Ok(())
    }
}
