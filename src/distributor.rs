//! 分发器：按已解码的内容把子记录交给特定元素
//!
//! 某些记录类型的布局取决于前面出现过的子记录。结构定义在查静态分发表
//! 之前先询问分发器；分发器只看当前状态，不修改分发表。

use crate::datatypes::Signature;
use crate::elements::MelObject;
use std::fmt;

/// 分发时可见的解码状态
pub struct DecodeState<'a> {
    /// 到目前为止解码出的属性
    pub record: &'a MelObject,
    /// 上一个子记录的类型
    pub previous: Option<Signature>,
}

/// 分发策略
pub trait Distributor: Send + Sync + fmt::Debug {
    /// 返回处理 `sig` 的顶层元素下标，`None` 表示交给静态分发表
    fn route(&self, state: &DecodeState<'_>, sig: Signature) -> Option<usize>;

    /// 可能返回的全部下标，构建结构定义时检查越界
    fn targets(&self) -> Vec<usize> {
        Vec::new()
    }
}

/// 按前一个子记录类型分发
///
/// `(after, sig) → element`：紧跟在 `after` 后面出现的 `sig` 交给指定元素；
/// `after` 为 `None` 的规则匹配记录中的第一个子记录。
#[derive(Debug, Default, Clone)]
pub struct SequenceDistributor {
    routes: Vec<(Option<Signature>, Signature, usize)>,
}

impl SequenceDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, after: Option<Signature>, sig: Signature, element: usize) -> Self {
        self.routes.push((after, sig, element));
        self
    }
}

impl Distributor for SequenceDistributor {
    fn route(&self, state: &DecodeState<'_>, sig: Signature) -> Option<usize> {
        self.routes
            .iter()
            .find(|(after, target_sig, _)| *target_sig == sig && *after == state.previous)
            .map(|(_, _, element)| *element)
    }

    fn targets(&self) -> Vec<usize> {
        self.routes.iter().map(|(_, _, element)| *element).collect()
    }
}
