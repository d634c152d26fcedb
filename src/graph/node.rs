//! 节点句柄
//!
//! [`Node`] 只是一个带类型提示的 ID，可以自由复制、作为属性值写入。
//! 读写属性需要通过 [`Database::node`](crate::graph::Database::node) 取得 [`NodeMut`]。

use crate::error::{Error, Result};
use crate::graph::database::Database;
use crate::graph::prop::PropMut;
use crate::schema::def::AccessMask;
use crate::schema::name::{split_lang, validate_lang};
use crate::schema::{DefRef, Relaxation};
use crate::types::{NodeId, Value};
use indexmap::IndexMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// 节点引用，按 ID 比较
#[derive(Debug, Clone, Eq)]
pub struct Node {
    id: NodeId,
    type_name: Option<String>,
}

impl Node {
    /// 类型未知的节点，访问时再解析顶层类型
    pub fn new(id: NodeId) -> Self {
        Self { id, type_name: None }
    }

    pub fn typed(id: NodeId, type_name: &str) -> Self {
        Self {
            id,
            type_name: Some(type_name.to_string()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node {}", self.id)
    }
}

/// 可读写的节点
///
/// 普通句柄遵守访问掩码并触发钩子；[`NodeMut::data`] 返回的数据视图两者都跳过。
pub struct NodeMut<'a> {
    db: &'a mut Database,
    node: Node,
    type_name: String,
    privileged: bool,
}

impl<'a> NodeMut<'a> {
    pub(crate) fn new(db: &'a mut Database, node: Node, type_name: String, privileged: bool) -> Self {
        Self {
            db,
            node,
            type_name,
            privileged,
        }
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// 同一节点的数据视图
    pub fn data(&mut self) -> NodeMut<'_> {
        NodeMut {
            db: &mut *self.db,
            node: self.node.clone(),
            type_name: self.type_name.clone(),
            privileged: true,
        }
    }

    fn find_def(&mut self, name: &str) -> Result<DefRef> {
        self.db
            .schema
            .find_def(&self.type_name, name, true)?
            .ok_or_else(|| Error::UnknownProperty {
                type_name: self.type_name.clone(),
                property: name.to_string(),
            })
    }

    fn open(&mut self, r: &DefRef, lang: Option<&str>) -> Result<PropMut<'_>> {
        let def = self.db.schema.def(r)?;
        let pred = match lang {
            Some(lang) => format!("{}:{}", def.pred, lang),
            None => def.pred.clone(),
        };
        let dir = def.dir;
        PropMut::open(
            &mut *self.db,
            self.node.clone(),
            self.type_name.clone(),
            pred,
            dir,
            Some(r.clone()),
            self.privileged,
        )
    }

    /// 翻译只能写在单值属性上
    fn require_single(&mut self, r: &DefRef) -> Result<()> {
        if !self.db.schema.def(r)?.is_list {
            return Ok(());
        }
        let violation = Error::CardinalityViolation(format!(
            "翻译只支持单值属性: {}.{}",
            self.type_name,
            self.db.schema.def(r)?.proper_name
        ));
        self.db.schema.relax(r, Relaxation::SingleValued, violation)
    }

    // ==================== 读取 ====================

    /// 属性的完整值列表句柄
    pub fn prop(&mut self, name: &str) -> Result<PropMut<'_>> {
        let (base, lang) = split_lang(name)?;
        let r = self.find_def(base)?;
        self.open(&r, lang)
    }

    /// 读取属性：列表或集合返回 [`Value::List`]，单值属性返回第一个值或 `Null`
    ///
    /// `name:lang` 读取指定语言的翻译。
    pub fn get(&mut self, name: &str) -> Result<Value> {
        let (base, lang) = split_lang(name)?;
        let r = self.find_def(base)?;
        if lang.is_some() {
            self.require_single(&r)?;
        }
        let is_list = self.db.schema.def(&r)?.is_list;
        let mut prop = self.open(&r, lang)?;
        if is_list {
            Ok(Value::List(prop.values()?))
        } else {
            Ok(prop.get_at(0)?.unwrap_or(Value::Null))
        }
    }

    /// 读取翻译，依次尝试完整语言代码、两字母前缀、无语言的默认值
    pub fn get_tr(&mut self, name: &str, lang: &str) -> Result<Value> {
        validate_lang(lang)?;
        let r = self.find_def(name)?;
        self.require_single(&r)?;
        let mut candidates = vec![Some(lang)];
        if lang.len() == 5 {
            candidates.push(Some(&lang[..2]));
        }
        candidates.push(None);
        for candidate in candidates {
            if let Some(value) = self.open(&r, candidate)?.get_at(0)? {
                return Ok(value);
            }
        }
        Ok(Value::Null)
    }

    /// 节点是否有该属性的值；没有定义时为 false
    pub fn has_prop(&mut self, name: &str) -> Result<bool> {
        let (base, lang) = split_lang(name)?;
        let Some(r) = self.db.schema.find_def(&self.type_name, base, false)? else {
            return Ok(false);
        };
        let mut prop = self.open(&r, lang)?;
        prop.override_mask(AccessMask::FULL);
        Ok(prop.count()? > 0)
    }

    /// 节点的谓词及其值个数，反向谓词带 `@`
    pub fn properties(&mut self) -> Result<IndexMap<String, usize>> {
        self.db.store.node_predicates(self.node.id, None)
    }

    // ==================== 写入 ====================

    /// 写入属性：空值删除全部值，列表重置整个列表，单个值写到第一位
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if let Some((base, lang)) = name.split_once(':') {
            return self.set_tr(base, lang, value);
        }
        let r = self.find_def(name)?;
        let (is_list, proper_name) = {
            let def = self.db.schema.def(&r)?;
            (def.is_list, def.proper_name.clone())
        };
        if value.is_empty() {
            return self.open(&r, None)?.delete();
        }
        if let Value::List(values) = value {
            if !is_list {
                return Err(Error::CardinalityViolation(format!(
                    "单值属性 {}.{} 不能写入列表",
                    self.type_name, proper_name
                )));
            }
            return self.open(&r, None)?.reset(values);
        }
        if is_list {
            self.db.schema.learn(&r, Relaxation::SingleValued)?;
        }
        self.open(&r, None)?.set_at(0, value)
    }

    /// 写入翻译；默认值与两字母前缀的翻译为空时一并写入
    pub fn set_tr(&mut self, name: &str, lang: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        validate_lang(lang)?;
        let r = self.find_def(name)?;
        self.require_single(&r)?;
        if value.is_empty() {
            return self.open(&r, Some(lang))?.delete();
        }
        if matches!(value, Value::List(_)) {
            return Err(Error::CardinalityViolation(format!(
                "翻译 {}:{} 是单值的，不能写入列表",
                name, lang
            )));
        }
        self.open(&r, Some(lang))?.set_at(0, value.clone())?;

        let mut fallbacks = vec![None];
        if lang.len() == 5 {
            fallbacks.push(Some(&lang[..2]));
        }
        for fallback in fallbacks {
            let mut prop = self.open(&r, fallback)?;
            if prop.count()? == 0 {
                prop.set_at(0, value.clone())?;
            }
        }
        Ok(())
    }

    /// 依次写入多个属性
    pub fn update(&mut self, args: &[(&str, Value)]) -> Result<()> {
        for (name, value) in args {
            self.set(name, value.clone())?;
        }
        Ok(())
    }

    /// 删除节点
    pub fn delete(self) -> Result<()> {
        self.db.delete_node(&self.node)
    }
}
