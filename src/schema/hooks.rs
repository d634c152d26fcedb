//! 类型扩展钩子
//!
//! 每个类型可以注册属性校验器、插入/更新/删除触发器以及节点初始化/清理钩子。
//! 查找时沿父类型链向上，最近的注册生效。

use crate::error::Result;
use crate::graph::{Database, Node};
use crate::types::Datum;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 写入前调用，可以拒绝或改写值；改写为空串即放弃这次写入
pub type Validator = Arc<dyn Fn(&mut Database, &Node, &mut Datum) -> Result<()>>;
pub type InsertTrigger = Arc<dyn Fn(&mut Database, &Node, &Datum) -> Result<()>>;
/// 参数依次为新值、旧值
pub type UpdateTrigger = Arc<dyn Fn(&mut Database, &Node, &Datum, &Datum) -> Result<()>>;
pub type DeleteTrigger = Arc<dyn Fn(&mut Database, &Node, &Datum) -> Result<()>>;
pub type NodeHook = Arc<dyn Fn(&mut Database, &Node) -> Result<()>>;

/// 一个类型的钩子表，按属性名（对外名称或相对名）索引
#[derive(Clone, Default)]
pub struct TypeHooks {
    validators: HashMap<String, Validator>,
    inserted: HashMap<String, InsertTrigger>,
    updated: HashMap<String, UpdateTrigger>,
    deleted: HashMap<String, DeleteTrigger>,
    init: Option<NodeHook>,
    cleanup: Option<NodeHook>,
}

impl TypeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator<F>(mut self, prop: &str, f: F) -> Self
    where
        F: Fn(&mut Database, &Node, &mut Datum) -> Result<()> + 'static,
    {
        self.validators.insert(prop.to_string(), Arc::new(f));
        self
    }

    pub fn on_inserted<F>(mut self, prop: &str, f: F) -> Self
    where
        F: Fn(&mut Database, &Node, &Datum) -> Result<()> + 'static,
    {
        self.inserted.insert(prop.to_string(), Arc::new(f));
        self
    }

    pub fn on_updated<F>(mut self, prop: &str, f: F) -> Self
    where
        F: Fn(&mut Database, &Node, &Datum, &Datum) -> Result<()> + 'static,
    {
        self.updated.insert(prop.to_string(), Arc::new(f));
        self
    }

    pub fn on_deleted<F>(mut self, prop: &str, f: F) -> Self
    where
        F: Fn(&mut Database, &Node, &Datum) -> Result<()> + 'static,
    {
        self.deleted.insert(prop.to_string(), Arc::new(f));
        self
    }

    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Database, &Node) -> Result<()> + 'static,
    {
        self.init = Some(Arc::new(f));
        self
    }

    pub fn on_cleanup<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Database, &Node) -> Result<()> + 'static,
    {
        self.cleanup = Some(Arc::new(f));
        self
    }

    pub fn get_validator(&self, names: &[&str]) -> Option<Validator> {
        names.iter().find_map(|n| self.validators.get(*n).cloned())
    }

    pub fn get_inserted(&self, names: &[&str]) -> Option<InsertTrigger> {
        names.iter().find_map(|n| self.inserted.get(*n).cloned())
    }

    pub fn get_updated(&self, names: &[&str]) -> Option<UpdateTrigger> {
        names.iter().find_map(|n| self.updated.get(*n).cloned())
    }

    pub fn get_deleted(&self, names: &[&str]) -> Option<DeleteTrigger> {
        names.iter().find_map(|n| self.deleted.get(*n).cloned())
    }

    pub fn init(&self) -> Option<NodeHook> {
        self.init.clone()
    }

    pub fn cleanup(&self) -> Option<NodeHook> {
        self.cleanup.clone()
    }
}

impl fmt::Debug for TypeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHooks")
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .field("inserted", &self.inserted.keys().collect::<Vec<_>>())
            .field("updated", &self.updated.keys().collect::<Vec<_>>())
            .field("deleted", &self.deleted.keys().collect::<Vec<_>>())
            .field("init", &self.init.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_builder_lookup() {
        let hooks = TypeHooks::new()
            .validator("email", |_, _, v| match v.as_str() {
                Some(s) if s.contains('@') => Ok(()),
                _ => Err(Error::Validation("无效邮箱".to_string())),
            })
            .on_deleted("email", |_, _, _| Ok(()))
            .on_init(|_, _| Ok(()));

        assert!(hooks.get_validator(&["mail", "email"]).is_some());
        assert!(hooks.get_validator(&["name"]).is_none());
        assert!(hooks.get_deleted(&["email"]).is_some());
        assert!(hooks.get_inserted(&["email"]).is_none());
        assert!(hooks.init().is_some());
        assert!(hooks.cleanup().is_none());
        assert!(format!("{:?}", hooks).contains("email"));
    }
}
