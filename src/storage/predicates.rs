//! 谓词类型登记
//!
//! 每个谓词在第一次写入时绑定数据类型。登记表在事务边界清空，
//! 迁移（改变已绑定类型）由 [`TripleStore::set_pred_type`](super::TripleStore::set_pred_type) 驱动。

use crate::error::Result;
use crate::storage::backend::Backend;
use crate::types::DatumType;
use std::collections::HashMap;

/// 谓词类型缓存
#[derive(Debug, Default)]
pub struct PredicateRegistry {
    types: HashMap<String, Option<DatumType>>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 谓词类型，未登记或未绑定返回 None
    pub fn get(&mut self, backend: &dyn Backend, name: &str) -> Result<Option<DatumType>> {
        if let Some(ty) = self.types.get(name) {
            return Ok(*ty);
        }
        let ty = backend.load_pred(name)?;
        self.types.insert(name.to_string(), ty);
        Ok(ty)
    }

    /// 仅修改内存中的绑定
    pub fn rebind(&mut self, name: &str, ty: DatumType) {
        self.types.insert(name.to_string(), Some(ty));
    }

    /// 首次绑定并持久化
    pub fn bind(&mut self, backend: &dyn Backend, name: &str, ty: DatumType) -> Result<()> {
        backend.insert_pred(name, ty)?;
        self.rebind(name, ty);
        Ok(())
    }

    /// 改变已持久化的绑定
    pub fn rewrite(&mut self, backend: &dyn Backend, name: &str, ty: DatumType) -> Result<()> {
        backend.update_pred(name, ty)?;
        self.rebind(name, ty);
        Ok(())
    }

    /// 只查缓存，不访问后端
    pub fn cached(&self, name: &str) -> Option<DatumType> {
        self.types.get(name).copied().flatten()
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteBackend;

    #[test]
    fn test_bind_and_reload() {
        let backend = SqliteBackend::open_in_memory("").unwrap();
        let mut registry = PredicateRegistry::new();
        assert_eq!(registry.get(&backend, "age").unwrap(), None);

        registry.bind(&backend, "age", DatumType::Int).unwrap();
        assert_eq!(registry.cached("age"), Some(DatumType::Int));

        registry.clear();
        assert_eq!(registry.cached("age"), None);
        assert_eq!(registry.get(&backend, "age").unwrap(), Some(DatumType::Int));

        registry.rewrite(&backend, "age", DatumType::Float).unwrap();
        registry.clear();
        assert_eq!(registry.get(&backend, "age").unwrap(), Some(DatumType::Float));
    }

    #[test]
    fn test_rebind_is_memory_only() {
        let backend = SqliteBackend::open_in_memory("").unwrap();
        let mut registry = PredicateRegistry::new();
        registry.rebind("title", DatumType::String);
        assert_eq!(registry.get(&backend, "title").unwrap(), Some(DatumType::String));
        registry.clear();
        assert_eq!(registry.get(&backend, "title").unwrap(), None);
    }
}
