//! 类型模式
//!
//! 模式有两种形态：
//! - [`Schema::Frozen`]：任何违规都直接报错，未知类型报 `UnknownType`
//! - [`Schema::Learning`]：违规通过 [`Schema::relax`] 放宽定义后继续，
//!   未知类型和属性会按使用情况自动生成定义并写回类路径
//!
//! 所有放宽路径都只经过 `relax`/`learn` 两个入口。

pub mod def;
pub mod hooks;
pub mod name;

pub use def::{AccessMask, PropertyDef, TypeDef};
pub use hooks::TypeHooks;

use crate::error::{Error, Result};
use crate::types::DatumType;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 指向某个类型中某条属性定义
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefRef {
    pub type_name: String,
    pub index: usize,
}

/// 对定义的修改
#[derive(Debug, Clone, PartialEq)]
pub enum Relaxation {
    Grant(AccessMask),
    AllowRepetitions,
    DropUnique,
    DropRequired,
    SingleValued,
    Datatype(DatumType),
    NodeType(String),
    MarkUnique,
    MarkRequired,
}

impl Relaxation {
    fn apply(&self, ty: &mut TypeDef, index: usize) {
        match self {
            Relaxation::Grant(mask) => {
                let def = ty.def_mut(index);
                def.mask = def.mask | *mask;
            }
            Relaxation::AllowRepetitions => ty.def_mut(index).repetitions = true,
            Relaxation::DropUnique => ty.def_mut(index).unique = false,
            Relaxation::DropRequired => ty.set_required(index, false),
            Relaxation::SingleValued => ty.def_mut(index).is_list = false,
            Relaxation::Datatype(dt) => ty.def_mut(index).datatype = Some(*dt),
            Relaxation::NodeType(name) => ty.def_mut(index).node_type = Some(name.clone()),
            Relaxation::MarkUnique => ty.def_mut(index).unique = true,
            Relaxation::MarkRequired => ty.set_required(index, true),
        }
    }
}

/// 已加载的类型定义与钩子
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
    hooks: HashMap<String, TypeHooks>,
    classpath: Option<PathBuf>,
    loading: HashSet<String>,
}

impl TypeRegistry {
    pub fn new(classpath: Option<PathBuf>) -> Self {
        Self {
            classpath,
            ..Default::default()
        }
    }

    pub fn classpath(&self) -> Option<&Path> {
        self.classpath.as_deref()
    }

    /// `{classpath}/definitions/ns1/ns2/Name.def`
    pub fn definition_path(&self, name: &str) -> Option<PathBuf> {
        let root = self.classpath.as_ref()?;
        let mut path = root.join("definitions");
        let mut parts = name.split('_').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                path.push(part);
            } else {
                path.push(format!("{}.def", part));
            }
        }
        Some(path)
    }

    fn load(&mut self, name: &str, frozen: bool) -> Result<()> {
        if self.types.contains_key(name) {
            return Ok(());
        }
        if !self.loading.insert(name.to_string()) {
            return Err(Error::DefinitionError(format!("类型 {} 的继承关系有环", name)));
        }
        let result = self.read_definition(name, frozen);
        self.loading.remove(name);
        let def = result?;
        if let Some(supertype) = def.supertype().map(str::to_string) {
            self.loading.insert(name.to_string());
            let loaded = self.load(&supertype, frozen);
            self.loading.remove(name);
            loaded?;
        }
        self.types.insert(name.to_string(), def);
        Ok(())
    }

    fn read_definition(&self, name: &str, frozen: bool) -> Result<TypeDef> {
        match self.definition_path(name).filter(|p| p.is_file()) {
            Some(path) => {
                let text = fs::read_to_string(&path)?;
                TypeDef::parse(name, &text)
            }
            None if frozen => Err(Error::UnknownType(format!("没有找到类型 {} 的定义文件", name))),
            None => TypeDef::empty(name),
        }
    }

    /// 直接以文本注册类型定义，替换已有定义
    pub fn define(&mut self, name: &str, text: &str, frozen: bool) -> Result<()> {
        let def = TypeDef::parse(name, text)?;
        if let Some(supertype) = def.supertype() {
            if supertype == name {
                return Err(Error::DefinitionError(format!("类型 {} 不能继承自身", name)));
            }
            let supertype = supertype.to_string();
            self.load(&supertype, frozen)?;
        }
        self.types.insert(name.to_string(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// 类型自身加上所有父类型，由近及远
    pub fn chain(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(name.to_string());
        while let Some(n) = current {
            if chain.contains(&n) {
                break;
            }
            current = self.types.get(&n).and_then(|t| t.supertype().map(str::to_string));
            chain.push(n);
        }
        chain
    }

    pub fn is_ancestor(&self, name: &str, ancestor: &str) -> bool {
        name != ancestor && self.chain(name).iter().any(|n| n == ancestor)
    }

    pub fn find(&self, type_name: &str, prop: &str) -> Option<DefRef> {
        self.chain(type_name).into_iter().find_map(|n| {
            let index = self.types.get(&n)?.find_local(prop)?;
            Some(DefRef { type_name: n, index })
        })
    }

    /// 创建节点时必须提供的属性，沿继承链累加
    pub fn required(&self, type_name: &str) -> IndexMap<String, String> {
        let mut required = IndexMap::new();
        for n in self.chain(type_name) {
            if let Some(ty) = self.types.get(&n) {
                for (pred, proper) in ty.required() {
                    required.entry(pred.clone()).or_insert_with(|| proper.clone());
                }
            }
        }
        required
    }

    /// 写回定义文件；没有类路径时只保留在内存
    pub fn save(&self, name: &str) -> Result<()> {
        let (Some(path), Some(def)) = (self.definition_path(name), self.types.get(name)) else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, def.render())?;
        info!(type_name = name, path = %path.display(), "保存类型定义");
        Ok(())
    }

    pub fn set_hooks(&mut self, name: &str, hooks: TypeHooks) {
        self.hooks.insert(name.to_string(), hooks);
    }

    /// 只在该类型上注册的钩子
    pub fn hooks(&self, name: &str) -> Option<TypeHooks> {
        self.hooks.get(name).cloned()
    }

    /// 沿继承链收集钩子表，由近及远
    pub fn hooks_chain(&self, name: &str) -> Vec<TypeHooks> {
        self.chain(name)
            .iter()
            .filter_map(|n| self.hooks.get(n).cloned())
            .collect()
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }
}

/// 冻结模式下的模式快照
#[derive(Debug, Default)]
pub struct SchemaSnapshot {
    registry: TypeRegistry,
}

/// 学习模式下可变的模式
#[derive(Debug, Default)]
pub struct LearningSchema {
    registry: TypeRegistry,
}

impl LearningSchema {
    fn apply(&mut self, r: &DefRef, change: &Relaxation) -> Result<()> {
        let ty = self
            .registry
            .types
            .get_mut(&r.type_name)
            .ok_or_else(|| Error::UnknownType(r.type_name.clone()))?;
        change.apply(ty, r.index);
        self.registry.save(&r.type_name)
    }
}

#[derive(Debug)]
pub enum Schema {
    Frozen(SchemaSnapshot),
    Learning(LearningSchema),
}

impl Schema {
    pub fn new(classpath: Option<PathBuf>, frozen: bool) -> Self {
        let registry = TypeRegistry::new(classpath);
        if frozen {
            Schema::Frozen(SchemaSnapshot { registry })
        } else {
            Schema::Learning(LearningSchema { registry })
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, Schema::Frozen(_))
    }

    pub fn freeze(&mut self) {
        if let Schema::Learning(learning) = self {
            let registry = std::mem::take(&mut learning.registry);
            *self = Schema::Frozen(SchemaSnapshot { registry });
        }
    }

    pub fn unfreeze(&mut self) {
        if let Schema::Frozen(snapshot) = self {
            let registry = std::mem::take(&mut snapshot.registry);
            *self = Schema::Learning(LearningSchema { registry });
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        match self {
            Schema::Frozen(s) => &s.registry,
            Schema::Learning(l) => &l.registry,
        }
    }

    fn registry_mut(&mut self) -> &mut TypeRegistry {
        match self {
            Schema::Frozen(s) => &mut s.registry,
            Schema::Learning(l) => &mut l.registry,
        }
    }

    /// 加载类型（以及父类型）定义
    pub fn ensure_type(&mut self, name: &str) -> Result<&TypeDef> {
        let frozen = self.is_frozen();
        let registry = self.registry_mut();
        registry.load(name, frozen)?;
        registry
            .get(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    pub fn define_type(&mut self, name: &str, text: &str) -> Result<()> {
        let frozen = self.is_frozen();
        self.registry_mut().define(name, text, frozen)
    }

    pub fn register_hooks(&mut self, name: &str, hooks: TypeHooks) {
        self.registry_mut().set_hooks(name, hooks);
    }

    /// 类型是否拒绝任何放宽
    pub fn type_frozen(&self, name: &str) -> bool {
        match self {
            Schema::Frozen(_) => true,
            Schema::Learning(l) => l.registry.get(name).map_or(false, |t| t.is_frozen()),
        }
    }

    pub fn def_frozen(&self, r: &DefRef) -> bool {
        match self.def(r) {
            Ok(def) => def.frozen || self.type_frozen(&r.type_name),
            Err(_) => true,
        }
    }

    pub fn def(&self, r: &DefRef) -> Result<&PropertyDef> {
        self.registry()
            .get(&r.type_name)
            .and_then(|t| t.defs().get(r.index))
            .ok_or_else(|| Error::Internal(format!("定义 {}#{} 不存在", r.type_name, r.index)))
    }

    /// 沿继承链查找属性定义；`create` 时在学习模式下为未知属性生成定义
    pub fn find_def(&mut self, type_name: &str, prop: &str, create: bool) -> Result<Option<DefRef>> {
        self.ensure_type(type_name)?;
        if let Some(found) = self.registry().find(type_name, prop) {
            return Ok(Some(found));
        }
        if !create || self.type_frozen(type_name) {
            return Ok(None);
        }
        let Schema::Learning(learning) = self else {
            return Ok(None);
        };
        let ty = learning
            .registry
            .types
            .get_mut(type_name)
            .ok_or_else(|| Error::UnknownType(type_name.to_string()))?;
        let index = ty.empty_def(prop)?;
        warn!(type_name, property = prop, "自动生成属性定义");
        Ok(Some(DefRef {
            type_name: type_name.to_string(),
            index,
        }))
    }

    /// 违规时放宽定义；冻结时返回 `violation`
    pub fn relax(&mut self, r: &DefRef, change: Relaxation, violation: Error) -> Result<()> {
        if self.def_frozen(r) {
            return Err(violation);
        }
        let Schema::Learning(learning) = self else {
            return Err(violation);
        };
        warn!(type_name = %r.type_name, change = ?change, reason = %violation, "放宽属性定义");
        learning.apply(r, &change)
    }

    /// 按观察到的用法完善定义；冻结时什么也不做，返回是否生效
    pub fn learn(&mut self, r: &DefRef, change: Relaxation) -> Result<bool> {
        if self.def_frozen(r) {
            return Ok(false);
        }
        let Schema::Learning(learning) = self else {
            return Ok(false);
        };
        info!(type_name = %r.type_name, change = ?change, "学习属性定义");
        learning.apply(r, &change)?;
        Ok(true)
    }

    pub fn chain(&self, name: &str) -> Vec<String> {
        self.registry().chain(name)
    }

    pub fn is_ancestor(&self, name: &str, ancestor: &str) -> bool {
        self.registry().is_ancestor(name, ancestor)
    }

    pub fn required(&self, type_name: &str) -> IndexMap<String, String> {
        self.registry().required(type_name)
    }

    pub fn hooks_chain(&self, name: &str) -> Vec<TypeHooks> {
        self.registry().hooks_chain(name)
    }

    pub fn hooks(&self, name: &str) -> Option<TypeHooks> {
        self.registry().hooks(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frozen_rejects_unknown_type() {
        let mut schema = Schema::new(None, true);
        assert!(matches!(schema.ensure_type("Book"), Err(Error::UnknownType(_))));
        schema.define_type("Book", "string title\n").unwrap();
        assert!(schema.ensure_type("Book").is_ok());
        assert!(schema.find_def("Book", "isbn", true).unwrap().is_none());
    }

    #[test]
    fn test_learning_synthesizes_and_relaxes() {
        let mut schema = Schema::new(None, false);
        let r = schema.find_def("Note", "body", true).unwrap().unwrap();
        assert_eq!(schema.def(&r).unwrap().mask, AccessMask::NONE);

        schema
            .relax(&r, Relaxation::Grant(AccessMask::FULL), Error::NotWritable)
            .unwrap();
        assert_eq!(schema.def(&r).unwrap().mask, AccessMask::FULL);
        assert!(schema.learn(&r, Relaxation::SingleValued).unwrap());
        assert!(!schema.def(&r).unwrap().is_list);

        schema.freeze();
        let err = schema
            .relax(&r, Relaxation::DropUnique, Error::Validation("x".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!schema.learn(&r, Relaxation::MarkUnique).unwrap());
    }

    #[test]
    fn test_frozen_property_is_not_relaxed() {
        let mut schema = Schema::new(None, false);
        schema.define_type("Book", "string title required !\n").unwrap();
        let r = schema.find_def("Book", "title", false).unwrap().unwrap();
        let err = schema
            .relax(&r, Relaxation::DropRequired, Error::CardinalityViolation("x".into()))
            .unwrap_err();
        assert!(matches!(err, Error::CardinalityViolation(_)));
        assert!(schema.def(&r).unwrap().required);
    }

    #[test]
    fn test_inheritance_and_required() {
        let mut schema = Schema::new(None, true);
        schema.define_type("Principal", "string name required\n").unwrap();
        schema
            .define_type("User", "\\supertype Principal\nstring email required\n")
            .unwrap();
        assert_eq!(schema.chain("User"), vec!["User", "Principal"]);
        assert!(schema.is_ancestor("User", "Principal"));
        let r = schema.find_def("User", "name", false).unwrap().unwrap();
        assert_eq!(r.type_name, "Principal");
        let required: Vec<String> = schema.required("User").into_keys().collect();
        assert_eq!(required, vec!["email", "name"]);
    }

    #[test]
    fn test_classpath_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut schema = Schema::new(Some(dir.path().to_path_buf()), false);
            let r = schema.find_def("shop_Book", "title", true).unwrap().unwrap();
            schema.learn(&r, Relaxation::Datatype(DatumType::String)).unwrap();
        }
        let file = dir.path().join("definitions/shop/Book.def");
        let text = fs::read_to_string(&file).unwrap();
        assert!(text.contains("string{} title n"));

        let mut schema = Schema::new(Some(dir.path().to_path_buf()), true);
        let r = schema.find_def("shop_Book", "title", false).unwrap().unwrap();
        assert_eq!(schema.def(&r).unwrap().pred, "shop_title");
    }
}
