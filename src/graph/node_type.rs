//! 类型级操作：创建实例、按字段查找、移出类型、类型内查询

use crate::error::{Error, Result};
use crate::graph::database::Database;
use crate::graph::node::{Node, NodeMut};
use crate::graph::prop::PropMut;
use crate::graph::{TOP_TYPE_FIELD, TOP_TYPE_PRED, TYPE_FIELD};
use crate::query::{Query, ResultSet, TYPE_PRED};
use crate::schema::{DefRef, Relaxation};
use crate::types::{Datum, DatumType, NodeId, Value};
use tracing::debug;

impl Database {
    /// 创建 `type_name` 的新实例
    ///
    /// 依次写入类型三元组、执行初始化钩子（父类型在前）、写入 `args`，最后检查必填属性。
    pub fn create(&mut self, type_name: &str, args: &[(&str, Value)]) -> Result<Node> {
        if !self.is_writing() {
            return Err(Error::NotWritable);
        }
        self.schema.ensure_type(type_name)?;
        if !self.is_frozen() {
            self.learn_required(type_name, args)?;
        }

        let id = self.store.new_node_id()?;
        let node = Node::typed(id, type_name);
        let chain = self.schema.chain(type_name);
        {
            let mut data = NodeMut::new(self, node.clone(), type_name.to_string(), true);
            data.prop(TOP_TYPE_FIELD)?.append(type_name)?;
            let mut types = data.prop(TYPE_FIELD)?;
            for name in &chain {
                types.append(name.as_str())?;
            }
        }

        for name in chain.iter().rev() {
            if let Some(init) = self.schema.hooks(name).and_then(|h| h.init()) {
                init(self, &node)?;
            }
        }

        NodeMut::new(self, node.clone(), type_name.to_string(), false).update(args)?;
        self.check_required(type_name, id)?;
        debug!(node = id, type_name, "创建节点");
        Ok(node)
    }

    /// 学习模式：已有实例都带有的属性，若本次也提供则标记为必填
    fn learn_required(&mut self, type_name: &str, args: &[(&str, Value)]) -> Result<()> {
        if self.type_select(type_name, "limit 1", &[])?.is_empty() {
            return Ok(());
        }
        for (name, value) in args {
            if value.is_empty() || name.contains(':') {
                continue;
            }
            let Some(r) = self.schema.find_def(type_name, name, true)? else {
                continue;
            };
            if self.schema.def(&r)?.required {
                continue;
            }
            let missing = self.type_select(type_name, &format!("not {} limit 1", name), &[])?;
            if missing.is_empty() {
                self.schema.learn(&r, Relaxation::MarkRequired)?;
            }
        }
        Ok(())
    }

    fn check_required(&mut self, type_name: &str, id: NodeId) -> Result<()> {
        for (pred, proper) in self.schema.required(type_name) {
            let Some(r) = self.schema.find_def(type_name, &proper, false)? else {
                continue;
            };
            let dir = self.schema.def(&r)?.dir;
            if self.store.node_pred_cardinality(id, &pred, dir)? > 0 {
                continue;
            }
            let violation = Error::RequiredViolation {
                property: format!("{}.{}", type_name, proper),
                node: id,
            };
            self.schema.relax(&r, Relaxation::DropRequired, violation)?;
        }
        Ok(())
    }

    /// 按字段值查找第一个实例
    ///
    /// 学习模式下，若结果不超过一个则把该字段标记为唯一。
    pub fn get_by(
        &mut self,
        type_name: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Node>> {
        let value = value.into();
        let rs = self.type_select(type_name, &format!("{}=? limit 2", field), &[value])?;
        if !self.is_frozen() && rs.len() < 2 {
            if let Some(r) = self.schema.find_def(type_name, field, false)? {
                if !self.schema.def(&r)?.unique {
                    self.schema.learn(&r, Relaxation::MarkUnique)?;
                }
            }
        }
        match rs.ids().first() {
            Some(&id) => self.get_typed_node(type_name, id).map(Some),
            None => Ok(None),
        }
    }

    /// 节点是否是 `type_name`（或其子类型）的实例
    pub fn contains_node(&mut self, type_name: &str, id: NodeId) -> Result<bool> {
        let ty = Datum::String(type_name.to_string());
        Ok(!self
            .store
            .get_triples(Some(id), Some(TYPE_PRED), Some(&ty))?
            .is_empty())
    }

    /// 以 `type_name` 或更具体的顶层类型取节点
    pub fn get_typed_node(&mut self, type_name: &str, id: NodeId) -> Result<Node> {
        if !self.contains_node(type_name, id)? {
            return Err(Error::InvalidReference(format!(
                "节点 #{} 不是 {} 的实例",
                id, type_name
            )));
        }
        if let Some(top) = self.top_types(id)?.into_iter().next() {
            self.schema.ensure_type(&top)?;
            if self.schema.is_ancestor(&top, type_name) {
                return Ok(Node::typed(id, &top));
            }
        }
        Ok(Node::typed(id, type_name))
    }

    /// 把节点移出 `type_name`：执行清理钩子，删除该类型链上声明的全部属性
    ///
    /// 节点必须是该类型的直接实例。
    pub fn remove_from_type(&mut self, type_name: &str, id: NodeId) -> Result<()> {
        if !self.top_types(id)?.iter().any(|t| t == type_name) {
            return Err(Error::InvalidReference(format!(
                "节点 #{} 不是 {} 的直接实例",
                id, type_name
            )));
        }
        let fresh = self.deleting.insert(id);
        let result = self.remove_from_type_inner(type_name, id);
        if fresh {
            self.deleting.remove(&id);
        }
        result
    }

    fn remove_from_type_inner(&mut self, type_name: &str, id: NodeId) -> Result<()> {
        let node = Node::typed(id, type_name);
        for name in self.schema.chain(type_name) {
            if let Some(cleanup) = self.schema.hooks(&name).and_then(|h| h.cleanup()) {
                cleanup(self, &node)?;
            }
            let defs: Vec<(usize, bool)> = match self.schema.registry().get(&name) {
                Some(ty) => ty
                    .defs()
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| !d.pred.starts_with("graphene_"))
                    .map(|(i, d)| (i, d.delete_cascade && d.storage_type() == Some(DatumType::Node)))
                    .collect(),
                None => Vec::new(),
            };
            for (index, cascade) in defs {
                let r = DefRef {
                    type_name: name.clone(),
                    index,
                };
                if cascade {
                    let targets: Vec<Node> = self
                        .open_data_prop(&node, type_name, &r)?
                        .values()?
                        .into_iter()
                        .filter_map(|v| match v {
                            Value::Node(n) => Some(n),
                            _ => None,
                        })
                        .collect();
                    for target in targets {
                        self.delete_node(&target)?;
                    }
                }
                self.open_data_prop(&node, type_name, &r)?.delete()?;
            }
            let ty = Datum::String(name.clone());
            for triple in self.store.get_triples(Some(id), Some(TYPE_PRED), Some(&ty))? {
                self.store.remove(triple.id, Some(TYPE_PRED))?;
            }
        }
        let top = Datum::String(type_name.to_string());
        for triple in self
            .store
            .get_triples(Some(id), Some(TOP_TYPE_PRED), Some(&top))?
        {
            self.store.remove(triple.id, Some(TOP_TYPE_PRED))?;
        }
        debug!(node = id, type_name, "移出类型");
        Ok(())
    }

    fn open_data_prop(&mut self, node: &Node, type_name: &str, r: &DefRef) -> Result<PropMut<'_>> {
        let (pred, dir) = {
            let def = self.schema.def(r)?;
            (def.pred.clone(), def.dir)
        };
        PropMut::open(
            self,
            node.clone(),
            type_name.to_string(),
            pred,
            dir,
            Some(r.clone()),
            true,
        )
    }

    /// 在 `type_name` 的实例中查询
    pub fn type_select(&mut self, type_name: &str, query: &str, params: &[Value]) -> Result<ResultSet> {
        let query = Query::new(query)
            .scoped(type_name)
            .constraint(&format!("_graphene_type#type='{}'", type_name), Vec::new());
        self.run_query(query, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::schema::def::AccessMask;
    use crate::schema::{PropertyDef, TypeHooks};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn open(frozen: bool) -> Database {
        let config = if frozen {
            DatabaseConfig::in_memory()
        } else {
            DatabaseConfig::in_memory().unfrozen()
        };
        Database::open(config).unwrap()
    }

    fn def(db: &mut Database, type_name: &str, prop: &str) -> PropertyDef {
        let r = db.schema.find_def(type_name, prop, false).unwrap().unwrap();
        db.schema.def(&r).unwrap().clone()
    }

    /// A、B 两个 Person，C 是 B 写的 Book
    fn library(db: &mut Database, person_def: &str) -> (Node, Node, Node) {
        db.define_type("Person", person_def).unwrap();
        db.define_type("Book", "string title\nPerson author ri\n").unwrap();
        db.transaction(|db| {
            let a = db.create("Person", &[("name", "John".into())])?;
            let b = db.create("Person", &[("name", "James".into())])?;
            let c = db.create("Book", &[("title", "X".into()), ("author", b.clone().into())])?;
            Ok((a, b, c))
        })
        .unwrap()
    }

    #[test]
    fn test_query_by_bound_author() {
        let mut db = open(true);
        let (_, b, c) = library(&mut db, "string name\n");
        let rs = db.select("Book#b and #b.author=?", &[b.clone().into()]).unwrap();
        assert_eq!(rs.ids(), vec![c.id()]);

        let rs = db.type_select("Book", "author=?", &[b.into()]).unwrap();
        assert_eq!(db.result_nodes(&rs).unwrap(), vec![c]);
    }

    #[test]
    fn test_delete_blocked_by_back_reference_mask() {
        let mut db = open(true);
        let (_, b, c) = library(&mut db, "string name\n");
        db.begin().unwrap();
        let err = db.delete_node(&b).unwrap_err();
        assert!(matches!(err, Error::AccessDenied { .. }));
        db.rollback().unwrap();

        assert_eq!(db.node(&b).unwrap().get("name").unwrap(), Value::from("James"));
        assert_eq!(
            db.node(&c).unwrap().get("author").unwrap(),
            Value::Node(b.clone())
        );
        assert!(db.contains_node("Person", b.id()).unwrap());
    }

    #[test]
    fn test_unfrozen_delete_grants_access() {
        let mut db = open(false);
        let (_, b, c) = library(&mut db, "string name\n");
        db.transaction(|db| db.delete_node(&b)).unwrap();

        assert_eq!(def(&mut db, "Book", "author").mask, AccessMask::FULL);
        assert!(!db.contains_node("Person", b.id()).unwrap());
        assert!(db.store.node_predicates(b.id(), None).unwrap().is_empty());
        let mut book = db.node(&c).unwrap();
        assert_eq!(book.get("author").unwrap(), Value::Null);
        assert_eq!(book.get("title").unwrap(), Value::from("X"));
    }

    #[test]
    fn test_delete_cascade() {
        let mut db = open(true);
        let (a, b, c) = library(
            &mut db,
            "string name\nBook{} @author as books delete cascade\n",
        );
        assert_eq!(
            db.node(&b).unwrap().get("books").unwrap(),
            Value::List(vec![Value::Node(c.clone())])
        );
        db.transaction(|db| db.delete_node(&b)).unwrap();

        assert!(db.type_select("Book", "", &[]).unwrap().is_empty());
        assert!(db.store.node_predicates(c.id(), None).unwrap().is_empty());
        let rs = db.type_select("Person", "", &[]).unwrap();
        assert_eq!(rs.ids(), vec![a.id()]);
    }

    #[test]
    fn test_required_property_frozen() {
        let mut db = open(true);
        db.define_type("Person", "string name required\n").unwrap();
        db.begin().unwrap();
        assert!(matches!(
            db.create("Person", &[]),
            Err(Error::RequiredViolation { .. })
        ));
        let p = db.create("Person", &[("name", "Ann".into())]).unwrap();
        let err = db.node(&p).unwrap().set("name", Value::Null).unwrap_err();
        assert!(matches!(err, Error::RequiredViolation { .. }));
        assert_eq!(db.node(&p).unwrap().get("name").unwrap(), Value::from("Ann"));
        db.rollback().unwrap();
    }

    #[test]
    fn test_required_property_unfrozen() {
        let mut db = open(false);
        db.define_type("Person", "string name required\n").unwrap();
        db.begin().unwrap();
        let p = db.create("Person", &[("name", "Ann".into())]).unwrap();
        db.node(&p).unwrap().set("name", Value::Null).unwrap();
        assert!(!def(&mut db, "Person", "name").required);
        assert_eq!(db.node(&p).unwrap().get("name").unwrap(), Value::Null);
        db.commit().unwrap();
    }

    #[test]
    fn test_learns_required_and_unique() {
        let mut db = open(false);
        db.begin().unwrap();
        db.create("Note", &[("body", "a".into()), ("tag", "x".into())]).unwrap();
        db.create("Note", &[("body", "b".into())]).unwrap();
        assert!(def(&mut db, "Note", "body").required);
        assert!(!def(&mut db, "Note", "tag").required);

        let found = db.get_by("Note", "body", "b").unwrap().unwrap();
        assert_eq!(found.type_name(), Some("Note"));
        assert!(def(&mut db, "Note", "body").unique);
        assert!(db.get_by("Note", "body", "zzz").unwrap().is_none());

        // 学习模式下缺少必填属性或重复唯一值都只放宽定义
        db.create("Note", &[("body", "a".into())]).unwrap();
        assert!(!def(&mut db, "Note", "body").unique);
        db.create("Note", &[]).unwrap();
        assert!(!def(&mut db, "Note", "body").required);
        db.commit().unwrap();
    }

    #[test]
    fn test_unique_violation_frozen() {
        let mut db = open(true);
        db.define_type("Account", "string email unique\n").unwrap();
        db.begin().unwrap();
        db.create("Account", &[("email", "a@x.io".into())]).unwrap();
        assert!(matches!(
            db.create("Account", &[("email", "a@x.io".into())]),
            Err(Error::UniquenessViolation { .. })
        ));
        let found = db.get_by("Account", "email", "a@x.io").unwrap();
        assert!(found.is_some());
        db.rollback().unwrap();
    }

    #[test]
    fn test_supertype_chain() {
        let mut db = open(true);
        db.define_type("Animal", "string name\n").unwrap();
        db.define_type("Dog", "\\supertype Animal\nstring breed\n").unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        db.register_hooks(
            "Animal",
            TypeHooks::new()
                .on_init(move |_, _| {
                    l1.borrow_mut().push("init animal");
                    Ok(())
                })
                .on_cleanup(move |_, _| {
                    l3.borrow_mut().push("cleanup animal");
                    Ok(())
                }),
        );
        db.register_hooks(
            "Dog",
            TypeHooks::new().on_init(move |_, _| {
                l2.borrow_mut().push("init dog");
                Ok(())
            }),
        );

        db.begin().unwrap();
        let rex = db
            .create("Dog", &[("name", "Rex".into()), ("breed", "collie".into())])
            .unwrap();
        assert_eq!(*log.borrow(), vec!["init animal", "init dog"]);

        assert!(db.contains_node("Animal", rex.id()).unwrap());
        let typed = db.get_typed_node("Animal", rex.id()).unwrap();
        assert_eq!(typed.type_name(), Some("Dog"));
        let rs = db.type_select("Animal", "name='Rex'", &[]).unwrap();
        assert_eq!(rs.ids(), vec![rex.id()]);
        assert_eq!(db.get_node(rex.id()).unwrap().type_name(), Some("Dog"));

        assert!(matches!(
            db.remove_from_type("Animal", rex.id()),
            Err(Error::InvalidReference(_))
        ));
        db.remove_from_type("Dog", rex.id()).unwrap();
        assert!(log.borrow().contains(&"cleanup animal"));
        assert!(!db.contains_node("Animal", rex.id()).unwrap());
        assert!(db.store.node_predicates(rex.id(), None).unwrap().is_empty());
        db.commit().unwrap();
    }

    #[test]
    fn test_node_type_checked_on_write() {
        let mut db = open(true);
        let (a, _, c) = library(&mut db, "string name\n");
        db.begin().unwrap();
        let draft = db.create("Book", &[("title", "Draft".into())]).unwrap();
        let err = db.node(&draft).unwrap().set("author", c.clone()).unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
        db.node(&draft).unwrap().set("author", a.clone()).unwrap();

        // ri 掩码不允许修改已有的作者
        let err = db.node(&draft).unwrap().set("author", c).unwrap_err();
        assert!(matches!(err, Error::AccessDenied { .. }));
        db.rollback().unwrap();
    }
}
