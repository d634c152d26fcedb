//! 数据库连接
//!
//! 一个 [`Database`] 持有三元组存储、类型模式、查询计划缓存和事务嵌套计数。
//! 所有操作在同一线程上顺序执行。

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::graph::node::{Node, NodeMut};
use crate::graph::prop::PropMut;
use crate::graph::{TOP_TYPE_PRED, UNTYPED};
use crate::metrics;
use crate::query::{compile, CompileContext, PlanCache, PropertyRef, Query, ResultSet};
use crate::schema::hooks::{DeleteTrigger, InsertTrigger, UpdateTrigger, Validator};
use crate::schema::name::{parse_pred, type_namespace};
use crate::schema::{Schema, TypeHooks};
use crate::storage::{Backend, NodeRow, SqliteBackend, TripleStore};
use crate::types::{DatumType, Direction, NodeId, Value};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Database {
    pub(crate) store: TripleStore,
    pub(crate) schema: Schema,
    plans: PlanCache,
    /// 事务嵌套深度
    depth: usize,
    /// 正在删除的节点，防止级联删除时无限递归
    pub(crate) deleting: HashSet<NodeId>,
    config: DatabaseConfig,
}

impl Database {
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let prefix = config.table_prefix();
        let mut backend = match &config.path {
            Some(path) => SqliteBackend::open(path, &prefix)?,
            None => SqliteBackend::open_in_memory(&prefix)?,
        };
        backend.set_log_queries(config.log_queries);
        Self::with_backend(Box::new(backend), config)
    }

    /// 在给定后端上打开数据库，后端需已建好表
    pub fn with_backend(backend: Box<dyn Backend>, config: DatabaseConfig) -> Result<Self> {
        let store = TripleStore::new(backend, config.store_options());
        let mut schema = Schema::new(config.classpath.clone(), config.frozen);
        schema.define_type(UNTYPED, "")?;
        info!(
            path = ?config.path,
            frozen = config.frozen,
            classpath = ?config.classpath,
            "打开数据库"
        );
        Ok(Self {
            store,
            schema,
            plans: PlanCache::new(config.query_cache_size),
            depth: 0,
            deleting: HashSet::new(),
            config,
        })
    }

    /// 默认配置的内存数据库（冻结模式）
    pub fn open_in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::in_memory())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    // ==================== 事务 ====================

    /// 只有最外层 begin 真正开启事务
    pub fn begin(&mut self) -> Result<()> {
        if self.depth == 0 {
            self.store.start_writing()?;
        }
        self.depth += 1;
        Ok(())
    }

    /// 只有最外层 commit 真正提交
    pub fn commit(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Ok(());
        }
        self.depth -= 1;
        if self.depth == 0 {
            // 提交失败时存储已回滚，谓词类型绑定可能随之撤销
            if let Err(e) = self.store.commit() {
                self.plans.clear();
                return Err(e);
            }
            debug!("事务已提交");
        }
        Ok(())
    }

    /// 无论嵌套多深都立即回滚全部修改，计划缓存一并清空
    pub fn rollback(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Ok(());
        }
        self.depth = 0;
        self.plans.clear();
        self.store.rollback()?;
        debug!("事务已回滚");
        Ok(())
    }

    pub fn is_writing(&self) -> bool {
        self.depth > 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 在事务中执行 `f`，出错时回滚并返回原错误
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.rollback();
                Err(e)
            }
        }
    }

    // ==================== 模式 ====================

    pub fn freeze(&mut self) {
        self.schema.freeze();
    }

    pub fn unfreeze(&mut self) {
        self.schema.unfreeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.schema.is_frozen()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// 以定义文本注册类型
    pub fn define_type(&mut self, name: &str, text: &str) -> Result<()> {
        self.schema.define_type(name, text)?;
        self.plans.clear();
        Ok(())
    }

    pub fn register_hooks(&mut self, name: &str, hooks: TypeHooks) {
        self.schema.register_hooks(name, hooks);
    }

    /// 修改谓词类型并迁移已有三元组
    pub fn alter_property_type(&mut self, pred: &str, ty: DatumType) -> Result<()> {
        self.transaction(|db| db.store.set_pred_type(pred, ty))?;
        self.plans.clear();
        info!(predicate = pred, datatype = %ty, "修改谓词类型");
        Ok(())
    }

    // ==================== 钩子查找 ====================

    fn find_hook<T>(&self, type_name: &str, pick: impl Fn(&TypeHooks) -> Option<T>) -> Option<T> {
        self.schema.hooks_chain(type_name).iter().find_map(pick)
    }

    pub(crate) fn validator(&self, type_name: &str, names: &[String]) -> Option<Validator> {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.find_hook(type_name, |h| h.get_validator(&names))
    }

    pub(crate) fn inserted_trigger(&self, type_name: &str, names: &[String]) -> Option<InsertTrigger> {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.find_hook(type_name, |h| h.get_inserted(&names))
    }

    pub(crate) fn updated_trigger(&self, type_name: &str, names: &[String]) -> Option<UpdateTrigger> {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.find_hook(type_name, |h| h.get_updated(&names))
    }

    pub(crate) fn deleted_trigger(&self, type_name: &str, names: &[String]) -> Option<DeleteTrigger> {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.find_hook(type_name, |h| h.get_deleted(&names))
    }

    // ==================== 节点 ====================

    /// 节点的顶层类型
    pub(crate) fn top_types(&mut self, id: NodeId) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_triples(Some(id), Some(TOP_TYPE_PRED), None)?
            .into_iter()
            .filter_map(|t| t.ob.as_str().map(str::to_string))
            .collect())
    }

    /// 按 ID 取节点，类型解析为其顶层类型；没有类型的节点类型为空
    pub fn get_node(&mut self, id: NodeId) -> Result<Node> {
        if id == 0 {
            return Err(Error::InvalidReference(format!("无效的节点 ID: {}", id)));
        }
        Ok(match self.top_types(id)?.into_iter().next() {
            Some(top) => Node::typed(id, &top),
            None => Node::new(id),
        })
    }

    /// 打开节点以读写属性
    pub fn node(&mut self, node: &Node) -> Result<NodeMut<'_>> {
        let type_name = match node.type_name() {
            Some(t) => t.to_string(),
            None => self
                .top_types(node.id())?
                .into_iter()
                .next()
                .unwrap_or_else(|| UNTYPED.to_string()),
        };
        self.schema.ensure_type(&type_name)?;
        let node = Node::typed(node.id(), &type_name);
        Ok(NodeMut::new(self, node, type_name, false))
    }

    pub(crate) fn is_deleting(&self, id: NodeId) -> bool {
        self.deleting.contains(&id)
    }

    /// 删除节点：先从每个顶层类型中移除，再清掉剩余的全部三元组
    pub fn delete_node(&mut self, node: &Node) -> Result<()> {
        let id = node.id();
        if !self.deleting.insert(id) {
            return Ok(());
        }
        let result = self.delete_node_inner(id);
        self.deleting.remove(&id);
        result
    }

    fn delete_node_inner(&mut self, id: NodeId) -> Result<()> {
        for top in self.top_types(id)? {
            self.remove_from_type(&top, id)?;
        }
        let keys: Vec<String> = self.store.node_predicates(id, None)?.into_keys().collect();
        for key in keys {
            self.raw_prop(id, key)?.delete()?;
        }
        debug!(node = id, "删除节点");
        Ok(())
    }

    /// 按谓词键（反向带 `@`）打开不受定义约束的属性
    fn raw_prop(&mut self, id: NodeId, key: String) -> Result<PropMut<'_>> {
        let dir = if key.starts_with('@') {
            Direction::Backward
        } else {
            Direction::Forward
        };
        let pred = key.trim_start_matches('@').to_string();
        PropMut::open(self, Node::new(id), UNTYPED.to_string(), pred, dir, None, true)
    }

    /// 节点的全部值，按谓词分组，反向谓词带 `@`
    pub fn node_values(&mut self, id: NodeId) -> Result<IndexMap<String, Vec<Value>>> {
        let keys: Vec<String> = self.store.node_predicates(id, None)?.into_keys().collect();
        let mut values = IndexMap::with_capacity(keys.len());
        for key in keys {
            let list = self.raw_prop(id, key.clone())?.values()?;
            values.insert(key, list);
        }
        Ok(values)
    }

    // ==================== 查询 ====================

    /// 执行 GQL 查询
    pub fn select(&mut self, query: &str, params: &[Value]) -> Result<ResultSet> {
        self.run_query(Query::new(query), params)
    }

    pub(crate) fn run_query(&mut self, query: Query, params: &[Value]) -> Result<ResultSet> {
        let m = metrics::global_metrics();
        let timer = m.record_query_start();
        let result = self.execute(&query, params);
        m.record_query_complete(timer, result.is_ok());
        result
    }

    fn execute(&mut self, query: &Query, params: &[Value]) -> Result<ResultSet> {
        let plan = match self.plans.get(query) {
            Some(plan) => {
                metrics::global_metrics().record_plan_cache_hit();
                plan
            }
            None => {
                let plan = Arc::new(compile(self, query)?);
                self.plans.put(query, plan.clone());
                plan
            }
        };
        let mut datums = Vec::with_capacity(params.len() + query.constraint_params.len());
        for param in params {
            datums.push(param.to_datum()?);
        }
        datums.extend(query.constraint_params.iter().cloned());
        if self.config.log_queries {
            debug!(query = %query.text, sql = %plan.sql, "执行查询");
        }
        let rows = self.store.select_nodes(&plan.sql, &datums)?;
        Ok(ResultSet::new(rows, query.scope.clone()))
    }

    /// 结果集当前行对应的节点，读取时用行内 props 预热节点缓存
    pub fn result_node(&mut self, rs: &ResultSet) -> Result<Option<Node>> {
        match rs.current() {
            Some(row) => self.row_node(rs.scope(), row).map(Some),
            None => Ok(None),
        }
    }

    /// 结果集中的全部节点
    pub fn result_nodes(&mut self, rs: &ResultSet) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(rs.len());
        for row in rs.rows() {
            nodes.push(self.row_node(rs.scope(), row)?);
        }
        Ok(nodes)
    }

    fn row_node(&mut self, scope: Option<&str>, row: &NodeRow) -> Result<Node> {
        if let Some(props) = &row.props {
            self.store.cache_node(row.id, props)?;
        }
        match scope {
            Some(scope) => self.get_typed_node(scope, row.id),
            None => self.get_node(row.id),
        }
    }

    pub fn plan_cache_len(&self) -> usize {
        self.plans.len()
    }

    pub fn cached_nodes(&self) -> usize {
        self.store.cached_nodes()
    }
}

impl CompileContext for Database {
    fn pred_type(&mut self, pred: &str) -> Result<Option<DatumType>> {
        self.store.pred_type(pred)
    }

    fn resolve_property(&mut self, scope: Option<&str>, name: &str) -> Result<PropertyRef> {
        let Some(scope) = scope else {
            let parsed = parse_pred(name, "")?;
            return Ok(PropertyRef {
                pred: parsed.pred,
                dir: parsed.dir,
                node_type: None,
            });
        };
        if let Some(r) = self.schema.find_def(scope, name, false)? {
            let def = self.schema.def(&r)?;
            return Ok(PropertyRef {
                pred: def.pred.clone(),
                dir: def.dir,
                node_type: def.node_type.clone(),
            });
        }
        // 绝对名没有定义时直接按谓词解析，冻结模式也一样
        let absolute = name.trim_start_matches('@').starts_with('_');
        if !absolute && self.schema.type_frozen(scope) {
            return Err(Error::UnknownProperty {
                type_name: scope.to_string(),
                property: name.to_string(),
            });
        }
        let parsed = parse_pred(name, type_namespace(scope))?;
        Ok(PropertyRef {
            pred: parsed.pred,
            dir: parsed.dir,
            node_type: None,
        })
    }

    fn resolve_type(&mut self, name: &str) -> Result<()> {
        self.schema.ensure_type(name).map(|_| ())
    }

    fn node_table(&self) -> String {
        self.store.backend().node_table()
    }

    fn datatype_table(&self, ty: DatumType) -> String {
        self.store.backend().datatype_table(ty)
    }
}
