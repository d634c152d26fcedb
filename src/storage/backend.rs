//! 存储后端契约
//!
//! 三元组存储只通过这个 trait 访问关系型后端：节点表、按数据类型分区的三元组表、
//! 谓词登记表与 ID 序列表。后端不做缓存，缓存由 [`TripleStore`](super::TripleStore) 负责。

use crate::error::Result;
use crate::types::{Datum, DatumType, NodeId, Triple, TripleId};

/// 三元组列表过滤条件，未设置的字段不参与过滤
#[derive(Debug, Clone, Copy, Default)]
pub struct TripleFilter<'a> {
    pub sub: Option<NodeId>,
    pub pred: Option<&'a str>,
    pub ob: Option<&'a Datum>,
    pub sub_ok: Option<i64>,
    pub ob_ok: Option<i64>,
}

impl<'a> TripleFilter<'a> {
    pub fn subject(sub: NodeId) -> Self {
        Self {
            sub: Some(sub),
            ..Default::default()
        }
    }

    pub fn predicate(pred: &'a str) -> Self {
        Self {
            pred: Some(pred),
            ..Default::default()
        }
    }

    pub fn with_pred(mut self, pred: &'a str) -> Self {
        self.pred = Some(pred);
        self
    }

    pub fn with_ob(mut self, ob: &'a Datum) -> Self {
        self.ob = Some(ob);
        self
    }

    pub fn with_ob_ok(mut self, ok: i64) -> Self {
        self.ob_ok = Some(ok);
        self
    }

    pub fn with_sub_ok(mut self, ok: i64) -> Self {
        self.sub_ok = Some(ok);
        self
    }
}

/// 查询结果行：节点 ID 与其序列化 props
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub id: NodeId,
    pub props: Option<String>,
}

/// 关系型存储后端
pub trait Backend {
    /// 建表（幂等）
    fn init_schema(&self) -> Result<()>;

    // ==================== 节点行 ====================

    fn load_node(&self, id: NodeId) -> Result<Option<String>>;
    fn insert_node(&self, id: NodeId, props: &str) -> Result<()>;
    fn update_node(&self, id: NodeId, props: &str) -> Result<()>;
    fn remove_node(&self, id: NodeId) -> Result<()>;

    /// 写期间的读锁提示，不支持行锁的后端可以忽略
    fn lock_node(&self, _id: NodeId) -> Result<()> {
        Ok(())
    }

    // ==================== 三元组行 ====================

    fn load_triple(&self, id: TripleId, ty: DatumType) -> Result<Option<Triple>>;
    fn insert_triple(&self, triple: &Triple) -> Result<()>;
    fn update_triple(&self, triple: &Triple) -> Result<()>;
    fn remove_triple(&self, id: TripleId, ty: DatumType) -> Result<()>;

    /// 三元组 ID 到谓词名的映射（存放在 ID 序列表中）
    fn triple_predicate(&self, id: TripleId) -> Result<Option<String>>;
    fn update_triple_predicate(&self, id: TripleId, pred: &str) -> Result<()>;
    fn remove_triple_predicate(&self, id: TripleId) -> Result<()>;

    /// 分配一个新 ID，三元组与节点共用同一序列
    fn new_id(&self, pred: Option<&str>) -> Result<u64>;

    // ==================== 谓词登记 ====================

    fn load_pred(&self, name: &str) -> Result<Option<DatumType>>;
    fn insert_pred(&self, name: &str, ty: DatumType) -> Result<()>;
    fn update_pred(&self, name: &str, ty: DatumType) -> Result<()>;

    // ==================== 列表与排序键 ====================

    /// 按给定数据类型的表联合查询三元组
    ///
    /// 有主语时按 `pred, ob_ok`（指定谓词时按 `ob_ok`）排序，
    /// 只有节点宾语时按 `pred, sub_ok`（或 `sub_ok`）排序。
    fn triple_list(&self, types: &[DatumType], filter: &TripleFilter<'_>) -> Result<Vec<Triple>>;

    /// 同一 (sub, pred) 下 ob_ok 大于给定三元组的第一个三元组
    fn next_object_triple_id(&self, triple: &Triple) -> Result<Option<TripleId>>;

    /// 同一 (ob, pred) 下 sub_ok 大于给定三元组的第一个三元组
    fn next_subject_triple_id(&self, triple: &Triple) -> Result<Option<TripleId>>;

    fn last_ob_ok(&self, sub: NodeId, pred: &str, ty: DatumType) -> Result<Option<i64>>;
    fn last_sub_ok(&self, ob: NodeId, pred: &str, ty: DatumType) -> Result<Option<i64>>;

    // ==================== 事务 ====================

    fn write_start(&self) -> Result<()>;
    fn write_end(&self, commit: bool) -> Result<()>;

    // ==================== 查询 ====================

    /// 节点表名（已加引号）
    fn node_table(&self) -> String;

    /// 数据类型对应的三元组表名（已加引号）
    fn datatype_table(&self, ty: DatumType) -> String;

    /// 执行编译好的查询，返回节点行
    fn select_nodes(&self, sql: &str, params: &[Datum]) -> Result<Vec<NodeRow>>;
}
