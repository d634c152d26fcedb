//! 查询计划
//!
//! 路径中的每一步对应一个 [`Step`]，每个不同的连接键只生成一个 [`JoinTable`]。

use crate::types::{Datum, DatumType, Direction};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// 步骤在编译器中的下标；0 号是根节点 `#x`
pub type StepId = usize;

pub const ROOT_STEP: StepId = 0;
pub const ROOT_HASH: &str = "#x";
pub const ROOT_VALUE: &str = "n.id";

/// 路径中的一步
#[derive(Debug, Clone)]
pub struct Step {
    pub pred: String,
    pub dir: Direction,
    pub lang: Option<String>,
    pub hash: Option<String>,
    /// 该步到达的节点类型
    pub node_type: Option<String>,
    pub datatype: DatumType,
    pub prev: Option<StepId>,
    /// 从根开始的完整路径标识
    pub key: String,
    /// 对应的连接表；根节点没有
    pub table: Option<usize>,
}

impl Step {
    pub fn root(scope: Option<String>) -> Self {
        Self {
            pred: String::new(),
            dir: Direction::Forward,
            lang: None,
            hash: Some(ROOT_HASH.to_string()),
            node_type: scope,
            datatype: DatumType::Node,
            prev: None,
            key: ROOT_HASH.to_string(),
            table: None,
        }
    }

    /// 带方向与语言后缀的名称，用于拼接连接键
    pub fn full_name(&self) -> String {
        format!("{}{}", self.dir.prefix(), self.table_pred())
    }

    /// 三元组表中的谓词名
    pub fn table_pred(&self) -> String {
        match &self.lang {
            Some(lang) => format!("{}:{}", self.pred, lang),
            None => self.pred.clone(),
        }
    }
}

/// 一次连接
#[derive(Debug, Clone)]
pub struct JoinTable {
    pub alias: String,
    pub pred: String,
    pub datatype: DatumType,
    /// 连接到上一步的列
    pub link: String,
    /// 该步取值的列
    pub value: String,
    /// `on` 子句中谓词条件之后的部分
    pub filter: String,
    /// 为 true 时生成 left join
    pub optional: bool,
}

impl JoinTable {
    pub fn new(index: usize, pred: String, datatype: DatumType, dir: Direction) -> Self {
        let alias = format!("t{}", index);
        let (link, value) = match dir {
            Direction::Forward => (format!("{}.sub", alias), format!("{}.ob", alias)),
            Direction::Backward => (format!("{}.ob", alias), format!("{}.sub", alias)),
        };
        Self {
            alias,
            pred,
            datatype,
            link,
            value,
            filter: String::new(),
            optional: true,
        }
    }

    pub fn add_filter(&mut self, condition: &str) {
        if !self.filter.contains(condition) {
            self.filter.push_str(condition);
        }
    }
}

/// 编译结果
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub sql: String,
    /// 编译时所有谓词类型都已知；只有这样的计划可以缓存
    pub fully_typed: bool,
    pub joins: usize,
}

/// 一次查询：过滤文本、作用类型与附加约束
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: String,
    pub scope: Option<String>,
    pub constraints: Vec<String>,
    /// 约束中的参数，排在调用参数之后
    pub constraint_params: Vec<Datum>,
}

impl Query {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn scoped(mut self, type_name: &str) -> Self {
        self.scope = Some(type_name.to_string());
        self
    }

    /// 追加约束，与主过滤条件 and 连接
    pub fn constraint(mut self, text: &str, params: Vec<Datum>) -> Self {
        self.constraints.push(text.to_string());
        self.constraint_params.extend(params);
        self
    }

    fn cache_key(&self) -> PlanKey {
        PlanKey {
            scope: self.scope.clone(),
            constraints: self.constraints.clone(),
            text: self.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlanKey {
    scope: Option<String>,
    constraints: Vec<String>,
    text: String,
}

/// 按 (作用类型, 约束, 查询文本) 缓存的计划
pub struct PlanCache {
    plans: LruCache<PlanKey, Arc<QueryPlan>>,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            plans: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, query: &Query) -> Option<Arc<QueryPlan>> {
        self.plans.get(&query.cache_key()).cloned()
    }

    /// 只缓存类型完整的计划
    pub fn put(&mut self, query: &Query, plan: Arc<QueryPlan>) {
        if plan.fully_typed {
            self.plans.put(query.cache_key(), plan);
        }
    }

    pub fn clear(&mut self) {
        self.plans.clear();
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}
