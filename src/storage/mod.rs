//! 存储引擎模块
//!
//! 属性图落在关系型三元组存储上，包含：
//! - 后端契约与 SQLite 实现
//! - 节点缓存（带序列化 props 与有序三元组列表）
//! - 谓词类型登记
//! - 有序三元组存储

mod backend;
mod node_cache;
mod predicates;
mod sqlite;
mod triple_store;

pub use backend::{Backend, NodeRow, TripleFilter};
pub use node_cache::{
    CachedNode, NodeCache, NodeState, PropList, DEFAULT_LIST_THRESHOLD, DEFAULT_MAX_CACHED_STRING,
    DEFAULT_NODE_CACHE_SIZE,
};
pub use predicates::PredicateRegistry;
pub use sqlite::{quote_literal, quote_name, SqliteBackend};
pub use triple_store::{StoreOptions, TripleStore};
