//! 属性图模块
//!
//! 节点是一个整数 ID，属性是按 (主语, 谓词) 分组的有序三元组列表。
//! - [`Database`]: 连接、事务、查询与类型级操作
//! - [`NodeMut`]: 按属性名读写单个节点
//! - [`PropMut`]: 单个属性的有序值列表

mod database;
mod node;
mod node_type;
mod prop;

pub use database::Database;
pub use node::{Node, NodeMut};
pub use prop::PropMut;

/// 没有顶层类型的节点所用的类型
pub const UNTYPED: &str = "Untyped";

/// 顶层类型谓词
pub const TOP_TYPE_PRED: &str = "graphene_topType";

pub(crate) const TYPE_FIELD: &str = "_graphene_type";
pub(crate) const TOP_TYPE_FIELD: &str = "_graphene_topType";
