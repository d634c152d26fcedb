//! Graphene - 建在关系型三元组存储上的属性图
//!
//! - 节点的每个属性都是一个有序值列表，插入、移动、删除都保持顺序
//! - 类型定义可以冻结，也可以在学习模式下随使用自动放宽
//! - GQL 路径查询语言，编译为一条 SQL 在 SQLite 上执行
//!
//! ```no_run
//! use graphene::{Database, DatabaseConfig, Value};
//!
//! # fn main() -> graphene::Result<()> {
//! let mut db = Database::open(DatabaseConfig::in_memory().unfrozen())?;
//! db.begin()?;
//! let james = db.create("Person", &[("name", "James".into())])?;
//! db.create("Book", &[("title", "X".into()), ("author", james.clone().into())])?;
//! db.commit()?;
//!
//! let books = db.select("Book#b and #b.author=?", &[Value::from(james)])?;
//! assert_eq!(books.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod query;
pub mod schema;
pub mod storage;
pub mod types;

// 重导出常用类型
pub use config::DatabaseConfig;
pub use error::{Error, Result};
pub use graph::{Database, Node, NodeMut, PropMut};
pub use query::{Query, ResultSet};
pub use schema::{Schema, TypeHooks};
pub use types::{Datum, DatumType, Direction, Value};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
