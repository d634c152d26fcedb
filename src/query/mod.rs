//! GQL 查询模块
//!
//! 路径式布尔过滤语言，编译为一条 SQL：
//!
//! - 路径: `author.name`、`@author`（反向）、`_ns_pred`（绝对名）、`title:en`（语言）
//! - 变量: `#b` 绑定某一步，`Book#b` 绑定一个类型实例
//! - 运算: 比较、`like`、`rlike`/`regexp`、`and`/`or`/`not`、`length`/`rand`/`substr`
//! - 排序与分页: `order by ... [asc|desc]`、`limit n[, m] [offset k]`

mod compiler;
mod lexer;
mod plan;
mod result;

pub use compiler::{compile, CompileContext, PropertyRef, TYPE_PRED};
pub use lexer::{near_text, tokenize, Token, TokenKind};
pub use plan::{JoinTable, PlanCache, Query, QueryPlan, Step, StepId, ROOT_HASH};
pub use result::ResultSet;
