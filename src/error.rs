//! 错误类型定义

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{message}，位于 \"...{near}\" (偏移 {position})")]
    SyntaxError {
        message: String,
        position: usize,
        near: String,
    },

    #[error("未绑定的变量: {0}")]
    UnboundVariable(String),

    #[error("变量 {0} 已绑定到其他路径")]
    HashAlreadyBound(String),

    #[error("类型 {type_name} 没有属性: {property}")]
    UnknownProperty { type_name: String, property: String },

    #[error("未知类型: {0}")]
    UnknownType(String),

    #[error("类型冲突: 谓词 {predicate} 的类型为 {declared}，写入的是 {actual}")]
    TypeConflict {
        predicate: String,
        declared: String,
        actual: String,
    },

    #[error("无法将 {from} 转换为 {to}: {value}")]
    CastError {
        from: String,
        to: String,
        value: String,
    },

    #[error("数据库不在写模式")]
    NotWritable,

    #[error("只读存储")]
    ReadOnly,

    #[error("属性 {property} 是必填的 (节点 #{node})")]
    RequiredViolation { property: String, node: u64 },

    #[error("值 \"{value}\" 在属性 {property} 上不唯一")]
    UniquenessViolation { property: String, value: String },

    #[error("基数错误: {0}")]
    CardinalityViolation(String),

    #[error("循环引用: {0}")]
    LoopError(String),

    #[error("无效的节点引用: {0}")]
    InvalidReference(String),

    #[error("不允许 {operation} 属性 {property}")]
    AccessDenied { operation: String, property: String },

    #[error("无效的名称: {0}")]
    InvalidName(String),

    #[error("无效的语言代码: {0}")]
    InvalidLanguage(String),

    #[error("定义错误: {0}")]
    DefinitionError(String),

    #[error("校验失败: {0}")]
    Validation(String),

    #[error("存储错误: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl Error {
    /// 是否为自动放宽模式下可修复的模式违规
    pub fn is_schema_violation(&self) -> bool {
        matches!(
            self,
            Error::UnknownProperty { .. }
                | Error::TypeConflict { .. }
                | Error::RequiredViolation { .. }
                | Error::UniquenessViolation { .. }
                | Error::CardinalityViolation(_)
                | Error::AccessDenied { .. }
        )
    }
}
