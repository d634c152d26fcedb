//! 数据类型定义
//!
//! 三元组的对象值（Datum）、数据类型、方向以及对外暴露的属性值（Value）

use crate::error::{Error, Result};
use crate::graph::Node;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 节点 ID（正整数）
pub type NodeId = u64;

/// 三元组 ID（全局唯一，不可变）
pub type TripleId = u64;

/// 日期时间的规范文本格式
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 数据类型，每种类型对应一张三元组表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatumType {
    Node,
    Int,
    Float,
    String,
    DateTime,
}

impl DatumType {
    /// 所有数据类型，按建表顺序
    pub const ALL: [DatumType; 5] = [
        DatumType::Node,
        DatumType::Int,
        DatumType::Float,
        DatumType::DateTime,
        DatumType::String,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatumType::Node => "node",
            DatumType::Int => "int",
            DatumType::Float => "float",
            DatumType::String => "string",
            DatumType::DateTime => "datetime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node" => Some(DatumType::Node),
            "int" => Some(DatumType::Int),
            "float" => Some(DatumType::Float),
            "string" => Some(DatumType::String),
            "datetime" => Some(DatumType::DateTime),
            _ => None,
        }
    }
}

impl fmt::Display for DatumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 属性方向：正向（节点为主语）或反向（节点为宾语）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// props 键前缀：`>` 正向，`<` 反向
    pub fn marker(&self) -> char {
        match self {
            Direction::Forward => '>',
            Direction::Backward => '<',
        }
    }

    pub fn from_marker(c: char) -> Option<Self> {
        match c {
            '>' => Some(Direction::Forward),
            '<' => Some(Direction::Backward),
            _ => None,
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    /// 名称前缀：反向属性以 `@` 开头
    pub fn prefix(&self) -> &'static str {
        match self {
            Direction::Forward => "",
            Direction::Backward => "@",
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Forward
    }
}

/// 三元组的对象值
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Node(NodeId),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
}

impl Datum {
    pub fn datatype(&self) -> DatumType {
        match self {
            Datum::Node(_) => DatumType::Node,
            Datum::Int(_) => DatumType::Int,
            Datum::Float(_) => DatumType::Float,
            Datum::String(_) => DatumType::String,
            Datum::DateTime(_) => DatumType::DateTime,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Datum::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    /// 超过长度阈值的字符串不进入节点缓存
    pub fn text_len(&self) -> usize {
        match self {
            Datum::String(s) => s.len(),
            _ => 0,
        }
    }

    /// 按目标类型转换
    pub fn cast(self, target: DatumType) -> Result<Datum> {
        let from = self.datatype();
        if from == target {
            return Ok(self);
        }
        let fail = |value: String| Error::CastError {
            from: from.to_string(),
            to: target.to_string(),
            value,
        };
        match target {
            DatumType::Int | DatumType::Node => {
                let n = match self {
                    Datum::Int(v) => v,
                    Datum::Node(v) => v as i64,
                    Datum::Float(v) => v.trunc() as i64,
                    Datum::String(ref s) => parse_int_prefix(s),
                    Datum::DateTime(dt) => return Err(fail(dt.format(DATETIME_FORMAT).to_string())),
                };
                if target == DatumType::Node {
                    if n < 1 {
                        return Err(fail(self.to_string()));
                    }
                    Ok(Datum::Node(n as NodeId))
                } else {
                    Ok(Datum::Int(n))
                }
            }
            DatumType::Float => match self {
                Datum::Int(v) => Ok(Datum::Float(v as f64)),
                Datum::Node(v) => Ok(Datum::Float(v as f64)),
                Datum::String(s) => Ok(Datum::Float(parse_float_prefix(&s))),
                other => Err(fail(other.to_string())),
            },
            DatumType::DateTime => match self {
                Datum::String(s) => parse_datetime(&s).map(Datum::DateTime).ok_or_else(|| fail(s)),
                other => Err(fail(other.to_string())),
            },
            DatumType::String => Ok(Datum::String(self.to_string())),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Node(id) => write!(f, "Node {}", id),
            Datum::Int(v) => write!(f, "{}", v),
            Datum::Float(v) => write!(f, "{}", v),
            Datum::String(s) => write!(f, "{}", s),
            Datum::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
        }
    }
}

/// 解析整数前缀，无法解析时为 0
fn parse_int_prefix(s: &str) -> i64 {
    let t = s.trim_start();
    let end = t
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    t[..end].parse().unwrap_or(0)
}

/// 解析浮点数前缀，无法解析时为 0
fn parse_float_prefix(s: &str) -> f64 {
    let t = s.trim_start();
    let mut end = 0;
    for i in (1..=t.len()).rev() {
        if t.is_char_boundary(i) && t[..i].parse::<f64>().is_ok() {
            end = i;
            break;
        }
    }
    t[..end].parse().unwrap_or(0.0)
}

/// 解析日期时间文本
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in [DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// 三元组：(id, 主语, 谓词, 宾语, 排序键)
#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub id: TripleId,
    pub sub: NodeId,
    pub pred: String,
    pub ob: Datum,
    /// 同一 (主语, 谓词) 下宾语的排序键
    pub ob_ok: i64,
    /// 同一 (宾语, 谓词) 下主语的排序键，仅节点类型存在
    pub sub_ok: Option<i64>,
}

impl Triple {
    pub fn datatype(&self) -> DatumType {
        self.ob.datatype()
    }

    /// 给定方向上的排序键
    pub fn order_key(&self, dir: Direction) -> i64 {
        match dir {
            Direction::Forward => self.ob_ok,
            Direction::Backward => self.sub_ok.unwrap_or(self.ob_ok),
        }
    }

    /// 给定方向上"另一端"的值：正向为宾语，反向为主语
    pub fn far_end(&self, dir: Direction) -> Datum {
        match dir {
            Direction::Forward => self.ob.clone(),
            Direction::Backward => Datum::Node(self.sub),
        }
    }
}

/// 对外的属性值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
    Node(Node),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Node(_) => "node",
            Value::List(_) => "list",
        }
    }

    /// 空值：null、空字符串或空列表
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// 转为存储用的 Datum；布尔值存为整数，列表与 null 无对应
    pub fn to_datum(&self) -> Result<Datum> {
        match self {
            Value::Bool(b) => Ok(Datum::Int(*b as i64)),
            Value::Int(v) => Ok(Datum::Int(*v)),
            Value::Float(v) => Ok(Datum::Float(*v)),
            Value::String(s) => Ok(Datum::String(s.clone())),
            Value::DateTime(dt) => Ok(Datum::DateTime(*dt)),
            Value::Node(n) => Ok(Datum::Node(n.id())),
            Value::Null | Value::List(_) => Err(Error::Validation(format!(
                "无法存储 {} 类型的值",
                self.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", *b as i64),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::Node(n) => write!(f, "Node {}", n.id()),
            Value::List(l) => {
                let parts: Vec<String> = l.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Node> for Value {
    fn from(v: Node) -> Self {
        Value::Node(v)
    }
}

impl From<&Node> for Value {
    fn from(v: &Node) -> Self {
        Value::Node(v.clone())
    }
}

/// 节点值不带类型，访问时再解析
impl From<Datum> for Value {
    fn from(d: Datum) -> Self {
        match d {
            Datum::Node(id) => Value::Node(Node::new(id)),
            Datum::Int(v) => Value::Int(v),
            Datum::Float(v) => Value::Float(v),
            Datum::String(s) => Value::String(s),
            Datum::DateTime(dt) => Value::DateTime(dt),
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
