//! SQLite 存储后端
//!
//! 每种数据类型一张三元组表，外加节点表、ID 序列表与谓词表。
//! 所有表名都带可配置前缀。

use crate::error::Result;
use crate::storage::backend::{Backend, NodeRow, TripleFilter};
use crate::types::{parse_datetime, Datum, DatumType, NodeId, Triple, TripleId, DATETIME_FORMAT};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Type, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// SQLite 后端
pub struct SqliteBackend {
    conn: Connection,
    prefix: String,
    log_queries: bool,
}

impl SqliteBackend {
    /// 打开（或创建）数据库文件
    pub fn open<P: AsRef<Path>>(path: P, prefix: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, prefix)
    }

    /// 内存数据库
    pub fn open_in_memory(prefix: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, prefix)
    }

    fn from_connection(conn: Connection, prefix: &str) -> Result<Self> {
        let mut prefix = prefix.to_string();
        if !prefix.is_empty() && !prefix.ends_with('_') {
            prefix.push('_');
        }
        register_regexp(&conn)?;
        let backend = Self {
            conn,
            prefix,
            log_queries: false,
        };
        if !backend.table_exists("graphene_node")? {
            backend.init_schema()?;
        }
        Ok(backend)
    }

    /// 打开或关闭 SQL 日志
    pub fn set_log_queries(&mut self, on: bool) {
        self.log_queries = on;
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn raw_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn table_name(&self, name: &str) -> String {
        quote_name(&self.raw_name(name))
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "select count(*) from sqlite_master where type='table' and name=?1",
            params![self.raw_name(name)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn log(&self, sql: &str) {
        if self.log_queries {
            debug!(target: "graphene::sql", "{}", sql);
        }
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.log(sql);
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    fn create_datatype(&self, ty: DatumType, sql_type: &str) -> Result<()> {
        let tn = self.datatype_table(ty);
        let raw = self.raw_name(&format!("graphene_triple_{}", ty));
        let mut sql = format!(
            "create table if not exists {} (id integer not null primary key, sub integer not null, \
             pred text not null, ob {} not null, ob_ok integer not null",
            tn, sql_type
        );
        if ty == DatumType::Node {
            sql.push_str(", sub_ok integer not null");
        }
        sql.push(')');
        self.conn.execute_batch(&sql)?;
        self.conn.execute_batch(&format!(
            "create index if not exists {} on {} (sub, pred, ob_ok)",
            quote_name(&format!("{}_sub_idx", raw)),
            tn
        ))?;
        let ob_idx = quote_name(&format!("{}_ob_idx", raw));
        if ty == DatumType::Node {
            self.conn.execute_batch(&format!(
                "create unique index if not exists {} on {} (ob, pred, sub_ok)",
                ob_idx, tn
            ))?;
        } else {
            self.conn.execute_batch(&format!(
                "create index if not exists {} on {} (pred, ob)",
                ob_idx, tn
            ))?;
        }
        Ok(())
    }

    fn create_views(&self) -> Result<()> {
        let mut all_triples = Vec::new();
        let mut all_nodes = Vec::new();
        for ty in DatumType::ALL {
            let tn = self.datatype_table(ty);
            let sub_ok = if ty == DatumType::Node { "sub_ok" } else { "null as sub_ok" };
            all_triples.push(format!(
                "select id, sub, pred, ob, '{}' as type, {}, ob_ok from {}",
                ty, sub_ok, tn
            ));
            all_nodes.push(format!("select sub as node from {}", tn));
            if ty == DatumType::Node {
                all_nodes.push(format!("select ob as node from {}", tn));
            }
        }
        self.conn.execute_batch(&format!(
            "drop view if exists {0}; create view {0} as {1}",
            self.table_name("graphene_all_triples"),
            all_triples.join(" union all ")
        ))?;
        self.conn.execute_batch(&format!(
            "drop view if exists {0}; create view {0} as {1}",
            self.table_name("graphene_all_nodes"),
            all_nodes.join(" union ")
        ))?;
        Ok(())
    }

    fn query_triples(&self, sql: &str, params: &[Value], ty: Option<DatumType>) -> Result<Vec<Triple>> {
        self.log(sql);
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| read_triple(row, ty))?;
        let mut triples = Vec::new();
        for triple in rows {
            triples.push(triple?);
        }
        Ok(triples)
    }

    fn query_i64(&self, sql: &str, params: &[Value]) -> Result<Option<i64>> {
        self.log(sql);
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt
            .query_row(params_from_iter(params.iter()), |row| row.get(0))
            .optional()?)
    }
}

impl Backend for SqliteBackend {
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "create table if not exists {} (id integer not null primary key, props text)",
            self.table_name("graphene_node")
        ))?;
        self.conn.execute_batch(&format!(
            "create table if not exists {} (id integer primary key autoincrement, pred text)",
            self.table_name("graphene_id")
        ))?;
        self.conn.execute_batch(&format!(
            "create table if not exists {} (name text not null primary key, type text)",
            self.table_name("graphene_pred")
        ))?;
        self.create_datatype(DatumType::Node, "integer")?;
        self.create_datatype(DatumType::String, "text")?;
        self.create_datatype(DatumType::Int, "integer")?;
        self.create_datatype(DatumType::Float, "real")?;
        self.create_datatype(DatumType::DateTime, "text")?;
        self.create_views()
    }

    fn load_node(&self, id: NodeId) -> Result<Option<String>> {
        let sql = format!("select props from {} where id=?1", self.node_table());
        self.log(&sql);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let props: Option<Option<String>> = stmt
            .query_row(params![id as i64], |row| row.get(0))
            .optional()?;
        Ok(props.flatten())
    }

    fn insert_node(&self, id: NodeId, props: &str) -> Result<()> {
        let sql = format!(
            "insert into {} (id, props) values (?1, ?2) \
             on conflict(id) do update set props=excluded.props",
            self.node_table()
        );
        self.execute(&sql, &[Value::Integer(id as i64), Value::Text(props.to_string())])?;
        Ok(())
    }

    fn update_node(&self, id: NodeId, props: &str) -> Result<()> {
        // 节点行可能已在本事务中被删除，这里用 upsert 保证行存在
        self.insert_node(id, props)
    }

    fn remove_node(&self, id: NodeId) -> Result<()> {
        let sql = format!("delete from {} where id=?1", self.node_table());
        self.execute(&sql, &[Value::Integer(id as i64)])?;
        Ok(())
    }

    fn load_triple(&self, id: TripleId, ty: DatumType) -> Result<Option<Triple>> {
        let sql = format!(
            "select id, sub, pred, ob, {}, ob_ok from {} where id=?1",
            if ty == DatumType::Node { "sub_ok" } else { "null as sub_ok" },
            self.datatype_table(ty)
        );
        let mut triples = self.query_triples(&sql, &[Value::Integer(id as i64)], Some(ty))?;
        Ok(triples.pop())
    }

    fn insert_triple(&self, triple: &Triple) -> Result<()> {
        let ty = triple.datatype();
        let mut values = vec![
            Value::Integer(triple.id as i64),
            Value::Integer(triple.sub as i64),
            Value::Text(triple.pred.clone()),
            sql_value(&triple.ob),
            Value::Integer(triple.ob_ok),
        ];
        let sql = if ty == DatumType::Node {
            values.push(Value::Integer(triple.sub_ok.unwrap_or(triple.id as i64)));
            format!(
                "insert into {} (id, sub, pred, ob, ob_ok, sub_ok) values (?1, ?2, ?3, ?4, ?5, ?6)",
                self.datatype_table(ty)
            )
        } else {
            format!(
                "insert into {} (id, sub, pred, ob, ob_ok) values (?1, ?2, ?3, ?4, ?5)",
                self.datatype_table(ty)
            )
        };
        self.execute(&sql, &values)?;
        Ok(())
    }

    fn update_triple(&self, triple: &Triple) -> Result<()> {
        let ty = triple.datatype();
        let mut values = vec![
            Value::Integer(triple.sub as i64),
            Value::Text(triple.pred.clone()),
            sql_value(&triple.ob),
            Value::Integer(triple.ob_ok),
            Value::Integer(triple.id as i64),
        ];
        let sql = if ty == DatumType::Node {
            values.push(Value::Integer(triple.sub_ok.unwrap_or(triple.id as i64)));
            format!(
                "update {} set sub=?1, pred=?2, ob=?3, ob_ok=?4, sub_ok=?6 where id=?5",
                self.datatype_table(ty)
            )
        } else {
            format!(
                "update {} set sub=?1, pred=?2, ob=?3, ob_ok=?4 where id=?5",
                self.datatype_table(ty)
            )
        };
        self.execute(&sql, &values)?;
        Ok(())
    }

    fn remove_triple(&self, id: TripleId, ty: DatumType) -> Result<()> {
        let sql = format!("delete from {} where id=?1", self.datatype_table(ty));
        self.execute(&sql, &[Value::Integer(id as i64)])?;
        Ok(())
    }

    fn triple_predicate(&self, id: TripleId) -> Result<Option<String>> {
        let sql = format!("select pred from {} where id=?1", self.table_name("graphene_id"));
        self.log(&sql);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let pred: Option<Option<String>> = stmt
            .query_row(params![id as i64], |row| row.get(0))
            .optional()?;
        Ok(pred.flatten())
    }

    fn update_triple_predicate(&self, id: TripleId, pred: &str) -> Result<()> {
        let sql = format!("update {} set pred=?1 where id=?2", self.table_name("graphene_id"));
        self.execute(&sql, &[Value::Text(pred.to_string()), Value::Integer(id as i64)])?;
        Ok(())
    }

    fn remove_triple_predicate(&self, id: TripleId) -> Result<()> {
        let sql = format!("delete from {} where id=?1", self.table_name("graphene_id"));
        self.execute(&sql, &[Value::Integer(id as i64)])?;
        Ok(())
    }

    fn new_id(&self, pred: Option<&str>) -> Result<u64> {
        let sql = format!("insert into {} (pred) values (?1)", self.table_name("graphene_id"));
        let value = pred.map(|p| Value::Text(p.to_string())).unwrap_or(Value::Null);
        self.execute(&sql, &[value])?;
        Ok(self.conn.last_insert_rowid() as u64)
    }

    fn load_pred(&self, name: &str) -> Result<Option<DatumType>> {
        let sql = format!("select type from {} where name=?1", self.table_name("graphene_pred"));
        self.log(&sql);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let ty: Option<Option<String>> = stmt
            .query_row(params![name], |row| row.get(0))
            .optional()?;
        Ok(ty.flatten().as_deref().and_then(DatumType::parse))
    }

    fn insert_pred(&self, name: &str, ty: DatumType) -> Result<()> {
        let sql = format!(
            "insert or replace into {} (name, type) values (?1, ?2)",
            self.table_name("graphene_pred")
        );
        self.execute(&sql, &[Value::Text(name.to_string()), Value::Text(ty.to_string())])?;
        Ok(())
    }

    fn update_pred(&self, name: &str, ty: DatumType) -> Result<()> {
        let sql = format!("update {} set type=?1 where name=?2", self.table_name("graphene_pred"));
        self.execute(&sql, &[Value::Text(ty.to_string()), Value::Text(name.to_string())])?;
        Ok(())
    }

    fn triple_list(&self, types: &[DatumType], filter: &TripleFilter<'_>) -> Result<Vec<Triple>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let mut parts = Vec::with_capacity(types.len());
        let mut values = Vec::new();
        for ty in types {
            let sub_ok = if *ty == DatumType::Node { "sub_ok" } else { "null as sub_ok" };
            let mut part = format!(
                "select id, sub, pred, ob, '{}' as type, {}, ob_ok from {} where 1",
                ty,
                sub_ok,
                self.datatype_table(*ty)
            );
            if let Some(sub) = filter.sub {
                values.push(Value::Integer(sub as i64));
                part.push_str(&format!(" and sub=?{}", values.len()));
            }
            if let Some(pred) = filter.pred {
                values.push(Value::Text(pred.to_string()));
                part.push_str(&format!(" and pred=?{}", values.len()));
            }
            if let Some(ob) = filter.ob {
                values.push(sql_value(ob));
                part.push_str(&format!(" and ob=?{}", values.len()));
            }
            if let Some(sub_ok) = filter.sub_ok {
                if *ty == DatumType::Node {
                    values.push(Value::Integer(sub_ok));
                    part.push_str(&format!(" and sub_ok=?{}", values.len()));
                } else {
                    part.push_str(" and 0");
                }
            }
            if let Some(ob_ok) = filter.ob_ok {
                values.push(Value::Integer(ob_ok));
                part.push_str(&format!(" and ob_ok=?{}", values.len()));
            }
            parts.push(part);
        }
        let mut sql = parts.join(" union all ");
        let node_ob = matches!(filter.ob, Some(Datum::Node(_))) && types == [DatumType::Node];
        if filter.sub.is_some() {
            sql.push_str(if filter.pred.is_some() { " order by ob_ok" } else { " order by pred, ob_ok" });
        } else if node_ob {
            sql.push_str(if filter.pred.is_some() { " order by sub_ok" } else { " order by pred, sub_ok" });
        } else {
            sql.push_str(" order by id");
        }
        self.query_triples(&sql, &values, None)
    }

    fn next_object_triple_id(&self, triple: &Triple) -> Result<Option<TripleId>> {
        let sql = format!(
            "select id from {} where sub=?1 and pred=?2 and ob_ok>?3 order by ob_ok asc limit 1",
            self.datatype_table(triple.datatype())
        );
        let id = self.query_i64(
            &sql,
            &[
                Value::Integer(triple.sub as i64),
                Value::Text(triple.pred.clone()),
                Value::Integer(triple.ob_ok),
            ],
        )?;
        Ok(id.map(|id| id as TripleId))
    }

    fn next_subject_triple_id(&self, triple: &Triple) -> Result<Option<TripleId>> {
        let (Datum::Node(ob), Some(sub_ok)) = (&triple.ob, triple.sub_ok) else {
            return Ok(None);
        };
        let sql = format!(
            "select id from {} where ob=?1 and pred=?2 and sub_ok>?3 order by sub_ok asc limit 1",
            self.datatype_table(DatumType::Node)
        );
        let id = self.query_i64(
            &sql,
            &[
                Value::Integer(*ob as i64),
                Value::Text(triple.pred.clone()),
                Value::Integer(sub_ok),
            ],
        )?;
        Ok(id.map(|id| id as TripleId))
    }

    fn last_ob_ok(&self, sub: NodeId, pred: &str, ty: DatumType) -> Result<Option<i64>> {
        let sql = format!(
            "select ob_ok from {} where sub=?1 and pred=?2 order by ob_ok desc limit 1",
            self.datatype_table(ty)
        );
        self.query_i64(&sql, &[Value::Integer(sub as i64), Value::Text(pred.to_string())])
    }

    fn last_sub_ok(&self, ob: NodeId, pred: &str, ty: DatumType) -> Result<Option<i64>> {
        if ty != DatumType::Node {
            return Ok(None);
        }
        let sql = format!(
            "select sub_ok from {} where ob=?1 and pred=?2 order by sub_ok desc limit 1",
            self.datatype_table(ty)
        );
        self.query_i64(&sql, &[Value::Integer(ob as i64), Value::Text(pred.to_string())])
    }

    fn write_start(&self) -> Result<()> {
        self.log("begin immediate");
        self.conn.execute_batch("begin immediate")?;
        Ok(())
    }

    fn write_end(&self, commit: bool) -> Result<()> {
        let sql = if commit { "commit" } else { "rollback" };
        self.log(sql);
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn node_table(&self) -> String {
        self.table_name("graphene_node")
    }

    fn datatype_table(&self, ty: DatumType) -> String {
        self.table_name(&format!("graphene_triple_{}", ty))
    }

    fn select_nodes(&self, sql: &str, params: &[Datum]) -> Result<Vec<NodeRow>> {
        self.log(sql);
        let values: Vec<Value> = params.iter().map(sql_value).collect();
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(NodeRow {
                id: row.get::<_, i64>(0)? as NodeId,
                props: row.get(1)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

/// 标识符加双引号
pub fn quote_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// 字符串字面量，SQLite 形式（单引号加倍）
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn sql_value(datum: &Datum) -> Value {
    match datum {
        Datum::Node(id) => Value::Integer(*id as i64),
        Datum::Int(v) => Value::Integer(*v),
        Datum::Float(v) => Value::Real(*v),
        Datum::String(s) => Value::Text(s.clone()),
        Datum::DateTime(dt) => Value::Text(dt.format(DATETIME_FORMAT).to_string()),
    }
}

/// 读取一行三元组：id, sub, pred, ob, type?, sub_ok, ob_ok
///
/// `ty` 为空时从第 5 列读取类型名（联合查询）。
fn read_triple(row: &Row<'_>, ty: Option<DatumType>) -> rusqlite::Result<Triple> {
    let (ty, offset) = match ty {
        Some(ty) => (ty, 0),
        None => {
            let name: String = row.get(4)?;
            let ty = DatumType::parse(&name).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, "未知数据类型".into())
            })?;
            (ty, 1)
        }
    };
    let ob = read_datum(row, 3, ty)?;
    let sub_ok: Option<i64> = row.get(4 + offset)?;
    Ok(Triple {
        id: row.get::<_, i64>(0)? as TripleId,
        sub: row.get::<_, i64>(1)? as NodeId,
        pred: row.get(2)?,
        ob,
        ob_ok: row.get(5 + offset)?,
        sub_ok: if ty == DatumType::Node { sub_ok } else { None },
    })
}

fn read_datum(row: &Row<'_>, idx: usize, ty: DatumType) -> rusqlite::Result<Datum> {
    Ok(match ty {
        DatumType::Node => Datum::Node(row.get::<_, i64>(idx)? as NodeId),
        DatumType::Int => Datum::Int(row.get(idx)?),
        DatumType::Float => Datum::Float(row.get(idx)?),
        DatumType::String => Datum::String(row.get(idx)?),
        DatumType::DateTime => {
            let text: String = row.get(idx)?;
            let dt = parse_datetime(&text).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, "无效的日期时间".into())
            })?;
            Datum::DateTime(dt)
        }
    })
}

/// 注册 `regexp(pattern, text)`，供 `rlike` / `regexp` 运算符使用
fn register_regexp(conn: &Connection) -> Result<()> {
    let mut compiled: HashMap<String, Regex> = HashMap::new();
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let pattern: String = ctx.get(0)?;
            let text = match ctx.get_raw(1) {
                ValueRef::Null => return Ok(false),
                ValueRef::Integer(v) => v.to_string(),
                ValueRef::Real(v) => v.to_string(),
                ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
            };
            if !compiled.contains_key(&pattern) {
                let re = Regex::new(&pattern)
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
                compiled.insert(pattern.clone(), re);
            }
            Ok(compiled.get(&pattern).map(|re| re.is_match(&text)).unwrap_or(false))
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(id: u64, sub: u64, pred: &str, ob: Datum) -> Triple {
        let sub_ok = if ob.datatype() == DatumType::Node { Some(id as i64) } else { None };
        Triple {
            id,
            sub,
            pred: pred.to_string(),
            ob,
            ob_ok: id as i64,
            sub_ok,
        }
    }

    #[test]
    fn test_schema_and_prefix() {
        let backend = SqliteBackend::open_in_memory("test").unwrap();
        assert_eq!(backend.prefix(), "test_");
        assert_eq!(backend.node_table(), "\"test_graphene_node\"");
        assert!(backend.table_exists("graphene_triple_datetime").unwrap());
        backend.init_schema().unwrap();
    }

    #[test]
    fn test_triple_roundtrip_and_ordering() {
        let backend = SqliteBackend::open_in_memory("").unwrap();
        backend.write_start().unwrap();
        let a = backend.new_id(Some("name")).unwrap();
        let b = backend.new_id(Some("name")).unwrap();
        assert!(b > a);
        backend.insert_triple(&triple(b, 1, "name", Datum::String("b".into()))).unwrap();
        let mut first = triple(a, 1, "name", Datum::String("a".into()));
        first.ob_ok = b as i64 + 10;
        backend.insert_triple(&first).unwrap();
        backend.write_end(true).unwrap();

        let list = backend
            .triple_list(&[DatumType::String], &TripleFilter::subject(1).with_pred("name"))
            .unwrap();
        let obs: Vec<_> = list.iter().map(|t| t.ob.to_string()).collect();
        assert_eq!(obs, vec!["b", "a"]);
        assert_eq!(backend.triple_predicate(a).unwrap().as_deref(), Some("name"));
        assert_eq!(
            backend.next_object_triple_id(&list[0]).unwrap(),
            Some(a)
        );
        assert_eq!(backend.last_ob_ok(1, "name", DatumType::String).unwrap(), Some(b as i64 + 10));
    }

    #[test]
    fn test_regexp_function() {
        let backend = SqliteBackend::open_in_memory("").unwrap();
        let matched: bool = backend
            .conn
            .query_row("select 'graphene' regexp '^gra'", [], |row| row.get(0))
            .unwrap();
        assert!(matched);
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_name("a\"b"), "\"a\"\"b\"");
    }
}
