//! 结果打印器
//!
//! 提供表格和垂直格式的结果输出

use crate::error::{Error, Result};
use crate::graph::Database;
use crate::metrics::MetricsSnapshot;
use crate::query::ResultSet;
use crate::types::{NodeId, Value};
use colored::Colorize;
use prettytable::{format, row, Cell, Row, Table};

/// 打印模式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrintMode {
    /// 表格模式
    Table,
    /// 垂直模式 (\G)
    Vertical,
}

/// 结果打印器
pub struct Printer {
    mode: PrintMode,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new(PrintMode::Table)
    }
}

const COLUMNS: [&str; 3] = ["id", "type", "props"];

impl Printer {
    pub fn new(mode: PrintMode) -> Self {
        Self { mode }
    }

    pub fn set_mode(&mut self, mode: PrintMode) {
        self.mode = mode;
    }

    /// 打印查询结果：每行一个节点的 ID、顶层类型和全部属性
    pub fn print_result(&self, db: &mut Database, rs: &ResultSet, elapsed_ms: u64) -> Result<String> {
        if rs.is_empty() {
            return Ok(format!("Empty set ({} ms)\n", elapsed_ms));
        }
        let mut rows = Vec::with_capacity(rs.len());
        for node in db.result_nodes(rs)? {
            let props = db
                .node_values(node.id())?
                .into_iter()
                .filter(|(key, _)| !key.starts_with("graphene_"))
                .map(|(key, values)| format!("{}={}", key, join_values(&values)))
                .collect::<Vec<_>>()
                .join("\n");
            rows.push(vec![
                node.id().to_string(),
                node.type_name().unwrap_or("-").to_string(),
                props,
            ]);
        }

        let output = match self.mode {
            PrintMode::Table => self.format_table(&COLUMNS, &rows),
            PrintMode::Vertical => self.format_vertical(&COLUMNS, &rows),
        };
        Ok(format!(
            "{}\n{} row(s) in set ({} ms)\n",
            output,
            rows.len(),
            elapsed_ms
        ))
    }

    /// 单个节点的全部谓词，反向谓词带 `@`
    pub fn print_node(&self, db: &mut Database, id: NodeId) -> Result<String> {
        let node = db.get_node(id)?;
        let values = db.node_values(id)?;
        if values.is_empty() {
            return Ok(format!("节点 #{} 没有任何属性\n", id));
        }
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BOX_CHARS);
        table.set_titles(row!["Predicate", "Values"]);
        for (key, list) in &values {
            table.add_row(row![key, join_values(list)]);
        }
        Ok(format!(
            "#{} ({})\n{}",
            id,
            node.type_name().unwrap_or("untyped"),
            table
        ))
    }

    fn format_table(&self, columns: &[&str], rows: &[Vec<String>]) -> String {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BOX_CHARS);

        let header: Vec<Cell> = columns.iter().map(|c| Cell::new(c)).collect();
        table.set_titles(Row::new(header));

        for row_data in rows {
            let cells: Vec<Cell> = row_data.iter().map(|v| Cell::new(v)).collect();
            table.add_row(Row::new(cells));
        }

        table.to_string()
    }

    fn format_vertical(&self, columns: &[&str], rows: &[Vec<String>]) -> String {
        let max_col_width = columns.iter().map(|c| c.len()).max().unwrap_or(0);
        let mut output = String::new();

        for (i, row_data) in rows.iter().enumerate() {
            output.push_str(&format!(
                "*************************** {}. row ***************************\n",
                i + 1
            ));
            for (j, col) in columns.iter().enumerate() {
                let value = row_data.get(j).map(|s| s.as_str()).unwrap_or("");
                let value = value.replace('\n', "; ");
                output.push_str(&format!("{:>width$}: {}\n", col, value, width = max_col_width));
            }
        }

        output
    }

    /// 打印运行指标
    pub fn print_stats(&self, snapshot: &MetricsSnapshot, cached_nodes: usize, cached_plans: usize) -> String {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BOX_CHARS);
        table.set_titles(row!["Metric", "Value"]);
        table.add_row(row!["Queries", snapshot.total_queries]);
        table.add_row(row!["Failed queries", snapshot.failed_queries]);
        table.add_row(row!["Avg query (ms)", format!("{:.3}", snapshot.avg_query_duration_ms)]);
        table.add_row(row!["Plan cache hits", snapshot.plan_cache_hits]);
        table.add_row(row!["Cached plans", cached_plans]);
        table.add_row(row!["Cached nodes", cached_nodes]);
        table.add_row(row![
            "Node cache hit rate",
            format!("{:.1}%", snapshot.node_cache_hit_rate * 100.0)
        ]);
        table.add_row(row!["Node evictions", snapshot.node_cache_evictions]);
        table.add_row(row!["Dirty writes", snapshot.node_cache_dirty_writes]);
        table.add_row(row!["Triples inserted", snapshot.triples_inserted]);
        table.add_row(row!["Triples removed", snapshot.triples_removed]);
        table.add_row(row!["Triples migrated", snapshot.triples_migrated]);
        table.add_row(row!["Uptime (s)", snapshot.uptime_seconds]);
        table.to_string()
    }

    pub fn print_help() -> String {
        r#"
═══════════════════════════════════════════════════════════════
                   Graphene CLI 命令帮助
═══════════════════════════════════════════════════════════════

直接输入 GQL 过滤条件即可查询，例如:
  name='John'
  Book#b and #b.author.name like 'J%'
  @author.title rlike '^X' order by name desc limit 10
  title:en='Colour'

控制台命令 (以 : 开头):
  :help, :h              显示帮助
  :quit, :q              退出程序（未提交的事务会回滚）
  :stats                 显示运行指标
  :begin                 开始事务（可嵌套）
  :commit                提交
  :rollback              回滚全部未提交修改
  :node <id>             查看节点的全部属性
  :type <Name> [filter]  在类型实例中查询

提示: 在查询末尾加 \G 可垂直显示结果
═══════════════════════════════════════════════════════════════
"#
        .to_string()
    }
}

fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// 错误着色：模式违规用黄色，其余用红色
pub fn format_error(e: &Error) -> String {
    if e.is_schema_violation() {
        format!("模式违规: {}", e).yellow().to_string()
    } else {
        format!("错误: {}", e).red().to_string()
    }
}

/// 检查查询是否以 \G 结尾（垂直显示）
pub fn check_vertical_display(query: &str) -> (String, bool) {
    let trimmed = query.trim();
    if trimmed.ends_with("\\G") || trimmed.ends_with("\\g") {
        let clean_query = trimmed[..trimmed.len() - 2].trim().to_string();
        (clean_query, true)
    } else {
        (trimmed.to_string(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn sample() -> (Database, NodeId) {
        let mut db = Database::open(DatabaseConfig::in_memory().unfrozen()).unwrap();
        let id = db
            .transaction(|db| {
                let node = db.create("Person", &[("name", "John".into()), ("age", 40.into())])?;
                Ok(node.id())
            })
            .unwrap();
        (db, id)
    }

    #[test]
    fn test_vertical_suffix() {
        assert_eq!(check_vertical_display("name='a' \\G"), ("name='a'".to_string(), true));
        assert_eq!(check_vertical_display(" name='a' "), ("name='a'".to_string(), false));
    }

    #[test]
    fn test_print_result() {
        let (mut db, id) = sample();
        let rs = db.select("name='John'", &[]).unwrap();
        let printer = Printer::default();
        let out = printer.print_result(&mut db, &rs, 3).unwrap();
        assert!(out.contains("1 row(s) in set (3 ms)"));
        assert!(out.contains("Person"));
        assert!(out.contains("name=John"));
        assert!(!out.contains("graphene_type"));

        let mut vertical = Printer::new(PrintMode::Vertical);
        vertical.set_mode(PrintMode::Vertical);
        let out = vertical.print_result(&mut db, &rs, 0).unwrap();
        assert!(out.contains(&format!("id: {}", id)));

        let empty = db.select("name='Nobody'", &[]).unwrap();
        assert_eq!(printer.print_result(&mut db, &empty, 1).unwrap(), "Empty set (1 ms)\n");
    }

    #[test]
    fn test_print_node() {
        let (mut db, id) = sample();
        let out = Printer::default().print_node(&mut db, id).unwrap();
        assert!(out.starts_with(&format!("#{} (Person)", id)));
        assert!(out.contains("age"));
        assert!(out.contains("40"));
    }

    #[test]
    fn test_format_error() {
        colored::control::set_override(false);
        let violation = Error::CardinalityViolation("属性 Book.author 是单值的".into());
        assert!(format_error(&violation).starts_with("模式违规"));
        assert!(format_error(&Error::NotWritable).starts_with("错误"));
    }
}
