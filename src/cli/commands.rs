//! 控制台命令处理
//!
//! 处理以 : 开头的控制台命令

use crate::cli::printer::{format_error, Printer};
use crate::error::Result;
use crate::graph::Database;
use crate::metrics;
use crate::types::NodeId;
use std::time::Instant;

/// 控制台命令执行结果
pub enum CommandResult {
    /// 继续运行
    Continue,
    /// 退出程序
    Exit,
    /// 显示消息
    Message(String),
    /// 错误
    Error(String),
}

fn outcome(result: Result<String>) -> CommandResult {
    match result {
        Ok(message) => CommandResult::Message(message),
        Err(e) => CommandResult::Error(format_error(&e)),
    }
}

/// 解析并执行控制台命令
pub fn execute_console_command(input: &str, db: &mut Database, printer: &Printer) -> CommandResult {
    let cmd_line = input.trim().trim_start_matches(':');
    let (cmd, args) = match cmd_line.split_once(char::is_whitespace) {
        Some((cmd, args)) => (cmd, args.trim()),
        None => (cmd_line, ""),
    };

    match cmd.to_lowercase().as_str() {
        "help" | "h" => CommandResult::Message(Printer::print_help()),

        "quit" | "q" | "exit" => CommandResult::Exit,

        "stats" => CommandResult::Message(printer.print_stats(
            &metrics::global_metrics().snapshot(),
            db.cached_nodes(),
            db.plan_cache_len(),
        )),

        "begin" => outcome(db.begin().map(|_| format!("事务已开始（深度 {}）", db.depth()))),

        "commit" => {
            if !db.is_writing() {
                return CommandResult::Error("没有进行中的事务".to_string());
            }
            outcome(db.commit().map(|_| match db.depth() {
                0 => "已提交".to_string(),
                depth => format!("内层事务结束，仍在深度 {}", depth),
            }))
        }

        "rollback" => {
            if !db.is_writing() {
                return CommandResult::Error("没有进行中的事务".to_string());
            }
            outcome(db.rollback().map(|_| "已回滚".to_string()))
        }

        "node" => match args.parse::<NodeId>() {
            Ok(id) => outcome(printer.print_node(db, id)),
            Err(_) => CommandResult::Error("用法: :node <id>".to_string()),
        },

        "type" => {
            let (type_name, filter) = match args.split_once(char::is_whitespace) {
                Some((name, filter)) => (name, filter.trim()),
                None => (args, ""),
            };
            if type_name.is_empty() {
                return CommandResult::Error("用法: :type <Name> [filter]".to_string());
            }
            let start = Instant::now();
            outcome(db.type_select(type_name, filter, &[]).and_then(|rs| {
                printer.print_result(db, &rs, start.elapsed().as_millis() as u64)
            }))
        }

        "" => CommandResult::Continue,

        _ => CommandResult::Error(format!("Unknown command: {}. Type :help for help.", cmd)),
    }
}

/// 检查输入是否是控制台命令
pub fn is_console_command(input: &str) -> bool {
    input.trim().starts_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn message(result: CommandResult) -> String {
        match result {
            CommandResult::Message(m) => m,
            CommandResult::Error(e) => panic!("unexpected error: {}", e),
            CommandResult::Exit => panic!("unexpected exit"),
            CommandResult::Continue => String::new(),
        }
    }

    #[test]
    fn test_transaction_commands() {
        let mut db = Database::open(DatabaseConfig::in_memory().unfrozen()).unwrap();
        let printer = Printer::default();
        assert!(matches!(
            execute_console_command(":commit", &mut db, &printer),
            CommandResult::Error(_)
        ));
        assert!(message(execute_console_command(":begin", &mut db, &printer)).contains('1'));
        db.create("Tag", &[("label", "rust".into())]).unwrap();
        message(execute_console_command(":begin", &mut db, &printer));
        assert!(message(execute_console_command(":commit", &mut db, &printer)).contains('1'));
        assert_eq!(message(execute_console_command(":rollback", &mut db, &printer)), "已回滚");
        assert!(!db.is_writing());
        assert!(db.select("label", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_node_and_type_commands() {
        let mut db = Database::open(DatabaseConfig::in_memory().unfrozen()).unwrap();
        let printer = Printer::default();
        let tag = db
            .transaction(|db| db.create("Tag", &[("label", "rust".into())]))
            .unwrap();

        let out = message(execute_console_command(&format!(":node {}", tag.id()), &mut db, &printer));
        assert!(out.contains("label"));
        let out = message(execute_console_command(":type Tag label='rust'", &mut db, &printer));
        assert!(out.contains("1 row(s)"));
        let out = message(execute_console_command(":type Tag", &mut db, &printer));
        assert!(out.contains("1 row(s)"));

        assert!(matches!(
            execute_console_command(":node abc", &mut db, &printer),
            CommandResult::Error(_)
        ));
        assert!(matches!(
            execute_console_command(":frobnicate", &mut db, &printer),
            CommandResult::Error(_)
        ));
        assert!(matches!(
            execute_console_command(":quit", &mut db, &printer),
            CommandResult::Exit
        ));
        assert!(message(execute_console_command(":stats", &mut db, &printer)).contains("Queries"));
        assert!(is_console_command("  :help"));
        assert!(!is_console_command("name=':x'"));
    }
}
