//! Graphene CLI 工具
//!
//! 交互式 GQL 控制台

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use graphene::cli::{
    check_vertical_display, execute_console_command, format_error, is_console_command,
    CommandResult, GqlCompleter, PrintMode, Printer,
};
use graphene::{Database, DatabaseConfig};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "graphene-cli")]
#[command(version, about = "Graphene 属性图命令行工具")]
struct Args {
    /// 数据库文件，省略时使用内存数据库
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// 类型定义根目录
    #[arg(short, long)]
    classpath: Option<PathBuf>,

    /// 表名前缀
    #[arg(short, long)]
    prefix: Option<String>,

    /// 学习模式：违规时放宽类型定义
    #[arg(long)]
    unfrozen: bool,

    /// JSON 配置文件，命令行参数覆盖其中的值
    #[arg(long)]
    config: Option<PathBuf>,

    /// 记录每条 SQL
    #[arg(long)]
    log_queries: bool,

    /// 执行单个查询后退出
    #[arg(short = 'e', long)]
    execute: Option<String>,
}

fn build_config(args: &Args) -> Result<DatabaseConfig> {
    let mut config = match &args.config {
        Some(path) => DatabaseConfig::from_file(path)
            .with_context(|| format!("读取配置 {} 失败", path.display()))?,
        None => DatabaseConfig::default(),
    };
    if let Some(db) = &args.db {
        config = config.with_path(db.clone());
    }
    if let Some(classpath) = &args.classpath {
        config = config.with_classpath(classpath.clone());
    }
    if let Some(prefix) = &args.prefix {
        config = config.with_prefix(prefix);
    }
    if args.unfrozen {
        config = config.unfrozen();
    }
    config.log_queries |= args.log_queries;
    Ok(config)
}

fn history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("graphene").join("history.txt"))
}

fn run_query(db: &mut Database, printer: &Printer, query: &str) {
    let start = Instant::now();
    let output = db
        .select(query, &[])
        .and_then(|rs| printer.print_result(db, &rs, start.elapsed().as_millis() as u64));
    match output {
        Ok(text) => print!("{}", text),
        Err(e) => println!("{}", format_error(&e)),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let location = config
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ":memory:".to_string());
    let frozen = config.frozen;
    let mut db = Database::open(config).context("打开数据库失败")?;
    let mut printer = Printer::default();

    // 单个查询模式
    if let Some(query) = &args.execute {
        run_query(&mut db, &printer, query);
        return Ok(());
    }

    println!("{}", "Graphene CLI - 属性图控制台".bold());
    println!("=============================================");
    println!("数据库: {}", location);
    println!("模式: {}", if frozen { "frozen" } else { "learning" });
    println!("\n输入 :help 查看命令列表，:quit 退出\n");

    let mut rl: Editor<GqlCompleter, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(GqlCompleter::new()));
    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    loop {
        let prompt = if db.is_writing() { "graphene*> " } else { "graphene> " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        if is_console_command(line) {
            match execute_console_command(line, &mut db, &printer) {
                CommandResult::Exit => break,
                CommandResult::Continue => {}
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::Error(err) => println!("{}", err),
            }
            continue;
        }

        let (query, vertical) = check_vertical_display(line);
        printer.set_mode(if vertical { PrintMode::Vertical } else { PrintMode::Table });
        run_query(&mut db, &printer, &query);
    }

    if db.is_writing() {
        println!("{}", "未提交的事务已回滚".yellow());
        db.rollback()?;
    }
    if let Some(path) = &history {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let _ = rl.save_history(path);
    }

    println!("再见！");
    Ok(())
}
