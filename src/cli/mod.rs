//! 交互式控制台的组成部分：命令处理、结果打印、Tab 补全

pub mod commands;
pub mod completer;
pub mod printer;

pub use commands::{execute_console_command, is_console_command, CommandResult};
pub use completer::GqlCompleter;
pub use printer::{check_vertical_display, format_error, PrintMode, Printer};
