//! GQL 关键字补全器
//!
//! 基于 rustyline 实现 Tab 补全功能

use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};

/// GQL 关键字列表
const GQL_KEYWORDS: &[&str] = &[
    // 逻辑与比较
    "and", "or", "not", "like", "rlike", "regexp", "is", "null",
    // 函数
    "length", "rand", "substr",
    // 排序与分页
    "order", "by", "asc", "desc", "limit", "offset",
];

/// 子命令映射
fn get_sub_commands(keyword: &str) -> Option<&'static [&'static str]> {
    match keyword {
        "order" => Some(&["by"]),
        "not" => Some(&["like", "rlike", "regexp"]),
        _ => None,
    }
}

/// 控制台命令列表
const CONSOLE_COMMANDS: &[&str] = &[
    ":help", ":h",
    ":quit", ":q",
    ":stats",
    ":begin",
    ":commit",
    ":rollback",
    ":node",
    ":type",
];

fn pairs<'a>(words: impl Iterator<Item = &'a &'static str>) -> Vec<Pair> {
    words
        .map(|w| Pair {
            display: w.to_string(),
            replacement: w.to_string(),
        })
        .collect()
}

/// Graphene CLI 补全器
#[derive(Default)]
pub struct GqlCompleter;

impl GqlCompleter {
    pub fn new() -> Self {
        Self
    }

    /// 光标前文本的补全候选及替换起点
    pub fn candidates(&self, line: &str, pos: usize) -> (usize, Vec<Pair>) {
        let line_to_cursor = &line[..pos];

        if line_to_cursor.starts_with(':') {
            let matches = CONSOLE_COMMANDS.iter().filter(|cmd| cmd.starts_with(line_to_cursor));
            return (0, pairs(matches));
        }

        let words: Vec<&str> = line_to_cursor.split_whitespace().collect();
        let Some(last) = words.last() else {
            return (0, vec![]);
        };
        let last = last.to_lowercase();

        if line_to_cursor.ends_with(' ') {
            // 在空格后，提供子命令建议
            return match get_sub_commands(&last) {
                Some(sub_cmds) => (pos, pairs(sub_cmds.iter())),
                None => (pos, vec![]),
            };
        }

        let start_pos = pos - last.len();
        if words.len() > 1 {
            let prev_word = words[words.len() - 2].to_lowercase();
            if let Some(sub_cmds) = get_sub_commands(&prev_word) {
                let completions = pairs(sub_cmds.iter().filter(|kw| kw.starts_with(&last)));
                if !completions.is_empty() {
                    return (start_pos, completions);
                }
            }
        }
        let completions = pairs(GQL_KEYWORDS.iter().filter(|kw| kw.starts_with(&last)));
        (start_pos, completions)
    }
}

impl Completer for GqlCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        Ok(self.candidates(line, pos))
    }
}

impl Hinter for GqlCompleter {
    type Hint = String;
}

impl Highlighter for GqlCompleter {}

impl Validator for GqlCompleter {}

impl Helper for GqlCompleter {}

#[cfg(test)]
mod tests {
    use super::*;

    fn replacements(line: &str) -> (usize, Vec<String>) {
        let (start, pairs) = GqlCompleter::new().candidates(line, line.len());
        (start, pairs.into_iter().map(|p| p.replacement).collect())
    }

    #[test]
    fn test_console_commands() {
        assert_eq!(replacements(":be"), (0, vec![":begin".to_string()]));
        let (_, all) = replacements(":");
        assert_eq!(all.len(), CONSOLE_COMMANDS.len());
    }

    #[test]
    fn test_keywords() {
        assert_eq!(replacements("name='a' an"), (9, vec!["and".to_string()]));
        assert_eq!(replacements("age>3 order "), (12, vec!["by".to_string()]));
        assert_eq!(replacements("title not rl"), (10, vec!["rlike".to_string()]));
        assert!(replacements("").1.is_empty());
    }
}
