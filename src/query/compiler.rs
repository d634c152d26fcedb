//! GQL 编译器
//!
//! 递归下降解析过滤表达式，同时生成 SQL：
//! - 路径中的每一步按连接键去重，相同的键只连接一次
//! - 出现在顶层 and 链中的路径改为 inner join，其余保持 left join
//! - 解析失败的产生式恢复游标与已生成的 SQL
//!
//! ```text
//! expression := ['not'] ( '(' expression ')' | func | value ) [binop expression] [('and'|'or') expression]
//! value      := '?' | number | string | true | false | null | typed_node | path
//! typed_node := ['_'] TypeName '#' hash
//! path       := ['#' hash ['.']] prop ('.' prop)*
//! prop       := ['@'] ['_'] name [':' lang] ['#' hash]
//! ```

use crate::error::{Error, Result};
use crate::query::lexer::{syntax_error, tokenize, Token, TokenKind};
use crate::query::plan::{JoinTable, Query, QueryPlan, Step, StepId, ROOT_STEP, ROOT_VALUE};
use crate::schema::name::{resolve_type_name, type_namespace, validate_lang, validate_type_name};
use crate::storage::quote_literal;
use crate::types::{DatumType, Direction};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt::Write;

/// 类型谓词
pub const TYPE_PRED: &str = "graphene_type";

/// 属性解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRef {
    pub pred: String,
    pub dir: Direction,
    pub node_type: Option<String>,
}

/// 编译时需要的模式与存储信息
pub trait CompileContext {
    /// 谓词已登记的类型
    fn pred_type(&mut self, pred: &str) -> Result<Option<DatumType>>;

    /// 在 `scope` 类型下解析属性名（可带 `@`、`_` 前缀，不含语言后缀）
    fn resolve_property(&mut self, scope: Option<&str>, name: &str) -> Result<PropertyRef>;

    /// 确认类型存在
    fn resolve_type(&mut self, name: &str) -> Result<()>;

    fn node_table(&self) -> String;

    fn datatype_table(&self, ty: DatumType) -> String;
}

/// 表达式涉及的路径步骤，按连接键索引
type Fields = IndexMap<String, StepId>;

#[derive(Clone, Copy)]
struct Mark {
    pos: usize,
    sql_len: usize,
}

enum Logic {
    And,
    Or,
}

const FUNCTIONS: [(&str, &str); 3] = [("length", "length"), ("rand", "random"), ("substr", "substr")];

struct Compiler<'c> {
    ctx: &'c mut dyn CompileContext,
    ns: String,
    steps: Vec<Step>,
    bound: HashMap<String, StepId>,
    tables: IndexMap<String, JoinTable>,
    text: String,
    tokens: Vec<Token>,
    pos: usize,
    sql: String,
    root_referenced: bool,
    free_typed: Option<usize>,
    fully_typed: bool,
}

/// 编译查询
pub fn compile(ctx: &mut dyn CompileContext, query: &Query) -> Result<QueryPlan> {
    if let Some(scope) = &query.scope {
        ctx.resolve_type(scope)?;
    }
    let mut compiler = Compiler::new(ctx, query.scope.clone());

    let mut cwhere = String::new();
    for constraint in &query.constraints {
        compiler.load(constraint)?;
        if compiler.filter()? {
            let _ = write!(cwhere, " and ( {} )", compiler.sql.trim());
        }
        if !compiler.at_end() {
            return Err(compiler.error("语法错误"));
        }
    }

    compiler.load(&query.text)?;
    let mut where_clause = String::new();
    if !compiler.starts_with_order_or_limit() && compiler.filter()? {
        where_clause = format!("( {} )", compiler.sql.trim());
    }
    if where_clause.is_empty() {
        where_clause.push('1');
    }
    compiler.sql.clear();
    compiler.order_by()?;
    compiler.limit()?;
    if !compiler.at_end() {
        let rest = compiler.rest().to_string();
        return Err(compiler.error(&format!("无法解析的文本: {}", rest)));
    }
    let order_limit = compiler.sql.trim().to_string();
    compiler.anchor_free_typed_node();
    Ok(compiler.build(&where_clause, &cwhere, &order_limit))
}

impl<'c> Compiler<'c> {
    fn new(ctx: &'c mut dyn CompileContext, scope: Option<String>) -> Self {
        let ns = scope
            .as_deref()
            .map(type_namespace)
            .unwrap_or_default()
            .to_string();
        let root = Step::root(scope);
        let mut bound = HashMap::new();
        bound.insert(root.key.clone(), ROOT_STEP);
        Self {
            ctx,
            ns,
            steps: vec![root],
            bound,
            tables: IndexMap::new(),
            text: String::new(),
            tokens: Vec::new(),
            pos: 0,
            sql: String::new(),
            root_referenced: false,
            free_typed: None,
            fully_typed: true,
        }
    }

    fn load(&mut self, text: &str) -> Result<()> {
        self.tokens = tokenize(text)?;
        self.text = text.to_string();
        self.pos = 0;
        self.sql.clear();
        Ok(())
    }

    // ==================== 游标 ====================

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    /// 第 `offset` 个词法单元存在且与前一个紧邻
    fn adjacent(&self, offset: usize) -> bool {
        self.peek_at(offset).map_or(false, |t| !t.spaced)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn rest(&self) -> &str {
        match self.peek() {
            Some(token) => &self.text[token.start..],
            None => "",
        }
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        if self.peek().map_or(false, |t| t.is_keyword(keyword)) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn mark(&self) -> Mark {
        Mark {
            pos: self.pos,
            sql_len: self.sql.len(),
        }
    }

    fn reset(&mut self, mark: Mark) {
        self.pos = mark.pos;
        self.sql.truncate(mark.sql_len);
    }

    fn emit(&mut self, s: &str) {
        self.sql.push(' ');
        self.sql.push_str(s);
    }

    fn error(&self, message: &str) -> Error {
        let position = self.peek().map_or(self.text.len(), |t| t.start);
        syntax_error(&self.text, position, message)
    }

    fn starts_with_order_or_limit(&self) -> bool {
        let first = self.peek_at(0);
        let second = self.peek_at(1);
        match (first, second) {
            (Some(a), Some(b)) if a.is_keyword("order") => b.is_keyword("by"),
            (Some(a), Some(b)) if a.is_keyword("limit") => matches!(b.kind, TokenKind::Number(_)),
            _ => false,
        }
    }

    // ==================== 表达式 ====================

    /// 顶层过滤；返回的步骤及其前驱都改为必须匹配
    fn filter(&mut self) -> Result<bool> {
        let fields = self.expression(true, true)?;
        if let Some(fields) = &fields {
            for step in fields.values() {
                self.unset_optional(*step);
            }
        }
        Ok(fields.is_some())
    }

    fn expression(&mut self, root: bool, in_where: bool) -> Result<Option<Fields>> {
        let mark = self.mark();
        let mut negated = false;
        if root && self.keyword("not") {
            self.emit("not");
            negated = true;
        }

        let mut fields = match self.parenthesized(root)? {
            Some(fields) => {
                if self.binary_operator() {
                    let rhs = self.required_expression()?;
                    let mut fields = fields;
                    fields.extend(rhs);
                    fields
                } else {
                    fields
                }
            }
            None => {
                let (mut fields, value) = match self.function()? {
                    Some(fields) => (fields, None),
                    None => match self.value()? {
                        Some(value) => (Fields::new(), value),
                        None => {
                            self.reset(mark);
                            return Ok(None);
                        }
                    },
                };
                if self.binary_operator() {
                    if let Some(step) = value {
                        fields.insert(self.steps[step].key.clone(), step);
                    }
                    let rhs = self.required_expression()?;
                    fields.extend(rhs);
                } else if let Some(step) = value {
                    if root {
                        fields.insert(self.steps[step].key.clone(), step);
                        self.emit("is not null");
                    } else if in_where {
                        fields.insert(self.steps[step].key.clone(), step);
                    }
                }
                fields
            }
        };

        if root {
            if let Some(op) = self.logical_operator() {
                let rhs = match self.expression(true, true)? {
                    Some(rhs) => rhs,
                    None => return Err(self.error("需要表达式")),
                };
                if negated {
                    return Ok(Some(Fields::new()));
                }
                fields = match op {
                    Logic::And => {
                        fields.extend(rhs);
                        fields
                    }
                    Logic::Or => fields
                        .into_iter()
                        .filter(|(key, _)| rhs.contains_key(key))
                        .collect(),
                };
            }
        }
        if negated {
            return Ok(Some(Fields::new()));
        }
        Ok(Some(fields))
    }

    fn required_expression(&mut self) -> Result<Fields> {
        match self.expression(false, true)? {
            Some(fields) => Ok(fields),
            None => Err(self.error("需要表达式")),
        }
    }

    fn logical_operator(&mut self) -> Option<Logic> {
        if self.keyword("and") {
            self.emit("and");
            Some(Logic::And)
        } else if self.keyword("or") {
            self.emit("or");
            Some(Logic::Or)
        } else {
            None
        }
    }

    fn binary_operator(&mut self) -> bool {
        if let Some(TokenKind::Op(op)) = self.peek_kind() {
            let op = op.clone();
            self.advance();
            self.emit(&op);
            return true;
        }
        let negated = self.peek().map_or(false, |t| t.is_keyword("not"));
        let offset = usize::from(negated);
        let Some(word) = self.peek_at(offset).and_then(|t| t.ident()) else {
            return false;
        };
        let op = match word.to_ascii_lowercase().as_str() {
            "like" => "like",
            "rlike" | "regexp" => "regexp",
            _ => return false,
        };
        self.pos += offset + 1;
        if negated {
            self.emit("not");
        }
        self.emit(op);
        true
    }

    fn parenthesized(&mut self, root: bool) -> Result<Option<Fields>> {
        if self.peek_kind() != Some(&TokenKind::LParen) {
            return Ok(None);
        }
        let mark = self.mark();
        self.advance();
        self.emit("(");
        let fields = match self.expression(root, true)? {
            Some(fields) => fields,
            None => return Err(self.error("需要表达式")),
        };
        if self.peek_kind() == Some(&TokenKind::RParen) {
            self.advance();
            self.emit(")");
            Ok(Some(fields))
        } else {
            self.reset(mark);
            Err(self.error("括号不匹配"))
        }
    }

    fn function(&mut self) -> Result<Option<Fields>> {
        let Some(name) = self.peek().and_then(|t| t.ident()) else {
            return Ok(None);
        };
        let Some((_, sql_name)) = FUNCTIONS
            .iter()
            .find(|(f, _)| f.eq_ignore_ascii_case(name))
        else {
            return Ok(None);
        };
        if self.peek_at(1).map(|t| &t.kind) != Some(&TokenKind::LParen) {
            return Ok(None);
        }
        let mark = self.mark();
        self.pos += 2;
        self.emit(&format!("{}(", sql_name));
        let mut fields = Fields::new();
        if let Some(first) = self.expression(false, true)? {
            fields.extend(first);
            while self.peek_kind() == Some(&TokenKind::Comma) {
                self.advance();
                self.emit(",");
                let next = self.required_expression()?;
                fields.extend(next);
            }
        }
        if self.peek_kind() == Some(&TokenKind::RParen) {
            self.advance();
            self.emit(")");
            Ok(Some(fields))
        } else {
            self.reset(mark);
            Err(self.error("括号不匹配"))
        }
    }

    /// 成功时内层为值所在的路径步骤（常量与占位符没有）
    fn value(&mut self) -> Result<Option<Option<StepId>>> {
        let Some(token) = self.peek() else {
            return Ok(None);
        };
        let constant = match &token.kind {
            TokenKind::Placeholder => Some("?".to_string()),
            TokenKind::Number(n) => Some(n.clone()),
            TokenKind::Str(s) => Some(quote_literal(s)),
            TokenKind::Ident(word)
                if ["true", "false", "null"]
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(word)) =>
            {
                Some(word.to_ascii_lowercase())
            }
            _ => None,
        };
        if let Some(constant) = constant {
            self.advance();
            self.emit(&constant);
            return Ok(Some(None));
        }
        let step = match self.typed_node()? {
            Some(step) => Some(step),
            None => self.path()?,
        };
        match step {
            Some(step) => {
                let value = self.value_of(step);
                self.emit(&value);
                Ok(Some(Some(step)))
            }
            None => Ok(None),
        }
    }

    // ==================== 路径 ====================

    fn typed_node(&mut self) -> Result<Option<StepId>> {
        let Some(name) = self.peek().and_then(|t| t.ident()).map(str::to_string) else {
            return Ok(None);
        };
        let (absolute, bare) = match name.strip_prefix('_') {
            Some(rest) => (true, rest),
            None => (false, name.as_str()),
        };
        if validate_type_name(bare).is_err() || !self.adjacent(1) {
            return Ok(None);
        }
        let Some(TokenKind::Hash(hash)) = self.peek_at(1).map(|t| t.kind.clone()) else {
            return Ok(None);
        };
        self.pos += 2;
        let type_name = if absolute {
            bare.to_string()
        } else {
            resolve_type_name(bare, &self.ns)
        };
        self.ctx.resolve_type(&type_name)?;
        let literal = quote_literal(&type_name);

        if let Some(&bound) = self.bound.get(&hash) {
            if bound == ROOT_STEP {
                self.root_referenced = true;
            }
            self.steps[bound].node_type = Some(type_name);
            let step = Step {
                pred: TYPE_PRED.to_string(),
                dir: Direction::Forward,
                lang: None,
                hash: None,
                node_type: None,
                datatype: DatumType::String,
                prev: Some(bound),
                key: format!("{}.{}", self.steps[bound].key, TYPE_PRED),
                table: None,
            };
            let id = self.process(step);
            if let Some(table) = self.table_mut(id) {
                let condition = format!(" and {}={}", table.value, literal);
                table.add_filter(&condition);
            }
            return Ok(Some(id));
        }

        let step = Step {
            pred: TYPE_PRED.to_string(),
            dir: Direction::Backward,
            lang: None,
            hash: Some(hash.clone()),
            node_type: Some(type_name),
            datatype: DatumType::String,
            prev: None,
            key: format!("{}.{}", hash, TYPE_PRED),
            table: None,
        };
        let id = self.process(step);
        self.bound.insert(hash, id);
        if let Some(table) = self.table_mut(id) {
            let condition = format!(" and {}={}", table.link, literal);
            table.add_filter(&condition);
        }
        if self.free_typed.is_none() {
            self.free_typed = self.steps[id].table;
        }
        Ok(Some(id))
    }

    fn path(&mut self) -> Result<Option<StepId>> {
        let mark = self.mark();
        let (mut step, mut found) = match self.peek_kind() {
            Some(TokenKind::Hash(hash)) => {
                let hash = hash.clone();
                let Some(&bound) = self.bound.get(&hash) else {
                    return Err(Error::UnboundVariable(hash));
                };
                self.advance();
                if bound == ROOT_STEP {
                    self.root_referenced = true;
                }
                if !(self.peek_kind() == Some(&TokenKind::Dot) && self.adjacent(0)) {
                    return Ok(Some(bound));
                }
                self.advance();
                (bound, true)
            }
            _ => (ROOT_STEP, false),
        };
        loop {
            match self.prop(step)? {
                Some(next) => step = next,
                None if found => return Err(self.error("'.' 之后需要属性名")),
                None => {
                    self.reset(mark);
                    return Ok(None);
                }
            }
            found = true;
            if self.peek_kind() == Some(&TokenKind::Dot) && self.adjacent(0) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(Some(step))
    }

    fn prop(&mut self, prev: StepId) -> Result<Option<StepId>> {
        let start = self.pos;
        let backward = self.peek_kind() == Some(&TokenKind::At) && self.adjacent(1);
        if backward {
            self.advance();
        }
        let Some(name) = self.peek().and_then(|t| t.ident()).map(str::to_string) else {
            self.pos = start;
            return Ok(None);
        };
        let (absolute, bare) = match name.strip_prefix('_') {
            Some(rest) => (true, rest),
            None => (false, name.as_str()),
        };
        if !bare.starts_with(|c: char| c.is_ascii_lowercase()) {
            self.pos = start;
            return Ok(None);
        }
        let qualified = format!(
            "{}{}{}",
            if backward { "@" } else { "" },
            if absolute { "_" } else { "" },
            bare
        );
        self.advance();

        let mut lang = None;
        if self.peek_kind() == Some(&TokenKind::Colon) && self.adjacent(0) && self.adjacent(1) {
            let code = self.peek_at(1).and_then(|t| t.ident()).map(str::to_string);
            match code {
                Some(code) if validate_lang(&code).is_ok() => {
                    self.pos += 2;
                    lang = Some(code);
                }
                _ => {
                    self.advance();
                    return Err(self.error("无效的语言代码"));
                }
            }
        }
        let mut hash = None;
        if self.adjacent(0) {
            if let Some(TokenKind::Hash(h)) = self.peek_kind() {
                hash = Some(h.clone());
                self.advance();
            }
        }

        let scope = self.steps[prev].node_type.clone();
        let resolved = self.ctx.resolve_property(scope.as_deref(), &qualified)?;
        let mut step = Step {
            pred: resolved.pred,
            dir: resolved.dir,
            lang,
            hash: hash.clone(),
            node_type: resolved.node_type,
            datatype: DatumType::String,
            prev: Some(prev),
            key: String::new(),
            table: None,
        };
        let mut declared = self.ctx.pred_type(&step.table_pred())?;
        if declared.is_none() && step.lang.is_some() {
            declared = self.ctx.pred_type(&step.pred)?;
        }
        step.datatype = match declared {
            Some(ty) => ty,
            None => {
                self.fully_typed = false;
                if step.node_type.is_some() || step.dir == Direction::Backward {
                    DatumType::Node
                } else {
                    DatumType::String
                }
            }
        };
        step.key = format!(
            "{}.{}{}",
            self.steps[prev].key,
            step.full_name(),
            hash.as_deref().unwrap_or("")
        );

        if let Some(h) = &hash {
            if let Some(&existing) = self.bound.get(h) {
                if self.steps[existing].key == step.key {
                    return Ok(Some(existing));
                }
                return Err(Error::HashAlreadyBound(h.clone()));
            }
        }
        if prev == ROOT_STEP {
            self.root_referenced = true;
        }
        let id = self.process(step);
        if let Some(h) = hash {
            self.bound.insert(h, id);
        }
        Ok(Some(id))
    }

    // ==================== 连接表 ====================

    /// 登记步骤；相同连接键复用已有的表
    fn process(&mut self, mut step: Step) -> StepId {
        let index = match self.tables.get_index_of(&step.key) {
            Some(index) => index,
            None => {
                let index = self.tables.len();
                let mut table = JoinTable::new(index + 1, step.table_pred(), step.datatype, step.dir);
                if let Some(prev) = step.prev {
                    table.filter = format!(" and {}={}", table.link, self.value_of(prev));
                }
                self.tables.insert(step.key.clone(), table);
                index
            }
        };
        step.table = Some(index);
        self.steps.push(step);
        self.steps.len() - 1
    }

    fn table_of(&self, step: StepId) -> Option<&JoinTable> {
        let index = self.steps[step].table?;
        self.tables.get_index(index).map(|(_, t)| t)
    }

    fn table_mut(&mut self, step: StepId) -> Option<&mut JoinTable> {
        let index = self.steps[step].table?;
        self.tables.get_index_mut(index).map(|(_, t)| t)
    }

    fn value_of(&self, step: StepId) -> String {
        self.table_of(step)
            .map_or_else(|| ROOT_VALUE.to_string(), |t| t.value.clone())
    }

    fn unset_optional(&mut self, step: StepId) {
        let mut current = Some(step);
        while let Some(id) = current {
            if let Some(table) = self.table_mut(id) {
                table.optional = false;
            }
            current = self.steps[id].prev;
        }
    }

    /// 查询没有用到根节点时，把第一个自由类型变量当作根节点
    fn anchor_free_typed_node(&mut self) {
        if self.root_referenced {
            return;
        }
        if let Some(index) = self.free_typed {
            if let Some((_, table)) = self.tables.get_index_mut(index) {
                let condition = format!(" and {}={}", table.value, ROOT_VALUE);
                table.add_filter(&condition);
            }
        }
    }

    // ==================== 排序与分页 ====================

    fn order_by(&mut self) -> Result<()> {
        let is_order = self.peek().map_or(false, |t| t.is_keyword("order"))
            && self.peek_at(1).map_or(false, |t| t.is_keyword("by"));
        if !is_order {
            return Ok(());
        }
        self.pos += 2;
        self.emit("order by");
        loop {
            if self.expression(false, false)?.is_none() {
                return Err(self.error("需要表达式"));
            }
            if self.keyword("asc") {
                self.emit("asc");
            } else if self.keyword("desc") {
                self.emit("desc");
            }
            if self.peek_kind() == Some(&TokenKind::Comma) {
                self.advance();
                self.emit(",");
            } else {
                return Ok(());
            }
        }
    }

    fn integer(&mut self) -> Option<String> {
        match self.peek_kind() {
            Some(TokenKind::Number(n)) if n.bytes().all(|b| b.is_ascii_digit()) => {
                let n = n.clone();
                self.advance();
                Some(n)
            }
            _ => None,
        }
    }

    fn limit(&mut self) -> Result<()> {
        let mark = self.mark();
        if !self.keyword("limit") {
            return Ok(());
        }
        let Some(count) = self.integer() else {
            self.reset(mark);
            return Ok(());
        };
        self.emit(&format!("limit {}", count));
        if self.peek_kind() == Some(&TokenKind::Comma) {
            self.advance();
            let Some(second) = self.integer() else {
                return Err(self.error("limit 需要整数"));
            };
            self.emit(&format!(", {}", second));
        }
        if self.keyword("offset") {
            let Some(offset) = self.integer() else {
                return Err(self.error("offset 需要整数"));
            };
            self.emit(&format!("offset {}", offset));
        }
        Ok(())
    }

    // ==================== SQL ====================

    fn build(&self, where_clause: &str, cwhere: &str, order_limit: &str) -> QueryPlan {
        let mut sql = format!("select n.id, n.props from {} n", self.ctx.node_table());
        for table in self.tables.values() {
            sql.push_str(if table.optional { " left join " } else { " join " });
            let _ = write!(
                sql,
                "{} {} on {}.pred={}{}",
                self.ctx.datatype_table(table.datatype),
                table.alias,
                table.alias,
                quote_literal(&table.pred),
                table.filter
            );
        }
        let _ = write!(sql, " where {}{} group by n.id", where_clause, cwhere);
        if !order_limit.is_empty() {
            sql.push(' ');
            sql.push_str(order_limit);
        }
        QueryPlan {
            sql,
            fully_typed: self.fully_typed,
            joins: self.tables.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::name::parse_pred;

    #[derive(Default)]
    struct TestContext {
        types: HashMap<&'static str, DatumType>,
        frozen: bool,
    }

    impl TestContext {
        fn typed() -> Self {
            let mut types = HashMap::new();
            for (pred, ty) in [
                ("name", DatumType::String),
                ("title", DatumType::String),
                ("active", DatumType::Int),
                ("group", DatumType::Node),
                ("author", DatumType::Node),
                ("graphene_type", DatumType::String),
            ] {
                types.insert(pred, ty);
            }
            Self { types, frozen: false }
        }
    }

    impl CompileContext for TestContext {
        fn pred_type(&mut self, pred: &str) -> Result<Option<DatumType>> {
            Ok(self.types.get(pred).copied())
        }

        fn resolve_property(&mut self, scope: Option<&str>, name: &str) -> Result<PropertyRef> {
            if scope == Some("Book") && name == "author" {
                return Ok(PropertyRef {
                    pred: "author".into(),
                    dir: Direction::Forward,
                    node_type: Some("Person".into()),
                });
            }
            if self.frozen && scope.is_some() && name == "missing" {
                return Err(Error::UnknownProperty {
                    type_name: scope.unwrap_or_default().to_string(),
                    property: name.to_string(),
                });
            }
            let parsed = parse_pred(name, scope.map(type_namespace).unwrap_or_default())?;
            Ok(PropertyRef {
                pred: parsed.pred,
                dir: parsed.dir,
                node_type: None,
            })
        }

        fn resolve_type(&mut self, name: &str) -> Result<()> {
            match name {
                "Book" | "Person" | "shop_Book" => Ok(()),
                _ => Err(Error::UnknownType(name.to_string())),
            }
        }

        fn node_table(&self) -> String {
            "\"graphene_node\"".into()
        }

        fn datatype_table(&self, ty: DatumType) -> String {
            format!("\"graphene_triple_{}\"", ty)
        }
    }

    fn sql(text: &str) -> String {
        compile(&mut TestContext::typed(), &Query::new(text)).unwrap().sql
    }

    #[test]
    fn test_join_reuse() {
        let plan = compile(
            &mut TestContext::typed(),
            &Query::new("#x.group#g and #g.name='a' and #x.group#g.active=1"),
        )
        .unwrap();
        assert_eq!(plan.sql.matches("pred='group'").count(), 1);
        assert_eq!(plan.joins, 3);
        assert!(plan.fully_typed);
        assert!(plan.sql.contains("join \"graphene_triple_node\" t1 on t1.pred='group' and t1.sub=n.id"));
        assert!(plan.sql.contains("t2.sub=t1.ob"));
        assert!(plan.sql.contains("t3.sub=t1.ob"));
        assert!(!plan.sql.contains("left join"));
    }

    #[test]
    fn test_simple_filter() {
        let s = sql("name = 'John'");
        assert_eq!(
            s,
            "select n.id, n.props from \"graphene_node\" n join \"graphene_triple_string\" t1 \
             on t1.pred='name' and t1.sub=n.id where ( t1.ob = 'John' ) group by n.id"
        );
    }

    #[test]
    fn test_optional_joins() {
        let s = sql("name='a' or title='b'");
        assert!(s.contains("left join \"graphene_triple_string\" t1 "));
        assert!(s.contains("left join \"graphene_triple_string\" t2 "));

        let s = sql("name='a' and not title='b'");
        assert!(!s.contains("left join \"graphene_triple_string\" t1 "));
        assert!(s.contains("left join \"graphene_triple_string\" t2 "));

        let s = sql("not name='a'");
        assert!(s.contains("left join"));
        assert!(s.contains("( not t1.ob = 'a' )"));
    }

    #[test]
    fn test_bare_path_is_not_null() {
        let s = sql("name");
        assert!(s.contains("where ( t1.ob is not null )"));
    }

    #[test]
    fn test_free_typed_node_is_anchored() {
        let plan = compile(&mut TestContext::typed(), &Query::new("Book#b and #b.author=?")).unwrap();
        assert!(plan.sql.contains("t1.pred='graphene_type' and t1.ob='Book' and t1.sub=n.id"));
        assert!(plan.sql.contains("t2.pred='author' and t2.sub=t1.sub"));
        assert!(plan.sql.contains("t2.ob = ?"));
    }

    #[test]
    fn test_typed_node_on_root_and_bound_hash() {
        let s = sql("Book#x and name='a'");
        assert!(s.contains("t1.pred='graphene_type' and t1.sub=n.id and t1.ob='Book'"));

        let s = sql("name='a' and Person#p and #p.name=name");
        assert!(!s.contains("t2.sub=n.id"));
        assert!(s.contains("t2.ob='Person'"));
    }

    #[test]
    fn test_backward_and_language() {
        let s = sql("@author#a.name:en_US='X'");
        assert!(s.contains("t1.pred='author' and t1.ob=n.id"));
        assert!(s.contains("t2.pred='name:en_US' and t2.sub=t1.sub"));
    }

    #[test]
    fn test_functions_and_operators() {
        let s = sql("length(name) > 3 and title rlike '^a' and rand() < 2 and title not like 'x%'");
        assert!(s.contains("length( t1.ob )"));
        assert!(s.contains("regexp '^a'"));
        assert!(s.contains("random( )"));
        assert!(s.contains("not like 'x%'"));
    }

    #[test]
    fn test_strings_are_requoted() {
        let s = sql("name = \"O'Brien\"");
        assert!(s.contains("'O''Brien'"));
    }

    #[test]
    fn test_order_and_limit() {
        let s = sql("order by name desc limit 10");
        assert!(s.contains("where 1 group by n.id order by t1.ob desc limit 10"));
        assert!(s.contains("left join"));

        let s = sql("name='a' order by title, name asc limit 5 offset 2");
        assert!(s.ends_with("order by t2.ob , t1.ob asc limit 5 offset 2"));

        let s = sql("limit 3");
        assert!(s.ends_with("where 1 group by n.id limit 3"));
    }

    #[test]
    fn test_constraints() {
        let query = Query::new("title='x'")
            .scoped("Book")
            .constraint("_graphene_type#type='Book'", vec![]);
        let plan = compile(&mut TestContext::typed(), &query).unwrap();
        assert!(plan.sql.contains("where ( t2.ob = 'x' ) and ( t1.ob = 'Book' ) group by n.id"));
    }

    #[test]
    fn test_syntax_errors() {
        let err = compile(&mut TestContext::typed(), &Query::new("name='a' junk junk")).unwrap_err();
        match err {
            Error::SyntaxError { position, near, .. } => {
                assert_eq!(position, 9);
                assert_eq!(near, " junk junk");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            compile(&mut TestContext::typed(), &Query::new("name = ")),
            Err(Error::SyntaxError { .. })
        ));
        assert!(matches!(
            compile(&mut TestContext::typed(), &Query::new("(name = 'a'")),
            Err(Error::SyntaxError { .. })
        ));
        assert!(matches!(
            compile(&mut TestContext::typed(), &Query::new("#x.")),
            Err(Error::SyntaxError { .. })
        ));
    }

    #[test]
    fn test_variable_errors() {
        assert!(matches!(
            compile(&mut TestContext::typed(), &Query::new("#y.name='a'")),
            Err(Error::UnboundVariable(h)) if h == "#y"
        ));
        assert!(matches!(
            compile(&mut TestContext::typed(), &Query::new("name#a='x' and title#a='y'")),
            Err(Error::HashAlreadyBound(h)) if h == "#a"
        ));
        assert!(matches!(
            compile(&mut TestContext::typed(), &Query::new("Unknown#u")),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn test_unknown_property_and_typing() {
        let mut ctx = TestContext::typed();
        ctx.frozen = true;
        let query = Query::new("missing = 1").scoped("Book");
        assert!(matches!(
            compile(&mut ctx, &query),
            Err(Error::UnknownProperty { .. })
        ));

        let plan = compile(&mut TestContext::typed(), &Query::new("isbn = '1'")).unwrap();
        assert!(!plan.fully_typed);
    }

    #[test]
    fn test_namespace_prefix() {
        let plan = compile(&mut TestContext::typed(), &Query::new("title='a'").scoped("shop_Book")).unwrap();
        assert!(plan.sql.contains("t1.pred='shop_title'"));
    }
}
