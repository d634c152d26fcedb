//! 类型定义文件
//!
//! 每个类型一个 `.def` 文件，每行声明一个属性：
//!
//! ```text
//! # 注释行会原样保留
//! \supertype Person
//! string{} email unique
//! Group[] groups as memberOf rw required
//! Book{} @_author as books delete cascade !
//! ```

use crate::error::{Error, Result};
use crate::schema::name::{
    parse_pred, property_names, relative_type_name, resolve_type_name, type_namespace,
    validate_type_name,
};
use crate::types::{DatumType, Direction};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::ops::BitOr;

static PROPERTY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^\s*(?:(?P<tabs>_)?(?P<tns>(?:[a-z]+_)*)(?P<tname>[A-Z][a-zA-Z0-9]*)|(?P<dtype>string|float|int|datetime|node))",
        r"\s*(?P<card>\[\]|\{\})?",
        r"\s+(?P<back>@)?(?P<abs>_)?(?P<ns>(?:[a-z][a-z0-9]*_)*)(?P<name>[a-z][a-zA-Z0-9]*)",
        r"(?:\s+as\s+(?P<alias>[a-z][a-zA-Z_]*))?",
        r"(?:\s+(?P<flags>[riundwf]+))?",
        r"(?P<mods>(?:\s+(?:required|delete\s+cascade|unique|!))*)\s*$",
    ))
    .expect("valid regex")
});

/// 访问掩码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessMask(pub u8);

impl AccessMask {
    pub const NONE: AccessMask = AccessMask(0);
    pub const READ: AccessMask = AccessMask(1);
    pub const INSERT: AccessMask = AccessMask(2);
    pub const DELETE: AccessMask = AccessMask(4);
    pub const UPDATE: AccessMask = AccessMask(8);
    pub const WRITE: AccessMask = AccessMask(14);
    pub const FULL: AccessMask = AccessMask(15);

    pub fn allows(self, op: AccessMask) -> bool {
        self.0 & op.0 == op.0
    }

    pub fn parse(flags: &str) -> Self {
        flags.chars().fold(AccessMask::NONE, |mask, c| {
            mask | match c {
                'r' => AccessMask::READ,
                'i' => AccessMask::INSERT,
                'u' => AccessMask::UPDATE,
                'd' => AccessMask::DELETE,
                'w' => AccessMask::WRITE,
                'f' => AccessMask::FULL,
                _ => AccessMask::NONE,
            }
        })
    }

    /// 定义文件中的写法，FULL 返回 None
    pub fn render(self) -> Option<String> {
        if self == AccessMask::FULL {
            return None;
        }
        let mut s = String::new();
        if self.allows(AccessMask::READ) {
            s.push('r');
        }
        if self.allows(AccessMask::WRITE) {
            s.push('w');
        } else {
            if self.allows(AccessMask::INSERT) {
                s.push('i');
            }
            if self.allows(AccessMask::UPDATE) {
                s.push('u');
            }
            if self.allows(AccessMask::DELETE) {
                s.push('d');
            }
        }
        if s.is_empty() {
            s.push('n');
        }
        Some(s)
    }
}

impl BitOr for AccessMask {
    type Output = AccessMask;

    fn bitor(self, rhs: AccessMask) -> AccessMask {
        AccessMask(self.0 | rhs.0)
    }
}

/// 属性定义
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub datatype: Option<DatumType>,
    /// 节点属性的目标类型（完整类型名）
    pub node_type: Option<String>,
    pub is_list: bool,
    pub repetitions: bool,
    pub unique: bool,
    pub delete_cascade: bool,
    pub frozen: bool,
    pub required: bool,
    pub mask: AccessMask,
    pub pred: String,
    pub dir: Direction,
    pub rel_name: String,
    pub abs_name: String,
    /// 对外名称（别名或相对名）
    pub proper_name: String,
    /// 声明该属性的类型
    pub source_type: String,
    pub comments: Vec<String>,
}

impl PropertyDef {
    /// 写入时使用的数据类型；反向属性总是节点
    pub fn storage_type(&self) -> Option<DatumType> {
        match self.dir {
            Direction::Backward => Some(DatumType::Node),
            Direction::Forward => self.datatype,
        }
    }

    fn render(&self, ns: &str) -> Option<String> {
        let mut line = match (&self.node_type, self.datatype) {
            (Some(node_type), _) => relative_type_name(node_type, ns),
            (None, Some(ty)) => ty.to_string(),
            (None, None) => return None,
        };
        if self.is_list {
            line.push_str(if self.repetitions { "[]" } else { "{}" });
        }
        let _ = write!(line, " {}", self.rel_name);
        if self.rel_name != self.proper_name {
            let _ = write!(line, " as {}", self.proper_name);
        }
        if let Some(mask) = self.mask.render() {
            let _ = write!(line, " {}", mask);
        }
        if self.required {
            line.push_str(" required");
        }
        if self.unique {
            line.push_str(" unique");
        }
        if self.delete_cascade {
            line.push_str(" delete cascade");
        }
        if self.frozen {
            line.push_str(" !");
        }
        Some(line)
    }
}

/// 类型定义
#[derive(Debug, Clone)]
pub struct TypeDef {
    name: String,
    ns: String,
    supertype: Option<String>,
    frozen: bool,
    defs: Vec<PropertyDef>,
    index: HashMap<String, usize>,
    required: IndexMap<String, String>,
    header: Vec<String>,
    footer: Vec<String>,
}

impl TypeDef {
    /// 没有定义文件的类型
    pub fn empty(name: &str) -> Result<Self> {
        let mut def = Self::bare(name)?;
        def.header.push(format!("##### {} #####", name));
        def.add_builtins()?;
        Ok(def)
    }

    /// 解析定义文本
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let mut def = Self::bare(name)?;
        let mut comments = Vec::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                comments.push(line.to_string());
                continue;
            }
            if let Some(directive) = line.strip_prefix('\\') {
                let mut parts = directive.split(|c: char| c.is_whitespace() || c == ',');
                match parts.next() {
                    Some("supertype") => {
                        let target = parts.find(|p| !p.is_empty()).ok_or_else(|| {
                            Error::DefinitionError(format!("{}: \\supertype 缺少类型名", name))
                        })?;
                        def.supertype = Some(resolve_type_name(target, &def.ns));
                        def.header = std::mem::take(&mut comments);
                    }
                    Some("frozen") => def.frozen = true,
                    _ => {}
                }
                continue;
            }
            def.define_line(line, std::mem::take(&mut comments))
                .map_err(|e| Error::DefinitionError(format!("读取 {} 出错: {}", name, e)))?;
        }
        def.footer = comments;
        def.add_builtins()?;
        Ok(def)
    }

    fn bare(name: &str) -> Result<Self> {
        validate_type_name(name)?;
        Ok(Self {
            name: name.to_string(),
            ns: type_namespace(name).to_string(),
            supertype: None,
            frozen: false,
            defs: Vec::new(),
            index: HashMap::new(),
            required: IndexMap::new(),
            header: Vec::new(),
            footer: Vec::new(),
        })
    }

    fn add_builtins(&mut self) -> Result<()> {
        for builtin in ["_graphene_type", "_graphene_topType"] {
            if self.index.contains_key(builtin) {
                continue;
            }
            let idx = self.empty_def(builtin)?;
            let def = &mut self.defs[idx];
            def.datatype = Some(DatumType::String);
            def.frozen = true;
            def.mask = AccessMask::FULL;
            def.comments.clear();
        }
        Ok(())
    }

    fn define_line(&mut self, line: &str, comments: Vec<String>) -> Result<()> {
        let caps = PROPERTY_LINE
            .captures(line)
            .ok_or_else(|| Error::DefinitionError(format!("无效的属性定义: \"{}\"", line)))?;
        let group = |n: &str| caps.name(n).map(|m| m.as_str()).unwrap_or("");

        let back = !group("back").is_empty();
        let raw = format!(
            "{}{}{}{}",
            if back { "@" } else { "" },
            group("abs"),
            group("ns"),
            group("name")
        );
        let parsed = parse_pred(&raw, &self.ns)?;
        let (rel_name, abs_name) = property_names(&parsed.pred, parsed.dir, &self.ns);

        let (datatype, node_type) = if caps.name("tname").is_some() {
            let type_name = format!("{}{}{}", group("tabs"), group("tns"), group("tname"));
            (Some(DatumType::Node), Some(resolve_type_name(&type_name, &self.ns)))
        } else {
            let ty = DatumType::parse(group("dtype"))
                .ok_or_else(|| Error::DefinitionError(format!("未知数据类型: {}", group("dtype"))))?;
            if back && ty != DatumType::Node {
                return Err(Error::DefinitionError(format!(
                    "反向属性 {} 不能是 {} 类型",
                    parsed.pred, ty
                )));
            }
            (Some(ty), None)
        };
        let (is_list, repetitions) = match group("card") {
            "[]" => (true, true),
            "{}" => (true, false),
            _ => (false, false),
        };
        let flags = group("flags");
        let mask = if flags.is_empty() {
            AccessMask::FULL
        } else {
            AccessMask::parse(flags)
        };
        let mods = group("mods");
        let alias = caps.name("alias").map(|m| m.as_str().to_string());
        let proper_name = alias.clone().unwrap_or_else(|| rel_name.clone());
        let required = mods.contains("required");

        let def = PropertyDef {
            datatype,
            node_type,
            is_list,
            repetitions,
            unique: mods.contains("unique"),
            delete_cascade: mods.contains("cascade"),
            frozen: mods.contains('!'),
            required,
            mask,
            pred: parsed.pred,
            dir: parsed.dir,
            rel_name: rel_name.clone(),
            abs_name: abs_name.clone(),
            proper_name: proper_name.clone(),
            source_type: self.name.clone(),
            comments,
        };
        if required {
            self.required.insert(def.pred.clone(), proper_name);
        }
        let mut keys = vec![rel_name, abs_name];
        if let Some(alias) = alias {
            keys.push(format!("{}_{}", self.ns, alias));
            keys.push(alias);
        }
        self.push(def, keys)?;
        Ok(())
    }

    fn push(&mut self, def: PropertyDef, keys: Vec<String>) -> Result<usize> {
        for key in &keys {
            if self.index.contains_key(key) {
                return Err(Error::DefinitionError(format!("重复定义: {}", key)));
            }
        }
        let idx = self.defs.len();
        self.defs.push(def);
        for key in keys {
            self.index.insert(key, idx);
        }
        Ok(idx)
    }

    /// 为尚未声明的属性生成宽松定义
    pub fn empty_def(&mut self, name: &str) -> Result<usize> {
        let parsed = parse_pred(name, &self.ns)?;
        let (rel_name, abs_name) = property_names(&parsed.pred, parsed.dir, &self.ns);
        let def = PropertyDef {
            datatype: None,
            node_type: None,
            is_list: true,
            repetitions: false,
            unique: false,
            delete_cascade: false,
            frozen: false,
            required: false,
            mask: AccessMask::NONE,
            pred: parsed.pred,
            dir: parsed.dir,
            rel_name: rel_name.clone(),
            abs_name: abs_name.clone(),
            proper_name: rel_name.clone(),
            source_type: self.name.clone(),
            comments: vec![String::new(), "# AUTO-GENERATED".to_string()],
        };
        self.push(def, vec![rel_name, abs_name])
    }

    /// 只在本类型内查找
    pub fn find_local(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn supertype(&self) -> Option<&str> {
        self.supertype.as_deref()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn defs(&self) -> &[PropertyDef] {
        &self.defs
    }

    pub fn def(&self, idx: usize) -> &PropertyDef {
        &self.defs[idx]
    }

    pub fn def_mut(&mut self, idx: usize) -> &mut PropertyDef {
        &mut self.defs[idx]
    }

    /// 本类型声明的必填属性：谓词名到对外名称
    pub fn required(&self) -> &IndexMap<String, String> {
        &self.required
    }

    /// 同步必填表与各定义的 required 标记
    pub fn set_required(&mut self, idx: usize, required: bool) {
        let def = &mut self.defs[idx];
        def.required = required;
        if required {
            self.required.insert(def.pred.clone(), def.proper_name.clone());
        } else {
            self.required.shift_remove(&def.pred);
        }
    }

    /// 生成定义文件文本
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            let _ = writeln!(out, "{}", line);
        }
        if let Some(supertype) = &self.supertype {
            let _ = writeln!(out, "\\supertype {}", relative_type_name(supertype, &self.ns));
        }
        if self.frozen {
            out.push_str("\\frozen\n");
        }
        for def in &self.defs {
            if def.pred.starts_with("graphene_") {
                continue;
            }
            let Some(line) = def.render(&self.ns) else { continue };
            for comment in &def.comments {
                let _ = writeln!(out, "{}", comment);
            }
            let _ = writeln!(out, "{}", line);
        }
        if self.footer.is_empty() {
            out.push_str("\n\n");
        } else {
            for line in &self.footer {
                let _ = writeln!(out, "{}", line);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "\
# 用户组
\\supertype Principal
string groupName unique
Group parentGroup
Group{} ancestors r
Group{} @ancestors as descendants
string{} privileges w
";

    #[test]
    fn test_parse_group() {
        let def = TypeDef::parse("um_Group", GROUP).unwrap();
        assert_eq!(def.supertype(), Some("um_Principal"));

        let name = def.def(def.find_local("groupName").unwrap());
        assert_eq!(name.pred, "um_groupName");
        assert_eq!(name.datatype, Some(DatumType::String));
        assert!(name.unique);
        assert!(!name.is_list);
        assert_eq!(name.mask, AccessMask::FULL);
        assert_eq!(def.find_local("_um_groupName"), def.find_local("groupName"));

        let parent = def.def(def.find_local("parentGroup").unwrap());
        assert_eq!(parent.node_type.as_deref(), Some("um_Group"));

        let ancestors = def.def(def.find_local("ancestors").unwrap());
        assert!(ancestors.is_list && !ancestors.repetitions);
        assert_eq!(ancestors.mask, AccessMask::READ);

        let back = def.def(def.find_local("descendants").unwrap());
        assert_eq!(back.dir, Direction::Backward);
        assert_eq!(back.pred, "um_ancestors");
        assert_eq!(back.rel_name, "@ancestors");
        assert_eq!(back.node_type.as_deref(), Some("um_Group"));

        assert!(def.find_local("_graphene_type").is_some());
    }

    #[test]
    fn test_parse_modifiers() {
        let def = TypeDef::parse("Book", "Person[] author required delete cascade !\n").unwrap();
        let author = def.def(def.find_local("author").unwrap());
        assert!(author.required && author.delete_cascade && author.frozen);
        assert!(author.repetitions);
        assert_eq!(def.required().get("author").map(String::as_str), Some("author"));
    }

    #[test]
    fn test_rejects_bad_lines() {
        assert!(TypeDef::parse("Book", "string @back\n").is_err());
        assert!(TypeDef::parse("Book", "string id\n").is_err());
        assert!(TypeDef::parse("Book", "string title\nint title\n").is_err());
        assert!(TypeDef::parse("book", "").is_err());
    }

    #[test]
    fn test_alias_keys() {
        let def = TypeDef::parse("Book", "string title as heading\nint pages\n").unwrap();
        let title = def.find_local("title").unwrap();
        assert_eq!(def.find_local("heading"), Some(title));
        assert_eq!(def.def(title).proper_name, "heading");
        assert_ne!(def.find_local("pages"), Some(title));
        assert!(TypeDef::parse("Book", "string title as heading\nstring heading\n").is_err());
    }

    #[test]
    fn test_render_roundtrip() {
        let def = TypeDef::parse("um_Group", GROUP).unwrap();
        let text = def.render();
        assert!(text.starts_with("# 用户组\n\\supertype Principal\n"));
        assert!(text.contains("Group{} ancestors r\n"));
        assert!(text.contains("Group{} @ancestors as descendants\n"));
        assert!(text.contains("string{} privileges w\n"));
        assert!(!text.contains("graphene_type"));
        let again = TypeDef::parse("um_Group", &text).unwrap();
        assert_eq!(again.defs(), def.defs());
    }

    #[test]
    fn test_empty_def_and_mask() {
        let mut def = TypeDef::empty("Note").unwrap();
        let idx = def.empty_def("body").unwrap();
        assert_eq!(def.def(idx).mask, AccessMask::NONE);
        assert!(def.def(idx).render("").is_none());
        def.def_mut(idx).datatype = Some(DatumType::String);
        assert_eq!(def.def(idx).render("").as_deref(), Some("string{} body n"));
        assert!(def.empty_def("body").is_err());
        assert_eq!(AccessMask::parse("ru").render().as_deref(), Some("ru"));
        assert!(AccessMask::parse("w").allows(AccessMask::DELETE));
    }
}
