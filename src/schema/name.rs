//! 类型名与属性名
//!
//! 类型名形如 `ns1_ns2_Name`，命名空间小写、最后一段首字母大写；
//! 属性名可带 `@`（反向）、`_`（绝对名）与 `:xx_YY` 语言后缀。

use crate::error::{Error, Result};
use crate::types::Direction;
use once_cell::sync::Lazy;
use regex::Regex;

static TYPE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z][a-z0-9]*_)*[A-Z][a-zA-Z0-9]*$").expect("valid regex"));

static PRED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(@)?(_)?((([a-z][a-z0-9]*_)*)([a-z][a-zA-Z0-9]*))(:([a-z][a-z])(_([A-Z][A-Z]))?)?$")
        .expect("valid regex")
});

static LANG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z](_[A-Z][A-Z])?$").expect("valid regex"));

/// 保留属性名
pub const RESERVED: &str = "id";

/// 解析后的属性名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredName {
    /// 完整谓词名（已加命名空间，不含语言后缀）
    pub pred: String,
    pub dir: Direction,
    pub lang: Option<String>,
}

/// 类型名的命名空间，没有则为空串
pub fn type_namespace(name: &str) -> &str {
    match name.rfind('_') {
        Some(pos) => &name[..pos],
        None => "",
    }
}

pub fn validate_type_name(name: &str) -> Result<()> {
    if TYPE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(format!(
            "类型名必须以大写字母开头且命名空间小写: {}",
            name
        )))
    }
}

/// 相对类型名转为完整类型名；`_` 开头表示绝对名
pub fn resolve_type_name(name: &str, ns: &str) -> String {
    if let Some(abs) = name.strip_prefix('_') {
        abs.to_string()
    } else if ns.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", ns, name)
    }
}

/// 完整类型名在 `ns` 下的相对写法
pub fn relative_type_name(name: &str, ns: &str) -> String {
    if ns.is_empty() {
        return name.to_string();
    }
    match name.strip_prefix(ns).and_then(|rest| rest.strip_prefix('_')) {
        Some(rel) => rel.to_string(),
        None => format!("_{}", name),
    }
}

pub fn parse_pred(name: &str, ns: &str) -> Result<PredName> {
    let caps = PRED_NAME
        .captures(name)
        .ok_or_else(|| Error::InvalidName(name.to_string()))?;
    if caps.get(6).map(|m| m.as_str()) == Some(RESERVED) {
        return Err(Error::InvalidName(format!(
            "属性名 '{}' 是保留名，请换一个",
            RESERVED
        )));
    }
    let dir = if caps.get(1).is_some() {
        Direction::Backward
    } else {
        Direction::Forward
    };
    let base = &caps[3];
    let pred = if caps.get(2).is_some() || ns.is_empty() {
        base.to_string()
    } else {
        format!("{}_{}", ns, base)
    };
    let lang = caps.get(7).map(|m| m.as_str()[1..].to_string());
    Ok(PredName { pred, dir, lang })
}

pub fn validate_lang(lang: &str) -> Result<()> {
    if LANG.is_match(lang) {
        Ok(())
    } else {
        Err(Error::InvalidLanguage(lang.to_string()))
    }
}

/// 拆出 `name:lang` 中的语言后缀并校验
pub fn split_lang(name: &str) -> Result<(&str, Option<&str>)> {
    match name.split_once(':') {
        Some((base, lang)) => {
            validate_lang(lang)?;
            Ok((base, Some(lang)))
        }
        None => Ok((name, None)),
    }
}

/// 谓词在 `ns` 下的相对属性名与绝对属性名
pub fn property_names(pred: &str, dir: Direction, ns: &str) -> (String, String) {
    let back = dir.prefix();
    let abs = format!("{}_{}", back, pred);
    let rel = if ns.is_empty() {
        format!("{}{}", back, pred)
    } else {
        match pred.strip_prefix(ns).and_then(|rest| rest.strip_prefix('_')) {
            Some(rest) => format!("{}{}", back, rest),
            None => abs.clone(),
        }
    };
    (rel, abs)
}

/// 反向属性名：`@_pred` 或 `_pred`
pub fn inverse_name(pred: &str, dir: Direction) -> String {
    format!("{}_{}", dir.reverse().prefix(), pred)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert!(validate_type_name("um_Group").is_ok());
        assert!(validate_type_name("Book").is_ok());
        assert!(validate_type_name("um_group").is_err());
        assert!(validate_type_name("Um_Group").is_err());
        assert_eq!(type_namespace("a_b_Type"), "a_b");
        assert_eq!(type_namespace("Type"), "");
        assert_eq!(resolve_type_name("User", "um"), "um_User");
        assert_eq!(resolve_type_name("_b_Other", "a"), "b_Other");
        assert_eq!(relative_type_name("um_User", "um"), "User");
        assert_eq!(relative_type_name("b_Other", "a"), "_b_Other");
    }

    #[test]
    fn test_parse_pred() {
        let p = parse_pred("email", "um").unwrap();
        assert_eq!(p.pred, "um_email");
        assert_eq!(p.dir, Direction::Forward);

        let p = parse_pred("@_groups", "um").unwrap();
        assert_eq!(p.pred, "groups");
        assert_eq!(p.dir, Direction::Backward);

        let p = parse_pred("title:en_US", "").unwrap();
        assert_eq!(p.pred, "title");
        assert_eq!(p.lang.as_deref(), Some("en_US"));

        assert!(matches!(parse_pred("id", ""), Err(Error::InvalidName(_))));
        assert!(parse_pred("Bad", "").is_err());
    }

    #[test]
    fn test_property_names() {
        assert_eq!(
            property_names("um_email", Direction::Forward, "um"),
            ("email".to_string(), "_um_email".to_string())
        );
        assert_eq!(
            property_names("graphene_type", Direction::Forward, "um"),
            ("_graphene_type".to_string(), "_graphene_type".to_string())
        );
        assert_eq!(
            property_names("author", Direction::Backward, ""),
            ("@author".to_string(), "@_author".to_string())
        );
        assert_eq!(inverse_name("author", Direction::Forward), "@_author");
    }

    #[test]
    fn test_lang() {
        assert_eq!(split_lang("title:it").unwrap(), ("title", Some("it")));
        assert!(matches!(
            split_lang("title:ITA"),
            Err(Error::InvalidLanguage(_))
        ));
    }
}
