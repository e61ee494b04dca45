//! Variable and column naming rules for loaded tables.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static NON_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("valid regex"));

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Whether `word` is a reserved word and cannot name a variable
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric()) && !is_keyword(name)
}

/// `df_<stem>` with every run of non-identifier characters collapsed to `_`
pub fn base_variable_name(stem: &str) -> String {
    let cleaned = NON_IDENT.replace_all(stem, "_");
    let cleaned = cleaned.trim_matches('_').to_ascii_lowercase();
    if cleaned.is_empty() {
        "df_data".to_string()
    } else {
        format!("df_{}", cleaned)
    }
}

/// First of `base`, `base_1`, `base_2`, ... that `taken` rejects
pub fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Empty headers become `Unnamed: <i>`; repeats get `.1`, `.2`, ... suffixes
pub fn normalize_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for (i, header) in raw.into_iter().enumerate() {
        let header = if header.trim().is_empty() {
            format!("Unnamed: {}", i)
        } else {
            header
        };
        let mut name = header.clone();
        let mut n = 1;
        while seen.contains(&name) {
            name = format!("{}.{}", header, n);
            n += 1;
        }
        seen.insert(name.clone());
        out.push(name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_base_variable_name() {
        assert_eq!(base_variable_name("sales 2024"), "df_sales_2024");
        assert_eq!(base_variable_name("Q1-report.v2"), "df_q1_report_v2");
        assert_eq!(base_variable_name("销售"), "df_data");
    }

    #[test]
    fn test_unique_name_appends_suffix() {
        let taken = ["df_sales", "df_sales_1"];
        assert_eq!(unique_name("df_sales", |n| taken.contains(&n)), "df_sales_2");
        assert_eq!(unique_name("df_other", |n| taken.contains(&n)), "df_other");
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_identifier("sales_df"));
        assert!(is_valid_identifier("_tmp"));
        assert!(!is_valid_identifier("1st"));
        assert!(!is_valid_identifier("my-df"));
        assert!(!is_valid_identifier("lambda"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("nonlocal"));
        assert!(is_keyword("None"));
        assert!(!is_keyword("frame"));
    }

    #[test]
    fn test_normalize_headers() {
        let headers = vec!["a".into(), "".into(), "a".into(), "a".into()];
        assert_eq!(
            normalize_headers(headers),
            vec!["a", "Unnamed: 1", "a.1", "a.2"]
        );
    }
}
