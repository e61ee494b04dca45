//! Text encoding detection for delimited sources.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

/// Priority list tried by `auto` when none is configured
pub const DEFAULT_ENCODINGS: &[&str] = &["utf-8", "gb18030", "gbk", "big5", "shift_jis"];

/// Permissive decoder used when nothing in the priority list fits
const FALLBACK_LABEL: &str = "windows-1252";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub fn resolve_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

fn decode_strict(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    if encoding == UTF_8 {
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        return std::str::from_utf8(body).ok().map(str::to_string);
    }
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
}

/// Decode `bytes` as `label` (or detect with `auto`); returns the text and the
/// label that decoded it.
pub fn decode(bytes: &[u8], label: &str, priority: &[String]) -> Result<(String, String), String> {
    if !label.eq_ignore_ascii_case("auto") {
        let encoding =
            resolve_label(label).ok_or_else(|| format!("unknown encoding: {}", label))?;
        return decode_strict(bytes, encoding)
            .map(|text| (text, label.trim().to_ascii_lowercase()))
            .ok_or_else(|| format!("'{}' codec can't decode the file content", label));
    }

    let defaults: Vec<String>;
    let candidates = if priority.is_empty() {
        defaults = DEFAULT_ENCODINGS.iter().map(|s| s.to_string()).collect();
        &defaults
    } else {
        priority
    };
    for candidate in candidates {
        let Some(encoding) = resolve_label(candidate) else {
            continue;
        };
        if let Some(text) = decode_strict(bytes, encoding) {
            return Ok((text, candidate.trim().to_ascii_lowercase()));
        }
    }
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    Ok((text.into_owned(), FALLBACK_LABEL.to_string()))
}
