//! Parsing and formatting for PostgreSQL text array literals (`{a,"b c",NULL}`).
//!
//! Legacy rows store image lists in several shapes: real `text[]` columns
//! rendered with `::text`, JSON arrays written by the scraper, and plain
//! comma separated strings typed in by hand. All of them come through here.

use serde_json::Value;

/// Parse a one-dimensional array literal into its non-null elements.
///
/// Non-literal input is handled leniently: JSON arrays are decoded and any
/// other text is split on the usual separators.
pub fn parse_text_array(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let body = strip_dimensions(trimmed);
    if body.starts_with('{') {
        return parse_literal(body);
    }

    if body.starts_with('[')
        && let Ok(Value::Array(values)) = serde_json::from_str::<Value>(body)
    {
        return values
            .into_iter()
            .filter_map(|value| match value {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect();
    }

    body.split([',', '\n', ';', '|'])
        .map(|entry| entry.trim().trim_matches('"').trim())
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render values as a `text[]` literal that [`parse_text_array`] reads back.
///
/// Every element is quoted so `NULL`, braces and separators stay literal.
/// Empty strings are left out, matching what the parser keeps.
pub fn format_text_array<S: AsRef<str>>(values: &[S]) -> String {
    let mut out = String::from("{");
    for value in values.iter().map(|v| v.as_ref()).filter(|v: &&str| !v.is_empty()) {
        if out.len() > 1 {
            out.push(',');
        }
        out.push('"');
        for ch in value.chars() {
            if matches!(ch, '"' | '\\') {
                out.push('\\');
            }
            out.push(ch);
        }
        out.push('"');
    }
    out.push('}');
    out
}

// `[1:3]={...}` carries explicit bounds; only the braces matter here.
fn strip_dimensions(input: &str) -> &str {
    if input.starts_with('[')
        && let Some(pos) = input.find("={")
        && input[..pos].chars().all(|c| c.is_ascii_digit() || "[]:-".contains(c))
    {
        return &input[pos + 1..];
    }
    input
}

fn parse_literal(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = body.chars();

    while let Some(ch) = chars.next() {
        if quoted {
            match ch {
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                '"' => quoted = false,
                _ => current.push(ch),
            }
            continue;
        }
        match ch {
            '"' => {
                quoted = true;
                was_quoted = true;
            }
            '{' => {}
            ',' | '}' => {
                flush(&mut out, &mut current, was_quoted);
                was_quoted = false;
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            _ => current.push(ch),
        }
    }
    flush(&mut out, &mut current, was_quoted);
    out
}

fn flush(out: &mut Vec<String>, current: &mut String, was_quoted: bool) {
    let value = std::mem::take(current);
    if was_quoted {
        if !value.is_empty() {
            out.push(value);
        }
        return;
    }
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return;
    }
    out.push(trimmed.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_quoted_elements() {
        let parsed = parse_text_array(r#"{https://a.jp/1.jpg,"https://a.jp/2 b.jpg"}"#);
        assert_eq!(parsed, vec!["https://a.jp/1.jpg", "https://a.jp/2 b.jpg"]);
    }

    #[test]
    fn honours_escapes_and_drops_nulls() {
        let parsed = parse_text_array(r#"{"say \"hi\"",NULL,"back\\slash", null ,""}"#);
        assert_eq!(parsed, vec![r#"say "hi""#, r"back\slash"]);
    }

    #[test]
    fn quoted_null_is_a_value() {
        assert_eq!(parse_text_array(r#"{"NULL"}"#), vec!["NULL"]);
    }

    #[test]
    fn empty_literal_and_blank_input() {
        assert!(parse_text_array("{}").is_empty());
        assert!(parse_text_array("   ").is_empty());
    }

    #[test]
    fn flattens_nested_and_dimensioned_literals() {
        assert_eq!(parse_text_array("{{a,b},{c}}"), vec!["a", "b", "c"]);
        assert_eq!(parse_text_array("[1:2]={x,y}"), vec!["x", "y"]);
    }

    #[test]
    fn accepts_json_arrays() {
        let parsed = parse_text_array(r#"["https://a.jp/1.jpg", " ", "https://a.jp/2.jpg"]"#);
        assert_eq!(parsed, vec!["https://a.jp/1.jpg", "https://a.jp/2.jpg"]);
    }

    #[test]
    fn splits_loose_lists() {
        let parsed = parse_text_array("https://a.jp/1.jpg, https://a.jp/2.jpg\nhttps://a.jp/3.jpg");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2], "https://a.jp/3.jpg");
    }

    #[test]
    fn formatted_literals_parse_back() {
        let values = vec![
            "https://a.jp/1.jpg".to_string(),
            "a,b".to_string(),
            r#"say "hi""#.to_string(),
            r"C:\photos\1.jpg".to_string(),
            "  padded value ".to_string(),
            "{braced}".to_string(),
            "NULL".to_string(),
        ];
        let literal = format_text_array(&values);
        assert!(literal.starts_with("{\"https://a.jp/1.jpg\","));
        assert_eq!(parse_text_array(&literal), values);
    }

    #[test]
    fn formats_empty_and_blank_values() {
        assert_eq!(format_text_array::<&str>(&[]), "{}");
        assert_eq!(format_text_array(&["", "x"]), r#"{"x"}"#);
    }
}
