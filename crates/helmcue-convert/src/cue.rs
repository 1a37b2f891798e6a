//! CUE lexical helpers: scalar conversion, string escaping, identifier
//! quoting, and indentation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_$][a-zA-Z0-9_$]*$").expect("valid regex"));

/// Returns `s` verbatim when it is a valid CUE identifier, else its
/// quoted form.
pub fn cue_key(s: &str) -> String {
    if IDENT_RE.is_match(s) {
        s.to_string()
    } else {
        quote_string(s)
    }
}

pub fn is_identifier(s: &str) -> bool {
    IDENT_RE.is_match(s)
}

/// Canonical CUE double-quoted string literal.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    out.push_str(&escape_interpolation(s));
    out.push('"');
    out
}

/// Escapes a literal fragment for placement inside a CUE quoted string
/// (including interpolated strings).
pub fn escape_interpolation(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Appends `level` tabs to the buffer.
pub fn write_indent(buf: &mut String, level: usize) {
    for _ in 0..level {
        buf.push('\t');
    }
}

/// Reports whether `s` looks like a complete YAML flow mapping
/// (`{…}`) or flow sequence (`[…]`) with content.
pub fn is_flow_collection(s: &str) -> bool {
    let s = s.trim();
    let bytes = s.as_bytes();
    (s.len() > 2 && bytes[0] == b'{' && bytes[s.len() - 1] == b'}')
        || (s.len() > 2 && bytes[0] == b'[' && bytes[s.len() - 1] == b']')
}

/// Reports whether `s` starts a YAML flow collection that does not
/// close within `s` (a template action splits it across nodes).
pub fn starts_incomplete_flow(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    let first = s.as_bytes()[0];
    if first != b'{' && first != b'[' {
        return false;
    }
    !is_flow_collection(s)
}

/// Scans `s` tracking YAML flow bracket depth, skipping quoted strings.
/// Starts from `depth`. Returns the byte position just after depth
/// first reaches 0 (or `None` if it never does) and the final depth.
pub fn flow_bracket_depth(s: &str, mut depth: i32) -> (Option<usize>, i32) {
    let bytes = s.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i];
        if in_single {
            if ch == b'\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        if in_double {
            if ch == b'\\' && i + 1 < bytes.len() {
                i += 2;
                continue;
            }
            if ch == b'"' {
                in_double = false;
            }
            i += 1;
            continue;
        }
        match ch {
            b'\'' => in_single = true,
            b'"' => in_double = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    return (Some(i + 1), 0);
                }
            }
            _ => {}
        }
        i += 1;
    }
    (None, depth)
}

/// Converts a YAML value string (scalar or flow collection) to its CUE
/// representation at the given indent level. Malformed input falls back
/// to a quoted string of the source bytes.
pub fn scalar_to_cue(s: &str, indent: usize) -> String {
    let s = s.trim();
    if s.is_empty() {
        return "\"\"".to_string();
    }

    let parsed: Result<Value, _> = serde_yaml::from_str(s);
    let value = match parsed {
        Ok(v) => v,
        Err(_) => return quote_string(s),
    };

    // Only accept collection results for actual flow-collection input;
    // a stray "a: b" value must stay a quoted string, as in YAML.
    let first = s.as_bytes()[0];
    match &value {
        Value::Mapping(_) if first != b'{' => return quote_string(s),
        Value::Sequence(_) if first != b'[' => return quote_string(s),
        Value::Tagged(_) => return quote_string(s),
        _ => {}
    }

    value_to_cue(&value, indent)
}

/// Formats a parsed YAML value as CUE with tab indentation. Mappings
/// emit as multi-line structs; sequences of scalars stay on one line.
fn value_to_cue(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_string(s),
        Value::Sequence(seq) => {
            if seq.is_empty() {
                return "[]".to_string();
            }
            let scalar_only = seq
                .iter()
                .all(|v| !matches!(v, Value::Sequence(_) | Value::Mapping(_)));
            if scalar_only {
                let elems: Vec<String> =
                    seq.iter().map(|v| value_to_cue(v, indent)).collect();
                format!("[{}]", elems.join(", "))
            } else {
                let mut out = String::from("[\n");
                for v in seq {
                    write_indent(&mut out, indent + 1);
                    out.push_str(&value_to_cue(v, indent + 1));
                    out.push_str(",\n");
                }
                write_indent(&mut out, indent);
                out.push(']');
                out
            }
        }
        Value::Mapping(map) => {
            if map.is_empty() {
                return "{}".to_string();
            }
            let mut out = String::from("{\n");
            for (k, v) in map {
                write_indent(&mut out, indent + 1);
                let key = match k {
                    Value::String(s) => cue_key(s),
                    other => cue_key(&value_to_cue(other, 0)),
                };
                out.push_str(&key);
                out.push_str(": ");
                out.push_str(&value_to_cue(v, indent + 1));
                out.push('\n');
            }
            write_indent(&mut out, indent);
            out.push('}');
            out
        }
        Value::Tagged(tagged) => value_to_cue(&tagged.value, indent),
    }
}

/// Wraps a CUE expression for embedding in a string interpolation. A
/// CUE string literal inlines its content directly to avoid nesting.
pub fn inline_expr(expr: &str) -> String {
    let bytes = expr.as_bytes();
    if expr.len() >= 2 && bytes[0] == b'"' && bytes[expr.len() - 1] == b'"' {
        return expr[1..expr.len() - 1].to_string();
    }
    format!("\\({expr})")
}

/// Prefixes every non-empty line of `s` with `prefix`.
pub fn indent_block(s: &str, prefix: &str) -> String {
    s.split('\n')
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Removes leading `//` comment lines from a CUE definition string.
/// Keeps per-template output concise while chart-level helpers.cue
/// retains the doc comments.
pub fn strip_cue_comments(s: &str) -> &str {
    let mut rest = s;
    while rest.starts_with("//") {
        match rest.find('\n') {
            Some(i) => rest = &rest[i + 1..],
            None => return "",
        }
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_conversion() {
        assert_eq!(scalar_to_cue("true", 0), "true");
        assert_eq!(scalar_to_cue("false", 0), "false");
        assert_eq!(scalar_to_cue("null", 0), "null");
        assert_eq!(scalar_to_cue("~", 0), "null");
        assert_eq!(scalar_to_cue("80", 0), "80");
        assert_eq!(scalar_to_cue("1.5", 0), "1.5");
        assert_eq!(scalar_to_cue("test", 0), "\"test\"");
        assert_eq!(scalar_to_cue("\"quoted\"", 0), "\"quoted\"");
        assert_eq!(scalar_to_cue("'single'", 0), "\"single\"");
        assert_eq!(scalar_to_cue("", 0), "\"\"");
    }

    #[test]
    fn scalar_flow_collections() {
        assert_eq!(scalar_to_cue("[1, 2, 3]", 0), "[1, 2, 3]");
        assert_eq!(scalar_to_cue("{a: 1}", 0), "{\n\ta: 1\n}");
        assert_eq!(
            scalar_to_cue("{a: 1, b: two}", 1),
            "{\n\t\ta: 1\n\t\tb: \"two\"\n\t}"
        );
    }

    #[test]
    fn scalar_rejects_bare_mapping_text() {
        // "a: b" is not a valid YAML *value*; keep it a string.
        assert_eq!(scalar_to_cue("a: b", 0), "\"a: b\"");
    }

    #[test]
    fn keys() {
        assert_eq!(cue_key("name"), "name");
        assert_eq!(cue_key("_x9"), "_x9");
        assert_eq!(cue_key("app.kubernetes.io/name"), "\"app.kubernetes.io/name\"");
        assert_eq!(cue_key("8080"), "\"8080\"");
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_interpolation("a\"b"), "a\\\"b");
        assert_eq!(escape_interpolation("a\\b"), "a\\\\b");
        assert_eq!(escape_interpolation("a\nb\tc"), "a\\nb\\tc");
    }

    #[test]
    fn inline_expr_unwraps_string_literals() {
        assert_eq!(inline_expr("#values.x"), "\\(#values.x)");
        assert_eq!(inline_expr("\"lit\""), "lit");
    }

    #[test]
    fn flow_depth_tracking() {
        let (end, depth) = flow_bracket_depth("{a: 1}", 0);
        assert_eq!(end, Some(6));
        assert_eq!(depth, 0);

        let (end, depth) = flow_bracket_depth("{a: {b: ", 0);
        assert_eq!(end, None);
        assert_eq!(depth, 2);

        // Brackets inside quotes are skipped.
        let (end, _) = flow_bracket_depth("{a: \"}\"}", 0);
        assert_eq!(end, Some(8));
    }

    #[test]
    fn incomplete_flow_detection() {
        assert!(starts_incomplete_flow("{a: "));
        assert!(!starts_incomplete_flow("{a: 1}"));
        assert!(!starts_incomplete_flow("plain"));
    }

    #[test]
    fn strip_comments() {
        assert_eq!(strip_cue_comments("// a\n// b\nx: 1\n"), "x: 1\n");
        assert_eq!(strip_cue_comments("x: 1\n"), "x: 1\n");
    }
}
