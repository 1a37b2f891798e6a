//! Named-template (define) compilation.
//!
//! Each `{{ define }}` block becomes a hidden CUE field. Inside helper
//! bodies, dot refers to whatever the caller passes via `include`, so
//! field accesses resolve against `#arg` and are collected into the
//! helper's argument schema.

use indexmap::IndexMap;

use crate::ast::Node;
use crate::converter::{text_content, Converter, RangeBinding};
use crate::cue::{indent_block, quote_string};
use crate::emitter::Emitter;
use crate::error::{ConversionWarning, ConvertError, Result};
use crate::validate;

/// Shared set of parsed helper templates, keyed by template name.
pub type TreeSet = IndexMap<String, Vec<Node>>;

/// Parses helper template sources into a shared tree set. Identical
/// duplicate bodies are silently deduplicated; conflicting bodies are
/// an error unless `allow_dup`, in which case the last definition wins
/// with a warning.
pub fn parse_helpers(
    helpers: &[&str],
    allow_dup: bool,
) -> Result<(TreeSet, Vec<ConversionWarning>)> {
    let mut set = TreeSet::new();
    let mut warnings = Vec::new();

    for (i, src) in helpers.iter().enumerate() {
        let tmpl = crate::parser::parse_template(src)
            .map_err(|e| ConvertError::Input(format!("parsing helper {i}: {e}")))?;
        for (name, body) in tmpl.defines {
            match set.get(&name) {
                None => {
                    set.insert(name, body);
                }
                Some(existing) if *existing == body => {
                    // Identical body in another file.
                }
                Some(_) => {
                    if !allow_dup {
                        return Err(ConvertError::ConflictingHelper(name));
                    }
                    warnings.push(ConversionWarning::new(
                        name.clone(),
                        "duplicate helper: using last definition",
                    ));
                    set.insert(name, body);
                }
            }
        }
    }

    Ok((set, warnings))
}

/// Converts a template name to a CUE hidden field name: lowercase and
/// digits kept, everything else becomes `_`, always prefixed `_`.
pub fn helper_to_cue_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    out.push('_');
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out
}

/// Whether a helper body is plain text with no YAML shape: it then
/// compiles to a quoted string rather than struct fields.
fn is_string_helper_body(nodes: &[Node]) -> bool {
    let text = text_content(nodes);
    for line in text.split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.contains(": ") || trimmed.ends_with(':') || trimmed.starts_with("- ") {
            return false; // looks like YAML
        }
    }
    // Actions inside the body need the full conversion path.
    nodes.iter().all(|n| matches!(n, Node::Text(_)))
}

impl Converter<'_> {
    /// Compiles a helper body to a CUE expression, returning the
    /// expression and the `#arg` field paths collected from it.
    pub(crate) fn convert_helper_body(
        &mut self,
        nodes: &[Node],
    ) -> Result<(String, Vec<Vec<String>>)> {
        if is_string_helper_body(nodes) {
            let text = text_content(nodes);
            let text = text.trim();
            if text.is_empty() {
                return Ok(("\"\"".to_string(), Vec::new()));
            }
            // Normalize whitespace: join fragments with single spaces.
            let folded = text.split_whitespace().collect::<Vec<_>>().join(" ");
            return Ok((quote_string(&folded), Vec::new()));
        }

        // Compile with fresh per-body state; schema bags keep
        // accumulating in self.bags.
        let saved_emit = std::mem::replace(&mut self.emit, Emitter::new());
        let saved_scope = std::mem::take(&mut self.scope);

        // With no configured root expression, dot inside helper bodies
        // resolves against #arg and accesses are collected.
        let use_arg = self.config.root_expr.is_none();
        if use_arg {
            self.scope.range_stack.push(RangeBinding {
                cue_expr: "#arg".to_string(),
                helm_obj: String::new(),
                base_path: Vec::new(),
            });
            self.scope.helper_arg_refs = Some(Vec::new());
        }

        let walk = self.process_nodes(nodes);
        self.emit.finish();

        let body_scope = std::mem::replace(&mut self.scope, saved_scope);
        let body_emit = std::mem::replace(&mut self.emit, saved_emit);
        walk?;

        let mut body = body_emit.out.trim().to_string();

        // Top-level if guards extracted inside the body must wrap it
        // explicitly so the conditional survives.
        if !body_scope.top_level_guards.is_empty() {
            self.bags.has_conditions = true;
            let mut wrapped = String::new();
            let mut indent = 0;
            for guard in &body_scope.top_level_guards {
                crate::cue::write_indent(&mut wrapped, indent);
                wrapped.push_str(&format!("if {guard} {{\n"));
                indent += 1;
            }
            for line in body.split('\n') {
                if !line.is_empty() {
                    crate::cue::write_indent(&mut wrapped, indent);
                }
                wrapped.push_str(line);
                wrapped.push('\n');
            }
            for i in (0..body_scope.top_level_guards.len()).rev() {
                crate::cue::write_indent(&mut wrapped, i);
                wrapped.push_str("}\n");
            }
            body = wrapped.trim().to_string();
        }

        if body.is_empty() {
            return Ok(("\"\"".to_string(), Vec::new()));
        }

        let has_fields = body_has_fields(&body);
        let arg_refs = body_scope.helper_arg_refs.unwrap_or_default();

        // A body referencing #arg gets wrapped with its argument schema.
        // The `{#arg:` pattern from _nonzero calls is a false positive.
        let body_for_arg_check = body.replace("{#arg:", "{_:");
        if use_arg && body_for_arg_check.contains("#arg") {
            let schema = crate::schema::build_arg_schema(&arg_refs);
            let result = if has_fields {
                format!("{{\n\t#arg: {}\n{}\n}}", schema, indent_block(&body, "\t"))
            } else {
                format!("{{\n\t#arg: {}\n\t{}\n}}", schema, body)
            };
            self.check_helper_expr(&result)?;
            return Ok((result, arg_refs));
        }

        if has_fields {
            let result = format!("{{\n{}\n}}", indent_block(&body, "\t"));
            self.check_helper_expr(&result)?;
            return Ok((result, Vec::new()));
        }

        // Comprehension bodies need struct wrapping: CUE's if/for are
        // field-level, and a false condition yields {} which _nonzero
        // treats as zero.
        if body.starts_with("if ") || body.starts_with("for ") {
            let result = format!("{{\n{}\n}}", indent_block(&body, "\t"));
            self.check_helper_expr(&result)?;
            return Ok((result, Vec::new()));
        }

        Ok((body, Vec::new()))
    }

    fn check_helper_expr(&self, expr: &str) -> Result<()> {
        validate::validate_helper_expr(expr, &self.bags.imports).map_err(|e| {
            ConvertError::InvalidOutput(format!("helper body produced invalid CUE: {e}"))
        })
    }
}

/// Whether a compiled body consists of struct fields rather than a
/// single expression.
fn body_has_fields(body: &str) -> bool {
    for line in body.split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == "}" || trimmed == "{" {
            continue;
        }
        // A ": " inside a comprehension guard is part of the
        // expression, not a field.
        if trimmed.starts_with("if ") || trimmed.starts_with("for ") {
            continue;
        }
        if let Some(idx) = trimmed.find(": ") {
            if idx > 0 {
                return true;
            }
        }
        if trimmed.ends_with(": {") {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cue_name_sanitization() {
        assert_eq!(helper_to_cue_name("myapp.name"), "_myapp_name");
        assert_eq!(helper_to_cue_name("my-chart.labels"), "_my_chart_labels");
        assert_eq!(helper_to_cue_name("x2"), "_x2");
    }

    #[test]
    fn parse_helpers_collects_defines() {
        let src = "{{- define \"a.one\" }}x: 1{{ end }}{{- define \"a.two\" }}y: 2{{ end }}";
        let (set, warnings) = parse_helpers(&[src], false).unwrap();
        assert_eq!(set.len(), 2);
        assert!(warnings.is_empty());
        assert!(set.contains_key("a.one"));
    }

    #[test]
    fn parse_helpers_dedups_identical() {
        let src = "{{- define \"a\" }}x: 1{{ end }}";
        let (set, warnings) = parse_helpers(&[src, src], false).unwrap();
        assert_eq!(set.len(), 1);
        assert!(warnings.is_empty());
    }

    #[test]
    fn parse_helpers_conflict_errors() {
        let a = "{{- define \"a\" }}x: 1{{ end }}";
        let b = "{{- define \"a\" }}x: 2{{ end }}";
        let err = parse_helpers(&[a, b], false).unwrap_err();
        assert!(matches!(err, ConvertError::ConflictingHelper(name) if name == "a"));
    }

    #[test]
    fn parse_helpers_conflict_last_wins_when_allowed() {
        let a = "{{- define \"a\" }}x: 1{{ end }}";
        let b = "{{- define \"a\" }}x: 2{{ end }}";
        let (set, warnings) = parse_helpers(&[a, b], true).unwrap();
        assert_eq!(warnings.len(), 1);
        let body = &set["a"];
        assert!(matches!(&body[0], Node::Text(t) if t == "x: 2"));
    }

    #[test]
    fn string_body_detection() {
        let nodes = vec![Node::Text("plain text name\n".into())];
        assert!(is_string_helper_body(&nodes));

        let nodes = vec![Node::Text("key: value\n".into())];
        assert!(!is_string_helper_body(&nodes));

        let nodes = vec![
            Node::Text("name".into()),
            Node::Action(crate::ast::Pipe::default()),
        ];
        assert!(!is_string_helper_body(&nodes));
    }

    #[test]
    fn field_body_detection() {
        assert!(body_has_fields("app: \"x\"\nversion: 2"));
        assert!(!body_has_fields("\"just a string\""));
        assert!(!body_has_fields("if x {\n}\n"));
        assert!(body_has_fields("labels: {"));
    }
}
