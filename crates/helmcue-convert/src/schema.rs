//! Schema inference: builds a field tree from recorded references,
//! defaults, required markers, and range targets, and emits it as a
//! CUE struct with optional/required markers and scalar leaf types.

use indexmap::IndexMap;

use crate::cue::{cue_key, write_indent};

/// CUE type for leaf fields known to be YAML scalars (accessed via
/// interpolation, not range).
pub(crate) const CUE_SCALAR_TYPE: &str = "bool | number | string | null";

/// A default value recorded for a field path within a context object.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefault {
    pub path: Vec<String>,
    /// CUE literal, e.g. `"fallback"` or `8080`.
    pub cue_value: String,
}

/// A node in the tree of nested field references. Children keep
/// first-seen insertion order.
#[derive(Debug, Default)]
pub(crate) struct FieldNode {
    pub children: IndexMap<String, FieldNode>,
    /// Non-empty if this node carries a default.
    pub default: Option<String>,
    /// Accessed as a value, not only a condition.
    pub required: bool,
    /// Used as a range target or other non-scalar position.
    pub is_range: bool,
}

impl FieldNode {
    fn descend(&mut self, path: &[String]) -> &mut FieldNode {
        let mut node = self;
        for elem in path {
            node = node.children.entry(elem.clone()).or_default();
        }
        node
    }

    /// Walks an existing path without inserting; stops at the deepest
    /// node present.
    fn walk_existing(&mut self, path: &[String]) -> Option<&mut FieldNode> {
        let mut node = self;
        let mut moved = false;
        for elem in path {
            if !node.children.contains_key(elem) {
                break;
            }
            node = node.children.get_mut(elem).expect("key checked");
            moved = true;
        }
        if moved {
            Some(node)
        } else {
            None
        }
    }
}

/// Builds the field tree from all reference flavors. Merging is
/// monotonic: references only add nodes, markers only strengthen.
pub(crate) fn build_field_tree(
    refs: &[Vec<String>],
    defaults: &[FieldDefault],
    required_refs: &[Vec<String>],
    range_refs: &[Vec<String>],
) -> FieldNode {
    let mut root = FieldNode::default();
    for r in refs {
        root.descend(r);
    }
    for d in defaults {
        root.descend(&d.path).default = Some(d.cue_value.clone());
    }
    for r in required_refs {
        if let Some(node) = root.walk_existing(r) {
            node.required = true;
        }
    }
    for r in range_refs {
        if let Some(node) = root.walk_existing(r) {
            node.is_range = true;
        }
    }
    root
}

/// Emits the children of a field tree node as CUE fields.
pub(crate) fn emit_field_nodes(out: &mut String, nodes: &IndexMap<String, FieldNode>, indent: usize) {
    for (name, node) in nodes {
        write_indent(out, indent);
        let marker = if node.required { "!" } else { "?" };
        if !node.children.is_empty() {
            if node.is_range {
                out.push_str(&format!("{}{}: [...{{\n", cue_key(name), marker));
            } else {
                out.push_str(&format!("{}{}: {{\n", cue_key(name), marker));
            }
            emit_field_nodes(out, &node.children, indent + 1);
            write_indent(out, indent + 1);
            out.push_str("...\n");
            write_indent(out, indent);
            if node.is_range {
                out.push_str("}]\n");
            } else {
                out.push_str("}\n");
            }
        } else if let Some(default) = &node.default {
            let leaf_type = if node.is_range {
                "_".to_string()
            } else {
                format!("({CUE_SCALAR_TYPE})")
            };
            out.push_str(&format!("{}: *{} | {}\n", cue_key(name), default, leaf_type));
        } else {
            let leaf_type = if node.is_range { "_" } else { CUE_SCALAR_TYPE };
            out.push_str(&format!("{}{}: {}\n", cue_key(name), marker, leaf_type));
        }
    }
}

/// Emits a full context-object schema body (`{ … }` content plus the
/// trailing open marker) at indent 1, or `_` when nothing was recorded.
pub(crate) fn emit_object_schema(
    cue_def: &str,
    refs: &[Vec<String>],
    defaults: &[FieldDefault],
    required_refs: &[Vec<String>],
    range_refs: &[Vec<String>],
) -> String {
    let mut out = String::new();
    if refs.is_empty() && defaults.is_empty() {
        out.push_str(&format!("{cue_def}: _\n"));
        return out;
    }
    out.push_str(&format!("{cue_def}: {{\n"));
    let root = build_field_tree(refs, defaults, required_refs, range_refs);
    emit_field_nodes(&mut out, &root.children, 1);
    write_indent(&mut out, 1);
    out.push_str("...\n");
    out.push_str("}\n");
    out
}

/// Builds the `#arg` schema expression for a helper from its collected
/// field references. Bare `{{ . }}` access yields `_`.
pub(crate) fn build_arg_schema(refs: &[Vec<String>]) -> String {
    if refs.is_empty() {
        return "_".to_string();
    }
    let root = build_field_tree(refs, &[], &[], &[]);
    let mut out = String::from("{\n");
    emit_field_nodes(&mut out, &root.children, 2);
    write_indent(&mut out, 2);
    out.push_str("...\n");
    out.push_str("\t}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn optional_scalar_leaf() {
        let out = emit_object_schema("#values", &[path(&["port"])], &[], &[], &[]);
        assert_eq!(
            out,
            "#values: {\n\tport?: bool | number | string | null\n\t...\n}\n"
        );
    }

    #[test]
    fn required_leaf_marker() {
        let out = emit_object_schema(
            "#values",
            &[path(&["name"])],
            &[],
            &[path(&["name"])],
            &[],
        );
        assert!(out.contains("name!: bool | number | string | null"));
    }

    #[test]
    fn default_leaf() {
        let out = emit_object_schema(
            "#values",
            &[path(&["port"])],
            &[FieldDefault {
                path: path(&["port"]),
                cue_value: "8080".to_string(),
            }],
            &[],
            &[],
        );
        assert!(out.contains("port: *8080 | (bool | number | string | null)"));
    }

    #[test]
    fn range_target_leaf_is_open() {
        let out = emit_object_schema(
            "#values",
            &[path(&["features"])],
            &[],
            &[],
            &[path(&["features"])],
        );
        assert!(out.contains("features?: _"));
    }

    #[test]
    fn range_target_with_children_is_list_of_structs() {
        let out = emit_object_schema(
            "#values",
            &[path(&["ports"]), path(&["ports", "name"])],
            &[],
            &[],
            &[path(&["ports"])],
        );
        assert!(out.contains("ports?: [...{"));
        assert!(out.contains("name?: bool | number | string | null"));
        assert!(out.contains("}]"));
    }

    #[test]
    fn nested_interior_nodes_stay_open() {
        let out = emit_object_schema(
            "#values",
            &[path(&["image", "repository"]), path(&["image", "tag"])],
            &[],
            &[],
            &[],
        );
        assert_eq!(
            out,
            "#values: {\n\timage?: {\n\t\trepository?: bool | number | string | null\n\t\ttag?: bool | number | string | null\n\t\t...\n\t}\n\t...\n}\n"
        );
    }

    #[test]
    fn empty_object_collapses() {
        let out = emit_object_schema("#release", &[], &[], &[], &[]);
        assert_eq!(out, "#release: _\n");
    }

    #[test]
    fn merge_is_monotonic() {
        // Adding more refs never removes nodes, markers only strengthen.
        let refs_a = vec![path(&["a"])];
        let refs_b = vec![path(&["a"]), path(&["b"])];
        let out_a = emit_object_schema("#values", &refs_a, &[], &[], &[]);
        let out_b = emit_object_schema("#values", &refs_b, &[], &[], &[]);
        assert!(out_b.contains("a?:"));
        assert!(out_b.contains("b?:"));
        assert!(out_a.contains("a?:"));
        assert!(!out_a.contains("b?:"));
    }

    #[test]
    fn arg_schema_shapes() {
        assert_eq!(build_arg_schema(&[]), "_");
        let schema = build_arg_schema(&[path(&["name"])]);
        assert!(schema.starts_with("{\n"));
        assert!(schema.contains("name?: bool | number | string | null"));
        assert!(schema.ends_with("\t}"));
    }

    #[test]
    fn first_seen_order_preserved() {
        let out = emit_object_schema(
            "#values",
            &[path(&["zeta"]), path(&["alpha"])],
            &[],
            &[],
            &[],
        );
        let zeta = out.find("zeta").unwrap();
        let alpha = out.find("alpha").unwrap();
        assert!(zeta < alpha);
    }
}
