//! AST for Go/Helm templates.
//!
//! The parser produces a flat stream of [`Element`]s in which `if`,
//! `else`, and `end` are separate actions, mirroring the raw token
//! structure of the template language. [`assemble`] stitches that stream
//! into the nested [`Node`] tree the converter walks, applies the
//! whitespace-trim markers (`{{-` / `-}}`), and extracts `{{ define }}`
//! blocks into a shared tree set.

use indexmap::IndexMap;

use crate::error::{ConvertError, Result};

/// A flat element as produced by the parser: raw text or an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Raw text (not inside {{ }}).
    RawText(String),
    /// An action (inside {{ }}).
    Action(Action),
}

/// An action (directive inside {{ }}).
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Left whitespace trimming ({{-).
    pub trim_left: bool,
    /// Right whitespace trimming (-}}).
    pub trim_right: bool,
    pub body: ActionBody,
}

/// The body of a flat action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionBody {
    /// {{/* comment */}}
    Comment(String),
    /// {{ if .X }}
    If(Pipe),
    /// {{ else if .X }}
    ElseIf(Pipe),
    /// {{ else }}
    Else,
    /// {{ end }}
    End,
    /// {{ range .X }} or {{ range $i, $v := .X }}
    Range(Pipe),
    /// {{ with .X }} or {{ with $v := .X }}
    With(Pipe),
    /// {{ define "name" }}
    Define(String),
    /// {{ template "name" . }}
    Template { name: String, pipe: Option<Pipe> },
    /// {{ block "name" . }} — define plus immediate invocation.
    Block { name: String, pipe: Pipe },
    /// Any other pipeline expression.
    Pipe(Pipe),
}

/// A node of the assembled template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Action(Pipe),
    If {
        pipe: Pipe,
        then: Vec<Node>,
        else_: Vec<Node>,
    },
    Range {
        pipe: Pipe,
        body: Vec<Node>,
        else_: Vec<Node>,
    },
    With {
        pipe: Pipe,
        body: Vec<Node>,
        else_: Vec<Node>,
    },
    /// Named include: {{ template "name" pipe }}.
    Template { name: String, pipe: Option<Pipe> },
    Comment(String),
}

/// A pipeline: optional variable declarations plus a command sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipe {
    /// Declared locals, without the `$` sigil. One entry for
    /// `$x := …`, two for `range $i, $v := …`.
    pub decl: Vec<String>,
    pub cmds: Vec<Command>,
}

impl Pipe {
    pub fn simple(arg: Arg) -> Self {
        Pipe {
            decl: Vec::new(),
            cmds: vec![Command { args: vec![arg] }],
        }
    }
}

/// A command in a pipeline. The first argument is the function name
/// (as [`Arg::Ident`]) for function calls, or the sole value otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Arg>,
}

/// A command argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Field access rooted at dot: `.Values.image.tag` → ["Values", "image", "tag"].
    Field(Vec<String>),
    /// Variable access. The first segment is the variable name without
    /// `$`, or the literal "$" for the root variable: `$.Values.x` →
    /// ["$", "Values", "x"], `$v.port` → ["v", "port"].
    Variable(Vec<String>),
    /// Bare dot: the current data context.
    Dot,
    /// A function or builtin name.
    Ident(String),
    Str(String),
    /// Number literal, kept as source text (valid CUE as-is).
    Number(String),
    Bool(bool),
    Nil,
    /// Parenthesized sub-pipeline.
    Pipe(Pipe),
}

/// An assembled template: the root body plus any `{{ define }}` blocks
/// it carried.
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub nodes: Vec<Node>,
    pub defines: IndexMap<String, Vec<Node>>,
}

/// Applies trim markers to the flat element stream. `{{-` removes all
/// whitespace at the end of the preceding text; `-}}` removes all
/// whitespace at the start of the following text.
fn apply_trim(elements: &mut Vec<Element>) {
    for i in 0..elements.len() {
        let (trim_left, trim_right) = match &elements[i] {
            Element::Action(a) => (a.trim_left, a.trim_right),
            Element::RawText(_) => continue,
        };
        if trim_left && i > 0 {
            if let Element::RawText(text) = &mut elements[i - 1] {
                let trimmed = text.trim_end().len();
                text.truncate(trimmed);
            }
        }
        if trim_right && i + 1 < elements.len() {
            if let Element::RawText(text) = &mut elements[i + 1] {
                *text = text.trim_start().to_string();
            }
        }
    }
    elements.retain(|e| !matches!(e, Element::RawText(t) if t.is_empty()));
}

enum BlockKind {
    If,
    Range,
    With,
    Define(String),
}

struct Frame {
    kind: BlockKind,
    /// `(Some(pipe), nodes)` for if/else-if branches, `(None, nodes)`
    /// for the else branch. Range/with have one main branch plus an
    /// optional else.
    branches: Vec<(Option<Pipe>, Vec<Node>)>,
}

impl Frame {
    fn current(&mut self) -> &mut Vec<Node> {
        &mut self.branches.last_mut().expect("frame has a branch").1
    }
}

/// Stitches the flat element stream into a nested tree, extracting
/// `{{ define }}` bodies into the returned template's define map.
pub fn assemble(mut elements: Vec<Element>) -> Result<Template> {
    apply_trim(&mut elements);

    let mut tmpl = Template::default();
    let mut stack: Vec<Frame> = Vec::new();

    // Appends a finished node to the innermost open block, or the root.
    fn push(tmpl: &mut Template, stack: &mut [Frame], node: Node) {
        match stack.last_mut() {
            Some(frame) => frame.current().push(node),
            None => tmpl.nodes.push(node),
        }
    }

    for element in elements {
        let action = match element {
            Element::RawText(text) => {
                push(&mut tmpl, &mut stack, Node::Text(text));
                continue;
            }
            Element::Action(a) => a,
        };
        match action.body {
            ActionBody::Comment(text) => {
                push(&mut tmpl, &mut stack, Node::Comment(text));
            }
            ActionBody::Pipe(pipe) => {
                push(&mut tmpl, &mut stack, Node::Action(pipe));
            }
            ActionBody::Template { name, pipe } => {
                push(&mut tmpl, &mut stack, Node::Template { name, pipe });
            }
            ActionBody::If(pipe) => {
                stack.push(Frame {
                    kind: BlockKind::If,
                    branches: vec![(Some(pipe), Vec::new())],
                });
            }
            ActionBody::Range(pipe) => {
                stack.push(Frame {
                    kind: BlockKind::Range,
                    branches: vec![(Some(pipe), Vec::new())],
                });
            }
            ActionBody::With(pipe) => {
                stack.push(Frame {
                    kind: BlockKind::With,
                    branches: vec![(Some(pipe), Vec::new())],
                });
            }
            ActionBody::Define(name) => {
                stack.push(Frame {
                    kind: BlockKind::Define(name),
                    branches: vec![(None, Vec::new())],
                });
            }
            ActionBody::Block { name, pipe } => {
                // block = define + immediate template invocation.
                push(
                    &mut tmpl,
                    &mut stack,
                    Node::Template {
                        name: name.clone(),
                        pipe: Some(pipe),
                    },
                );
                stack.push(Frame {
                    kind: BlockKind::Define(name),
                    branches: vec![(None, Vec::new())],
                });
            }
            ActionBody::ElseIf(pipe) => {
                let frame = stack
                    .last_mut()
                    .ok_or_else(|| ConvertError::Input("unexpected {{ else if }}".into()))?;
                if !matches!(frame.kind, BlockKind::If) {
                    return Err(ConvertError::Input(
                        "{{ else if }} outside an if block".into(),
                    ));
                }
                frame.branches.push((Some(pipe), Vec::new()));
            }
            ActionBody::Else => {
                let frame = stack
                    .last_mut()
                    .ok_or_else(|| ConvertError::Input("unexpected {{ else }}".into()))?;
                if matches!(frame.kind, BlockKind::Define(_)) {
                    return Err(ConvertError::Input("{{ else }} inside a define".into()));
                }
                frame.branches.push((None, Vec::new()));
            }
            ActionBody::End => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| ConvertError::Input("unexpected {{ end }}".into()))?;
                match frame.kind {
                    BlockKind::Define(name) => {
                        let (_, nodes) = frame.branches.into_iter().next().expect("define body");
                        tmpl.defines.insert(name, nodes);
                    }
                    BlockKind::If => {
                        // Fold else-if chains right to left into nested ifs.
                        let mut else_nodes: Vec<Node> = Vec::new();
                        for (cond, nodes) in frame.branches.into_iter().rev() {
                            match cond {
                                None => else_nodes = nodes,
                                Some(pipe) => {
                                    else_nodes = vec![Node::If {
                                        pipe,
                                        then: nodes,
                                        else_: else_nodes,
                                    }];
                                }
                            }
                        }
                        // The fold always ends on the main branch, so
                        // else_nodes holds exactly the outermost if.
                        let node = else_nodes.into_iter().next().expect("if branch");
                        push(&mut tmpl, &mut stack, node);
                    }
                    BlockKind::Range | BlockKind::With => {
                        let is_range = matches!(frame.kind, BlockKind::Range);
                        let mut branches = frame.branches.into_iter();
                        let (pipe, body) = branches.next().expect("main branch");
                        let pipe = pipe.expect("range/with pipe");
                        let else_ = branches.next().map(|(_, n)| n).unwrap_or_default();
                        let node = if is_range {
                            Node::Range { pipe, body, else_ }
                        } else {
                            Node::With { pipe, body, else_ }
                        };
                        push(&mut tmpl, &mut stack, node);
                    }
                }
            }
        }
    }

    if !stack.is_empty() {
        return Err(ConvertError::Input("unclosed block: missing {{ end }}".into()));
    }

    Ok(tmpl)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Element {
        Element::RawText(s.to_string())
    }

    fn action(body: ActionBody) -> Element {
        Element::Action(Action {
            trim_left: false,
            trim_right: false,
            body,
        })
    }

    fn trimmed_action(body: ActionBody) -> Element {
        Element::Action(Action {
            trim_left: true,
            trim_right: false,
            body,
        })
    }

    fn field_pipe(path: &[&str]) -> Pipe {
        Pipe::simple(Arg::Field(path.iter().map(|s| s.to_string()).collect()))
    }

    #[test]
    fn assemble_flat_text_and_action() {
        let tmpl = assemble(vec![
            text("name: "),
            action(ActionBody::Pipe(field_pipe(&["Values", "name"]))),
        ])
        .unwrap();
        assert_eq!(tmpl.nodes.len(), 2);
        assert!(matches!(&tmpl.nodes[0], Node::Text(t) if t == "name: "));
        assert!(matches!(&tmpl.nodes[1], Node::Action(_)));
    }

    #[test]
    fn assemble_if_else() {
        let tmpl = assemble(vec![
            action(ActionBody::If(field_pipe(&["Values", "debug"]))),
            text("a: 1\n"),
            action(ActionBody::Else),
            text("a: 2\n"),
            action(ActionBody::End),
        ])
        .unwrap();
        assert_eq!(tmpl.nodes.len(), 1);
        match &tmpl.nodes[0] {
            Node::If { then, else_, .. } => {
                assert_eq!(then.len(), 1);
                assert_eq!(else_.len(), 1);
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn assemble_else_if_nests() {
        let tmpl = assemble(vec![
            action(ActionBody::If(field_pipe(&["Values", "a"]))),
            text("a\n"),
            action(ActionBody::ElseIf(field_pipe(&["Values", "b"]))),
            text("b\n"),
            action(ActionBody::Else),
            text("c\n"),
            action(ActionBody::End),
        ])
        .unwrap();
        match &tmpl.nodes[0] {
            Node::If { else_, .. } => match &else_[0] {
                Node::If { else_: inner, .. } => assert_eq!(inner.len(), 1),
                other => panic!("expected nested If, got {other:?}"),
            },
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn assemble_define_extracted() {
        let tmpl = assemble(vec![
            action(ActionBody::Define("myapp.name".to_string())),
            text("app"),
            action(ActionBody::End),
            text("rest\n"),
        ])
        .unwrap();
        assert_eq!(tmpl.defines.len(), 1);
        assert!(tmpl.defines.contains_key("myapp.name"));
        assert_eq!(tmpl.nodes.len(), 1);
    }

    #[test]
    fn trim_left_removes_preceding_whitespace() {
        let tmpl = assemble(vec![
            text("key: value\n  "),
            trimmed_action(ActionBody::Pipe(field_pipe(&["Values", "x"]))),
        ])
        .unwrap();
        assert!(matches!(&tmpl.nodes[0], Node::Text(t) if t == "key: value"));
    }

    #[test]
    fn trim_right_removes_following_whitespace() {
        let tmpl = assemble(vec![
            Element::Action(Action {
                trim_left: false,
                trim_right: true,
                body: ActionBody::Pipe(field_pipe(&["Values", "x"])),
            }),
            text("\n  next: 1\n"),
        ])
        .unwrap();
        assert!(matches!(&tmpl.nodes[1], Node::Text(t) if t == "next: 1\n"));
    }

    #[test]
    fn unbalanced_end_is_an_error() {
        assert!(assemble(vec![action(ActionBody::End)]).is_err());
        assert!(assemble(vec![action(ActionBody::If(field_pipe(&["Values", "x"])))]).is_err());
    }
}
