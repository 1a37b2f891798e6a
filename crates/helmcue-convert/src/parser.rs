//! Go template parser.
//!
//! Parses Go/Helm template syntax into the flat element stream using
//! pest; see [`crate::ast::assemble`] for tree construction.

use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::ast::{Action, ActionBody, Arg, Command, Element, Pipe, Template};

#[derive(Parser)]
#[grammar = "go_template.pest"]
struct GoTemplateParser;

/// Parser error.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0}")]
    Pest(Box<pest::error::Error<Rule>>),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("invalid string: {0}")]
    InvalidString(String),

    #[error("unexpected rule: {0:?}")]
    UnexpectedRule(Rule),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        ParseError::Pest(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

/// Parses a template string into the flat element stream.
pub fn parse(input: &str) -> Result<Vec<Element>> {
    let pairs = GoTemplateParser::parse(Rule::template, input)?;

    let mut elements = Vec::new();
    for pair in pairs {
        if pair.as_rule() == Rule::template {
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::raw_text => {
                        elements.push(Element::RawText(inner.as_str().to_string()));
                    }
                    Rule::action => {
                        elements.push(Element::Action(parse_action(inner)?));
                    }
                    Rule::EOI => {}
                    _ => {}
                }
            }
        }
    }
    Ok(elements)
}

/// Parses a template string and assembles it into the nested tree.
pub fn parse_template(input: &str) -> crate::error::Result<Template> {
    let elements = parse(input).map_err(crate::error::ConvertError::Parse)?;
    crate::ast::assemble(elements)
}

fn parse_action(pair: Pair) -> Result<Action> {
    let mut trim_left = false;
    let mut trim_right = false;
    let mut body = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::action_start => {
                trim_left = inner.as_str().ends_with('-');
            }
            Rule::action_end => {
                trim_right = inner.as_str().starts_with('-');
            }
            _ => {
                body = Some(parse_action_body(inner)?);
            }
        }
    }

    Ok(Action {
        trim_left,
        trim_right,
        body: body.unwrap_or(ActionBody::Pipe(Pipe::default())),
    })
}

fn parse_action_body(pair: Pair) -> Result<ActionBody> {
    match pair.as_rule() {
        Rule::comment => {
            let text = pair.as_str();
            let content = text
                .strip_prefix("/*")
                .and_then(|s| s.strip_suffix("*/"))
                .unwrap_or(text)
                .to_string();
            Ok(ActionBody::Comment(content))
        }
        Rule::if_action => Ok(ActionBody::If(pipeline_from_inner(pair)?)),
        Rule::else_if_action => Ok(ActionBody::ElseIf(pipeline_from_inner(pair)?)),
        Rule::else_action => Ok(ActionBody::Else),
        Rule::end_action => Ok(ActionBody::End),
        Rule::range_action => {
            let mut decl = Vec::new();
            let mut pipe = Pipe::default();
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::range_clause => {
                        decl = parse_range_clause(inner);
                    }
                    Rule::pipeline => {
                        pipe = parse_pipeline(inner)?;
                    }
                    _ => {}
                }
            }
            pipe.decl = decl;
            Ok(ActionBody::Range(pipe))
        }
        Rule::with_action => Ok(ActionBody::With(pipeline_from_inner(pair)?)),
        Rule::define_action => {
            let name = extract_string_literal(pair)?;
            Ok(ActionBody::Define(name))
        }
        Rule::template_action => {
            let mut name = String::new();
            let mut pipe = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::string_literal => name = parse_string_literal(inner)?,
                    Rule::pipeline => pipe = Some(parse_pipeline(inner)?),
                    _ => {}
                }
            }
            Ok(ActionBody::Template { name, pipe })
        }
        Rule::block_action => {
            let mut name = String::new();
            let mut pipe = Pipe::default();
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::string_literal => name = parse_string_literal(inner)?,
                    Rule::pipeline => pipe = parse_pipeline(inner)?,
                    _ => {}
                }
            }
            Ok(ActionBody::Block { name, pipe })
        }
        Rule::pipeline => Ok(ActionBody::Pipe(parse_pipeline(pair)?)),
        r => Err(ParseError::UnexpectedRule(r)),
    }
}

fn pipeline_from_inner(pair: Pair) -> Result<Pipe> {
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::pipeline {
            return parse_pipeline(inner);
        }
    }
    Ok(Pipe::default())
}

fn parse_pipeline(pair: Pair) -> Result<Pipe> {
    let mut decl = Vec::new();
    let mut cmds = Vec::new();

    match pair.as_rule() {
        Rule::pipeline => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or(ParseError::UnexpectedRule(Rule::pipeline))?;
            return parse_pipeline(inner);
        }
        Rule::pipeline_decl => {
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::variable => {
                        decl.push(variable_name(inner.as_str()));
                    }
                    Rule::pipeline_expr => {
                        let sub = parse_pipeline(inner)?;
                        cmds = sub.cmds;
                    }
                    _ => {}
                }
            }
        }
        Rule::pipeline_expr => {
            for inner in pair.into_inner() {
                if inner.as_rule() == Rule::command {
                    cmds.push(parse_command(inner)?);
                }
            }
        }
        r => return Err(ParseError::UnexpectedRule(r)),
    }

    Ok(Pipe { decl, cmds })
}

fn parse_command(pair: Pair) -> Result<Command> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or(ParseError::UnexpectedRule(Rule::command))?;
    match inner.as_rule() {
        Rule::parenthesized => {
            let pipe = pipeline_from_inner(inner)?;
            Ok(Command {
                args: vec![Arg::Pipe(pipe)],
            })
        }
        Rule::function_call => {
            let mut args = Vec::new();
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::identifier => args.push(Arg::Ident(part.as_str().to_string())),
                    Rule::argument => args.push(parse_argument(part)?),
                    _ => {}
                }
            }
            Ok(Command { args })
        }
        Rule::method_call => {
            // A field access followed by arguments (e.g. .Files.Get "x")
            // is treated as a call to the final path segment so the
            // dispatcher can reject it by name.
            let mut field = None;
            let mut rest = Vec::new();
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::field_chain => field = Some(parse_field_chain(part.as_str())),
                    Rule::argument => rest.push(parse_argument(part)?),
                    _ => {}
                }
            }
            let mut path = field.ok_or(ParseError::UnexpectedRule(Rule::method_call))?;
            let method = path.pop().unwrap_or_default();
            let mut args = vec![Arg::Ident(method)];
            args.extend(rest);
            Ok(Command { args })
        }
        Rule::field_chain => Ok(Command {
            args: vec![Arg::Field(parse_field_chain(inner.as_str()))],
        }),
        Rule::dot => Ok(Command {
            args: vec![Arg::Dot],
        }),
        Rule::variable => Ok(Command {
            args: vec![parse_variable(inner.as_str())],
        }),
        Rule::literal => Ok(Command {
            args: vec![parse_literal(inner)?],
        }),
        Rule::bare_identifier => {
            let name = inner
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            Ok(Command {
                args: vec![Arg::Ident(name)],
            })
        }
        r => Err(ParseError::UnexpectedRule(r)),
    }
}

fn parse_argument(pair: Pair) -> Result<Arg> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or(ParseError::UnexpectedRule(Rule::argument))?;
    match inner.as_rule() {
        Rule::parenthesized => Ok(Arg::Pipe(pipeline_from_inner(inner)?)),
        Rule::field_chain => Ok(Arg::Field(parse_field_chain(inner.as_str()))),
        Rule::dot => Ok(Arg::Dot),
        Rule::variable => Ok(parse_variable(inner.as_str())),
        Rule::literal => parse_literal(inner),
        r => Err(ParseError::UnexpectedRule(r)),
    }
}

/// Splits `.a.b.c` into ["a", "b", "c"].
fn parse_field_chain(text: &str) -> Vec<String> {
    text.split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Parses a `$`-variable. `$.Values.x` → ["$", "Values", "x"],
/// `$v.port` → ["v", "port"], bare `$` → ["$"].
fn parse_variable(text: &str) -> Arg {
    let rest = text.trim_start_matches('$');
    let mut segments: Vec<String> = rest
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    if rest.starts_with('.') || segments.is_empty() {
        let mut root = vec!["$".to_string()];
        root.append(&mut segments);
        return Arg::Variable(root);
    }
    Arg::Variable(segments)
}

fn variable_name(text: &str) -> String {
    text.trim_start_matches('$').to_string()
}

fn parse_literal(pair: Pair) -> Result<Arg> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or(ParseError::UnexpectedRule(Rule::literal))?;
    match inner.as_rule() {
        Rule::string_literal => Ok(Arg::Str(parse_string_literal(inner)?)),
        Rule::char_literal => {
            let text = inner.as_str();
            let c = text
                .trim_start_matches('\'')
                .trim_end_matches('\'')
                .to_string();
            Ok(Arg::Str(c))
        }
        Rule::number => {
            let text = inner.as_str();
            // Validate now so conversion can use the text verbatim.
            if text.starts_with("0x") || text.starts_with("0X") {
                i64::from_str_radix(&text[2..], 16)
                    .map_err(|_| ParseError::InvalidNumber(text.to_string()))?;
            } else if text.contains('.') || text.contains('e') || text.contains('E') {
                text.parse::<f64>()
                    .map_err(|_| ParseError::InvalidNumber(text.to_string()))?;
            } else {
                text.parse::<i64>()
                    .map_err(|_| ParseError::InvalidNumber(text.to_string()))?;
            }
            Ok(Arg::Number(text.to_string()))
        }
        Rule::boolean => Ok(Arg::Bool(inner.as_str() == "true")),
        Rule::nil => Ok(Arg::Nil),
        r => Err(ParseError::UnexpectedRule(r)),
    }
}

fn parse_string_literal(pair: Pair) -> Result<String> {
    let text = pair.as_str();

    if text.starts_with('`') {
        return Ok(text.trim_matches('`').to_string());
    }

    let inner = text
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| ParseError::InvalidString(text.to_string()))?;

    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }
    Ok(result)
}

fn extract_string_literal(pair: Pair) -> Result<String> {
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::string_literal {
            return parse_string_literal(inner);
        }
    }
    Err(ParseError::InvalidString("no string literal found".into()))
}

fn parse_range_clause(pair: Pair) -> Vec<String> {
    let mut vars = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::range_vars {
            for var in inner.into_inner() {
                if var.as_rule() == Rule::variable {
                    vars.push(variable_name(var.as_str()));
                }
            }
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;

    #[test]
    fn parse_simple_field() {
        let elements = parse("{{ .Values.name }}").unwrap();
        assert_eq!(elements.len(), 1);
        match &elements[0] {
            Element::Action(a) => match &a.body {
                ActionBody::Pipe(pipe) => {
                    assert_eq!(pipe.cmds.len(), 1);
                    assert_eq!(
                        pipe.cmds[0].args[0],
                        Arg::Field(vec!["Values".into(), "name".into()])
                    );
                }
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected element {other:?}"),
        }
    }

    #[test]
    fn parse_trim_markers() {
        let elements = parse("{{- .Values.name -}}").unwrap();
        match &elements[0] {
            Element::Action(a) => {
                assert!(a.trim_left);
                assert!(a.trim_right);
            }
            other => panic!("unexpected element {other:?}"),
        }
    }

    #[test]
    fn parse_if_end() {
        let elements = parse("{{- if .Values.enabled }}yes{{- end }}").unwrap();
        assert_eq!(elements.len(), 3);
        assert!(matches!(
            &elements[0],
            Element::Action(Action {
                body: ActionBody::If(_),
                ..
            })
        ));
        assert!(matches!(
            &elements[2],
            Element::Action(Action {
                body: ActionBody::End,
                ..
            })
        ));
    }

    #[test]
    fn parse_range_with_vars() {
        let elements = parse("{{- range $i, $v := .Values.items }}{{ $v }}{{- end }}").unwrap();
        match &elements[0] {
            Element::Action(a) => match &a.body {
                ActionBody::Range(pipe) => {
                    assert_eq!(pipe.decl, vec!["i".to_string(), "v".to_string()]);
                    assert_eq!(
                        pipe.cmds[0].args[0],
                        Arg::Field(vec!["Values".into(), "items".into()])
                    );
                }
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected element {other:?}"),
        }
    }

    #[test]
    fn parse_range_without_vars() {
        let elements = parse("{{ range .Values.items }}{{ . }}{{ end }}").unwrap();
        match &elements[0] {
            Element::Action(a) => match &a.body {
                ActionBody::Range(pipe) => assert!(pipe.decl.is_empty()),
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected element {other:?}"),
        }
    }

    #[test]
    fn parse_pipeline_stages() {
        let elements = parse("{{ .Values.name | quote }}").unwrap();
        match &elements[0] {
            Element::Action(a) => match &a.body {
                ActionBody::Pipe(pipe) => {
                    assert_eq!(pipe.cmds.len(), 2);
                    assert_eq!(pipe.cmds[1].args[0], Arg::Ident("quote".into()));
                }
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected element {other:?}"),
        }
    }

    #[test]
    fn parse_function_call_args() {
        let elements = parse("{{ printf \"%s-%s\" .Release.Name .Chart.Name }}").unwrap();
        match &elements[0] {
            Element::Action(a) => match &a.body {
                ActionBody::Pipe(pipe) => {
                    let args = &pipe.cmds[0].args;
                    assert_eq!(args.len(), 3);
                    assert_eq!(args[0], Arg::Ident("printf".into()));
                    assert_eq!(args[1], Arg::Str("%s-%s".into()));
                }
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected element {other:?}"),
        }
    }

    #[test]
    fn parse_define() {
        let elements = parse("{{- define \"myapp.name\" -}}test{{- end }}").unwrap();
        assert!(matches!(
            &elements[0],
            Element::Action(Action {
                body: ActionBody::Define(name),
                ..
            }) if name == "myapp.name"
        ));
    }

    #[test]
    fn parse_include_with_dot() {
        let elements = parse("{{ include \"myapp.name\" . }}").unwrap();
        match &elements[0] {
            Element::Action(a) => match &a.body {
                ActionBody::Pipe(pipe) => {
                    let args = &pipe.cmds[0].args;
                    assert_eq!(args[0], Arg::Ident("include".into()));
                    assert_eq!(args[2], Arg::Dot);
                }
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected element {other:?}"),
        }
    }

    #[test]
    fn parse_comment() {
        let elements = parse("{{/* This is a comment */}}").unwrap();
        match &elements[0] {
            Element::Action(a) => match &a.body {
                ActionBody::Comment(text) => assert_eq!(text.trim(), "This is a comment"),
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected element {other:?}"),
        }
    }

    #[test]
    fn parse_nested_boolean_conditions() {
        assert!(parse("{{ and .Values.a .Values.b }}").is_ok());
        assert!(parse("{{ and (eq .Values.a \"x\") .Values.b }}").is_ok());
        assert!(
            parse("{{- if and (eq .Values.a \"x\") (or .Values.b .Values.c) }}ok{{- end }}")
                .is_ok()
        );
    }

    #[test]
    fn parse_variable_forms() {
        let elements = parse("{{ $.Values.x }}{{ $v.port }}{{ $ }}").unwrap();
        let pipes: Vec<_> = elements
            .iter()
            .map(|e| match e {
                Element::Action(Action {
                    body: ActionBody::Pipe(p),
                    ..
                }) => p,
                other => panic!("unexpected element {other:?}"),
            })
            .collect();
        assert_eq!(
            pipes[0].cmds[0].args[0],
            Arg::Variable(vec!["$".into(), "Values".into(), "x".into()])
        );
        assert_eq!(
            pipes[1].cmds[0].args[0],
            Arg::Variable(vec!["v".into(), "port".into()])
        );
        assert_eq!(pipes[2].cmds[0].args[0], Arg::Variable(vec!["$".into()]));
    }

    #[test]
    fn parse_declaration() {
        let elements = parse("{{- $name := .Values.name }}").unwrap();
        match &elements[0] {
            Element::Action(a) => match &a.body {
                ActionBody::Pipe(pipe) => assert_eq!(pipe.decl, vec!["name".to_string()]),
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected element {other:?}"),
        }
    }

    #[test]
    fn parse_raw_text_only() {
        let elements = parse("apiVersion: v1\nkind: ConfigMap").unwrap();
        assert_eq!(elements.len(), 1);
        assert!(matches!(&elements[0], Element::RawText(t) if t.contains("apiVersion: v1")));
    }

    #[test]
    fn parse_template_roundtrip_through_assemble() {
        let tmpl =
            parse_template("{{- define \"x\" }}a: 1{{ end }}b: {{ .Values.b }}\n").unwrap();
        assert_eq!(tmpl.defines.len(), 1);
        assert!(matches!(&tmpl.nodes[0], Node::Text(t) if t == "b: "));
    }

    #[test]
    fn parse_method_call_becomes_function() {
        let elements = parse("{{ .Files.Get \"config.ini\" }}").unwrap();
        match &elements[0] {
            Element::Action(a) => match &a.body {
                ActionBody::Pipe(pipe) => {
                    assert_eq!(pipe.cmds[0].args[0], Arg::Ident("Get".into()));
                }
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected element {other:?}"),
        }
    }
}
