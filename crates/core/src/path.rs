//! Compiled path expressions over [`Document`](crate::Document) trees.
//!
//! Accepts kubectl-flavoured paths: `{.status}`, `.spec.replicas`,
//! `spec.containers[0].image`, `spec.containers[*].image`, `metadata.labels.*`
//! quoted keys such as `metadata.annotations['example.com/owner']` and
//! equality filters over sequences such as `spec.containers[?(@.name=="app")]`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Field(String),
    Index(usize),
    AnyField,
    AnyIndex,
    /// Items of a sequence whose value at `field` (relative to the item) equals `equals`.
    Filter { field: Vec<String>, equals: Value },
}

impl Step {
    fn selects(&self, item: &Value) -> bool {
        let Step::Filter { field, equals } = self else {
            return false;
        };
        let mut node = item;
        for key in field {
            match node.get(key.as_str()) {
                Some(v) => node = v,
                None => return false,
            }
        }
        node == equals
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Field(k) if is_plain_key(k) => write!(f, ".{}", k),
            Step::Field(k) => write!(f, "['{}']", k),
            Step::Index(i) => write!(f, "[{}]", i),
            Step::AnyField => f.write_str(".*"),
            Step::AnyIndex => f.write_str("[*]"),
            Step::Filter { field, equals } => {
                f.write_str("[?(@")?;
                for key in field {
                    write!(f, ".{}", key)?;
                }
                write!(f, "=={})]", equals)
            }
        }
    }
}

fn is_plain_key(k: &str) -> bool {
    !k.is_empty() && k != "*" && k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path expression {expr:?} at offset {offset}: {reason}")]
    Syntax { expr: String, offset: usize, reason: &'static str },
    #[error("{expr}: {at} not found")]
    NotFound { expr: String, at: String },
    #[error("{expr}: cannot apply {step} to a {found} at {at}")]
    Shape { expr: String, at: String, step: String, found: &'static str },
}

/// A parsed path expression. Parse once at configuration time, evaluate per event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    steps: Vec<Step>,
}

impl PathExpr {
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        // offsets are reported relative to `expr`; `base` is where `body` starts in it
        let syntax = |offset: usize, reason: &'static str| PathError::Syntax { expr: expr.to_string(), offset, reason };
        let mut base = leading_ws(expr);
        let trimmed = expr.trim();
        let body = match trimmed.strip_prefix('{') {
            Some(inner) => {
                let inner = inner.strip_suffix('}').ok_or_else(|| syntax(base + trimmed.len(), "missing closing '}'"))?;
                base += 1 + leading_ws(inner);
                inner.trim()
            }
            None => trimmed,
        };
        let body = match body.strip_prefix('.') {
            Some(rest) => {
                base += 1;
                rest
            }
            None => body,
        };
        if body.is_empty() {
            return Err(syntax(base, "empty path"));
        }
        // `..x` is recursive descent in kubectl's JSONPath, which is not supported
        if body.starts_with('.') {
            return Err(syntax(base, "empty segment"));
        }

        let mut steps = Vec::new();
        let mut i = 0;
        while i < body.len() {
            let rest = &body[i..];
            if let Some(after) = rest.strip_prefix('[') {
                let (step, used) = parse_bracket(after).map_err(|(off, reason)| syntax(base + i + 1 + off, reason))?;
                steps.push(step);
                i += 1 + used;
                if !(body[i..].is_empty() || body[i..].starts_with('.') || body[i..].starts_with('[')) {
                    return Err(syntax(base + i, "expected '.' or '[' after ']'"));
                }
            } else if let Some(after) = rest.strip_prefix('.') {
                if after.is_empty() || after.starts_with('.') || after.starts_with('[') {
                    return Err(syntax(base + i, "empty segment"));
                }
                i += 1;
            } else {
                let end = rest.find(|c: char| c == '.' || c == '[').unwrap_or(rest.len());
                let name = &rest[..end];
                steps.push(if name == "*" { Step::AnyField } else { Step::Field(name.to_string()) });
                i += end;
            }
        }
        Ok(Self { source: expr.to_string(), steps })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Evaluate against `doc`. A named field or index that does not exist, or a
    /// step applied to the wrong shape, is an error; wildcards over empty
    /// collections simply match nothing.
    pub fn find<'a>(&self, doc: &'a Value) -> Result<Vec<&'a Value>, PathError> {
        let mut current = vec![doc];
        for (depth, step) in self.steps.iter().enumerate() {
            let mut next = Vec::with_capacity(current.len());
            for node in current {
                match (step, node) {
                    (Step::Field(k), Value::Object(map)) => next.push(map.get(k).ok_or_else(|| self.not_found(depth + 1))?),
                    (Step::AnyField, Value::Object(map)) => next.extend(map.values()),
                    (Step::Index(i), Value::Array(items)) => next.push(items.get(*i).ok_or_else(|| self.not_found(depth + 1))?),
                    (Step::AnyIndex, Value::Array(items)) => next.extend(items.iter()),
                    (filter @ Step::Filter { .. }, Value::Array(items)) => next.extend(items.iter().filter(|it| filter.selects(it))),
                    (_, Value::Null) => return Err(self.not_found(depth)),
                    (step, other) => return Err(self.shape(depth, step, other)),
                }
            }
            current = next;
        }
        Ok(current)
    }

    /// Remove every subtree addressed by this path and return how many were removed.
    /// Missing fields and out-of-range indices are skipped; traversing through a
    /// value of the wrong shape is an error.
    pub fn remove(&self, doc: &mut Value) -> Result<usize, PathError> {
        match self.steps.split_last() {
            Some((last, parents)) => self.remove_at(doc, parents, last, 0),
            None => Ok(0),
        }
    }

    fn remove_at(&self, node: &mut Value, parents: &[Step], last: &Step, depth: usize) -> Result<usize, PathError> {
        let Some((step, rest)) = parents.split_first() else {
            return self.remove_leaf(node, last, depth);
        };
        let children: Vec<&mut Value> = match (step, node) {
            (Step::Field(k), Value::Object(map)) => map.get_mut(k).into_iter().collect(),
            (Step::AnyField, Value::Object(map)) => map.values_mut().collect(),
            (Step::Index(i), Value::Array(items)) => items.get_mut(*i).into_iter().collect(),
            (Step::AnyIndex, Value::Array(items)) => items.iter_mut().collect(),
            (filter @ Step::Filter { .. }, Value::Array(items)) => items.iter_mut().filter(|it| filter.selects(it)).collect(),
            (_, Value::Null) => Vec::new(),
            (step, other) => return Err(self.shape(depth, step, other)),
        };
        let mut removed = 0;
        for child in children {
            removed += self.remove_at(child, rest, last, depth + 1)?;
        }
        Ok(removed)
    }

    fn remove_leaf(&self, node: &mut Value, last: &Step, depth: usize) -> Result<usize, PathError> {
        match (last, node) {
            (Step::Field(k), Value::Object(map)) => Ok(usize::from(map.remove(k).is_some())),
            (Step::AnyField, Value::Object(map)) => {
                let n = map.len();
                map.clear();
                Ok(n)
            }
            (Step::Index(i), Value::Array(items)) => {
                if *i < items.len() {
                    items.remove(*i);
                    Ok(1)
                } else {
                    Ok(0)
                }
            }
            (Step::AnyIndex, Value::Array(items)) => {
                let n = items.len();
                items.clear();
                Ok(n)
            }
            (filter @ Step::Filter { .. }, Value::Array(items)) => {
                let n = items.len();
                items.retain(|it| !filter.selects(it));
                Ok(n - items.len())
            }
            (_, Value::Null) => Ok(0),
            (step, other) => Err(self.shape(depth, step, other)),
        }
    }

    fn location(&self, depth: usize) -> String {
        if depth == 0 {
            return ".".to_string();
        }
        self.steps[..depth].iter().map(|s| s.to_string()).collect()
    }

    fn not_found(&self, depth: usize) -> PathError {
        PathError::NotFound { expr: self.source.clone(), at: self.location(depth) }
    }

    fn shape(&self, depth: usize, step: &Step, found: &Value) -> PathError {
        PathError::Shape {
            expr: self.source.clone(),
            at: self.location(depth),
            step: step.to_string(),
            found: shape_name(found),
        }
    }
}

impl FromStr for PathExpr {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse the inside of a `[...]` step. Returns the step and the bytes consumed
/// including the closing bracket, or an offset relative to `s` with a reason.
fn parse_bracket(s: &str) -> Result<(Step, usize), (usize, &'static str)> {
    if let Some(pred) = s.strip_prefix("?(") {
        let (step, used) = parse_filter(pred).map_err(|(off, reason)| (off + 2, reason))?;
        return Ok((step, used + 2));
    }
    if let Some(quote) = s.chars().next().filter(|c| *c == '\'' || *c == '"') {
        let body = &s[1..];
        let end = body.find(quote).ok_or((0, "unterminated quoted key"))?;
        if !body[end + 1..].starts_with(']') {
            return Err((end + 2, "expected ']' after quoted key"));
        }
        return Ok((Step::Field(body[..end].to_string()), end + 3));
    }
    let end = s.find(']').ok_or((0, "unterminated '['"))?;
    let step = match s[..end].trim() {
        "*" => Step::AnyIndex,
        inner => Step::Index(inner.parse().map_err(|_| (0, "expected an index, '*' or a quoted key"))?),
    };
    Ok((step, end + 1))
}

/// Parse `@.a.b == literal)]`, the part of a filter step after `[?(`.
fn parse_filter(s: &str) -> Result<(Step, usize), (usize, &'static str)> {
    let mut i = leading_ws(s);
    if !s[i..].starts_with('@') {
        return Err((i, "filter must start with '@'"));
    }
    i += 1;
    let mut field = Vec::new();
    while let Some(rest) = s[i..].strip_prefix('.') {
        let end = rest.find(|c: char| matches!(c, '.' | '=' | '!' | '<' | '>' | ')') || c.is_whitespace()).unwrap_or(rest.len());
        if end == 0 {
            return Err((i + 1, "empty segment"));
        }
        field.push(rest[..end].to_string());
        i += 1 + end;
    }
    i += leading_ws(&s[i..]);
    if !s[i..].starts_with("==") {
        return Err((i, "expected '==' in filter"));
    }
    i += 2;
    i += leading_ws(&s[i..]);

    let rest = &s[i..];
    let (equals, used) = match rest.chars().next() {
        Some(quote @ ('\'' | '"')) => {
            let end = rest[1..].find(quote).ok_or((i, "unterminated string literal"))?;
            (Value::String(rest[1..end + 1].to_string()), end + 2)
        }
        _ => {
            let end = rest.find(')').ok_or((i, "unterminated filter"))?;
            let literal = rest[..end].trim_end();
            match serde_json::from_str::<Value>(literal) {
                Ok(v) if !(v.is_array() || v.is_object()) => (v, literal.len()),
                _ => return Err((i, "expected a string, number, boolean or null literal")),
            }
        }
    };
    i += used;
    i += leading_ws(&s[i..]);
    if !s[i..].starts_with(")]") {
        return Err((i, "expected ')]' to close the filter"));
    }
    Ok((Step::Filter { field, equals }, i + 2))
}

fn leading_ws(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

fn shape_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn steps(expr: &str) -> Vec<Step> {
        PathExpr::parse(expr).unwrap().steps().to_vec()
    }

    #[test]
    fn parses_dotted_and_bracketed_forms() {
        let f = |s: &str| Step::Field(s.to_string());
        assert_eq!(steps("spec.replicas"), vec![f("spec"), f("replicas")]);
        assert_eq!(steps(".spec.replicas"), steps("spec.replicas"));
        assert_eq!(steps("{.status}"), vec![f("status")]);
        assert_eq!(steps("spec.containers[0].image"), vec![f("spec"), f("containers"), Step::Index(0), f("image")]);
        assert_eq!(steps("spec.containers[*].env"), vec![f("spec"), f("containers"), Step::AnyIndex, f("env")]);
        assert_eq!(steps("metadata.labels.*"), vec![f("metadata"), f("labels"), Step::AnyField]);
        assert_eq!(
            steps("metadata.annotations['example.com/owner']"),
            vec![f("metadata"), f("annotations"), f("example.com/owner")]
        );
        assert_eq!(steps(r#"data["a]b"]"#), vec![f("data"), f("a]b")]);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", ".", "{}", "spec..replicas", "spec.", "spec[0", "spec[x]", "spec['k'", "spec[0]x", "{.status", "spec.[0]", "..image", "{..image}", "{ ..image }"] {
            let err = PathExpr::parse(bad).unwrap_err();
            assert!(matches!(err, PathError::Syntax { .. }), "{bad:?} gave {err:?}");
        }
    }

    #[test]
    fn syntax_error_reports_offset() {
        match PathExpr::parse("spec[abc]").unwrap_err() {
            PathError::Syntax { offset, .. } => assert_eq!(offset, 5),
            other => panic!("unexpected {other:?}"),
        }
        for (expr, expected) in [("{.spec[abc]}", 7), (".spec[abc]", 6), ("  { .spec[abc]}", 10), ("{..image}", 2), ("spec..x", 4)] {
            match PathExpr::parse(expr).unwrap_err() {
                PathError::Syntax { offset, .. } => assert_eq!(offset, expected, "{expr}"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn parses_filter_steps() {
        let f = |s: &str| Step::Field(s.to_string());
        assert_eq!(
            steps(r#"{.spec.containers[?(@.name=="app")]}"#),
            vec![f("spec"), f("containers"), Step::Filter { field: vec!["name".into()], equals: json!("app") }]
        );
        assert_eq!(
            steps("spec.ports[?( @.port == 80 )].name"),
            vec![f("spec"), f("ports"), Step::Filter { field: vec!["port".into()], equals: json!(80) }, f("name")]
        );
        assert_eq!(
            steps("items[?(@.status.ready==true)]")[1],
            Step::Filter { field: vec!["status".into(), "ready".into()], equals: json!(true) }
        );
        assert_eq!(steps("tags[?(@=='x')]")[1], Step::Filter { field: vec![], equals: json!("x") });
        assert_eq!(steps(r#"a[?(@.name=="app")]"#)[1].to_string(), r#"[?(@.name=="app")]"#);
        for bad in ["a[?(@.name=\"x\")]", "a[?(name==\"x\")]", "a[?(@.name==\"x\"]", "a[?(@.name==x)]", "a[?(@.name==\"x)]", "a[?(@..name==1)]"] {
            let err = PathExpr::parse(bad).unwrap_err();
            assert!(matches!(err, PathError::Syntax { .. }), "{bad:?} gave {err:?}");
        }
    }

    #[test]
    fn filter_selects_matching_items() {
        let doc = json!({"spec": {"containers": [
            {"name": "app", "image": "app:1"},
            {"name": "sidecar", "image": "envoy:1"}
        ]}});
        let p = PathExpr::parse(r#"{.spec.containers[?(@.name=="app")]}"#).unwrap();
        assert_eq!(p.find(&doc).unwrap(), vec![&json!({"name": "app", "image": "app:1"})]);
        let p = PathExpr::parse("spec.containers[?(@.name=='sidecar')].image").unwrap();
        assert_eq!(p.find(&doc).unwrap(), vec![&json!("envoy:1")]);
        let p = PathExpr::parse("spec.containers[?(@.name=='none')]").unwrap();
        assert!(p.find(&doc).unwrap().is_empty());
        let err = PathExpr::parse("spec[?(@.name=='app')]").unwrap().find(&doc).unwrap_err();
        assert!(matches!(err, PathError::Shape { found: "map", .. }), "{err:?}");
    }

    #[test]
    fn filter_removes_matching_items_or_their_fields() {
        let mut doc = json!({"spec": {"containers": [
            {"name": "app", "image": "app:1"},
            {"name": "sidecar", "image": "envoy:1"},
            {"name": "sidecar", "image": "envoy:2"}
        ]}});
        let p = PathExpr::parse(r#"spec.containers[?(@.name=="app")].image"#).unwrap();
        assert_eq!(p.remove(&mut doc).unwrap(), 1);
        let p = PathExpr::parse("spec.containers[?(@.name=='sidecar')]").unwrap();
        assert_eq!(p.remove(&mut doc).unwrap(), 2);
        assert_eq!(doc, json!({"spec": {"containers": [{"name": "app"}]}}));
    }

    #[test]
    fn find_walks_fields_indices_and_wildcards() {
        let doc = json!({"spec": {"containers": [{"image": "a"}, {"image": "b"}]}});
        let p = PathExpr::parse("spec.containers[*].image").unwrap();
        assert_eq!(p.find(&doc).unwrap(), vec![&json!("a"), &json!("b")]);
        let p = PathExpr::parse("spec.containers[1]").unwrap();
        assert_eq!(p.find(&doc).unwrap(), vec![&json!({"image": "b"})]);
        let empty = json!({"items": []});
        assert!(PathExpr::parse("items[*]").unwrap().find(&empty).unwrap().is_empty());
    }

    #[test]
    fn find_reports_missing_and_mismatched() {
        let doc = json!({"spec": {"replicas": 3}});
        let err = PathExpr::parse("status").unwrap().find(&doc).unwrap_err();
        assert_eq!(err, PathError::NotFound { expr: "status".into(), at: ".status".into() });
        let err = PathExpr::parse("spec.replicas.value").unwrap().find(&doc).unwrap_err();
        assert!(matches!(err, PathError::Shape { found: "number", .. }), "{err:?}");
    }

    #[test]
    fn remove_is_noop_for_missing_locations() {
        let mut doc = json!({"spec": {"replicas": 3}});
        let before = doc.clone();
        assert_eq!(PathExpr::parse("status.phase").unwrap().remove(&mut doc).unwrap(), 0);
        assert_eq!(PathExpr::parse("spec.template").unwrap().remove(&mut doc).unwrap(), 0);
        assert_eq!(PathExpr::parse("spec.list[4]").unwrap().remove(&mut doc).unwrap(), 0);
        assert_eq!(doc, before);
    }

    #[test]
    fn remove_drops_addressed_subtrees() {
        let mut doc = json!({
            "spec": {"replicas": 3, "paused": false},
            "items": [{"a": 1, "b": 2}, {"a": 3}]
        });
        assert_eq!(PathExpr::parse("spec.replicas").unwrap().remove(&mut doc).unwrap(), 1);
        assert_eq!(PathExpr::parse("items[*].a").unwrap().remove(&mut doc).unwrap(), 2);
        assert_eq!(doc, json!({"spec": {"paused": false}, "items": [{"b": 2}, {}]}));
        assert_eq!(PathExpr::parse("items[0]").unwrap().remove(&mut doc).unwrap(), 1);
        assert_eq!(doc["items"], json!([{}]));
    }

    #[test]
    fn remove_fails_through_scalars() {
        let mut doc = json!({"spec": {"replicas": 3}});
        let err = PathExpr::parse("spec.replicas.value").unwrap().remove(&mut doc).unwrap_err();
        assert_eq!(
            err,
            PathError::Shape { expr: "spec.replicas.value".into(), at: ".spec.replicas".into(), step: ".value".into(), found: "number" }
        );
        let err = PathExpr::parse("spec[0]").unwrap().remove(&mut doc).unwrap_err();
        assert!(matches!(err, PathError::Shape { found: "map", .. }));
    }
}
