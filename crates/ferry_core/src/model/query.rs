//! Path-pattern queries over a content tree.
//!
//! Patterns are `/`-separated segments evaluated relative to a context node:
//!
//! - `name`, `site:*`, `block?` match children by name (glob wildcards)
//! - `**` matches the context node and every descendant
//! - `.` matches the context node itself
//! - `[@prop]` / `[@prop='value']` predicates restrict a segment's matches
//!
//! For example `**[@ferry:docbase]` selects every node (root included) that
//! carries a `ferry:docbase` property.

use std::collections::BTreeSet;

use globset::{Glob, GlobMatcher};

use super::{ContentNode, NodeLocation};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone)]
enum Step {
    SelfNode,
    Descendants,
    Child(GlobMatcher),
}

#[derive(Debug, Clone)]
struct Predicate {
    property: String,
    value: Option<String>,
}

impl Predicate {
    fn matches(&self, node: &ContentNode) -> bool {
        match node.property(&self.property) {
            None => false,
            Some(property) => match &self.value {
                None => true,
                Some(expected) => property
                    .values()
                    .iter()
                    .any(|v| v.to_lexical() == *expected),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Segment {
    step: Step,
    predicates: Vec<Predicate>,
}

impl Segment {
    fn accepts(&self, node: &ContentNode) -> bool {
        self.predicates.iter().all(|p| p.matches(node))
    }
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct NodePattern {
    source: String,
    segments: Vec<Segment>,
}

impl NodePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid_pattern(pattern, "empty pattern"));
        }
        if trimmed.starts_with('/') {
            return Err(CoreError::invalid_pattern(
                pattern,
                "patterns are relative to the context node",
            ));
        }
        let segments = split_segments(trimmed)
            .into_iter()
            .map(|raw| parse_segment(pattern, raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// Pattern matching every node that carries `property`.
    pub fn with_property(property: &str) -> Self {
        Self {
            source: format!("**[@{}]", property),
            segments: vec![Segment {
                step: Step::Descendants,
                predicates: vec![Predicate {
                    property: property.to_string(),
                    value: None,
                }],
            }],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Locations of all matching nodes in document order, without duplicates.
    pub fn select(&self, root: &ContentNode) -> Vec<NodeLocation> {
        let mut found = BTreeSet::new();
        self.match_from(root, NodeLocation::root(), 0, &mut found);
        found.into_iter().collect()
    }

    fn match_from(
        &self,
        node: &ContentNode,
        location: NodeLocation,
        index: usize,
        found: &mut BTreeSet<NodeLocation>,
    ) {
        let Some(segment) = self.segments.get(index) else {
            found.insert(location);
            return;
        };
        match &segment.step {
            Step::SelfNode => {
                if segment.accepts(node) {
                    self.match_from(node, location, index + 1, found);
                }
            }
            Step::Descendants => {
                let mut stack = vec![(node, location)];
                while let Some((current, current_location)) = stack.pop() {
                    if segment.accepts(current) {
                        self.match_from(current, current_location.clone(), index + 1, found);
                    }
                    for (i, child) in current.children().iter().enumerate().rev() {
                        stack.push((child, current_location.child(i)));
                    }
                }
            }
            Step::Child(matcher) => {
                for (i, child) in node.children().iter().enumerate() {
                    if matcher.is_match(child.name()) && segment.accepts(child) {
                        self.match_from(child, location.child(i), index + 1, found);
                    }
                }
            }
        }
    }
}

/// Split on `/` outside of predicate brackets and quotes.
fn split_segments(pattern: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in pattern.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '[' if !quoted => depth += 1,
            ']' if !quoted => depth = depth.saturating_sub(1),
            '/' if !quoted && depth == 0 => {
                segments.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&pattern[start..]);
    segments
}

fn parse_segment(pattern: &str, raw: &str) -> Result<Segment> {
    let (head, mut rest) = match raw.find('[') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    if head.is_empty() {
        return Err(CoreError::invalid_pattern(pattern, "empty path segment"));
    }

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix("[@") else {
            return Err(CoreError::invalid_pattern(
                pattern,
                format!("expected predicate '[@...]' in segment '{}'", raw),
            ));
        };
        let Some(end) = find_predicate_end(inner) else {
            return Err(CoreError::invalid_pattern(pattern, "unterminated predicate"));
        };
        predicates.push(parse_predicate(pattern, &inner[..end])?);
        rest = &inner[end + 1..];
    }

    let step = match head {
        "." => Step::SelfNode,
        "**" => Step::Descendants,
        name => {
            let glob = Glob::new(name)
                .map_err(|e| CoreError::invalid_pattern(pattern, e.to_string()))?;
            Step::Child(glob.compile_matcher())
        }
    };
    Ok(Segment { step, predicates })
}

fn find_predicate_end(inner: &str) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in inner.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            ']' if !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_predicate(pattern: &str, body: &str) -> Result<Predicate> {
    match body.split_once('=') {
        None if !body.is_empty() => Ok(Predicate {
            property: body.to_string(),
            value: None,
        }),
        Some((name, value)) if !name.is_empty() => {
            let value = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .ok_or_else(|| {
                    CoreError::invalid_pattern(pattern, "predicate values must be single-quoted")
                })?;
            Ok(Predicate {
                property: name.to_string(),
                value: Some(value.to_string()),
            })
        }
        _ => Err(CoreError::invalid_pattern(pattern, "empty predicate")),
    }
}
