//! Dot/bracket path access over [`FormValue`] trees.
//!
//! `set_by_path` never mutates its input: it rebuilds the ancestor chain of the
//! addressed node and shares every other subtree with the original tree.

use std::sync::Arc;

use crate::value::{FormMap, FormValue};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Largest bracket number read as a list position. Longer lists are only
/// grown by appending, so anything above this is treated as a key.
pub const MAX_INDEX: usize = 1 << 16;

/// Splits `a.b[0].c` into segments. Bracketed text that is not a number, or
/// a number above [`MAX_INDEX`], is treated as a key, with optional
/// surrounding quotes removed.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => push_key(&mut segments, &mut current),
            '[' => {
                push_key(&mut segments, &mut current);
                let mut inner = String::new();
                for next in chars.by_ref() {
                    if next == ']' {
                        break;
                    }
                    inner.push(next);
                }
                let inner = inner.trim();
                match inner.parse::<usize>() {
                    Ok(index) if index <= MAX_INDEX => segments.push(PathSegment::Index(index)),
                    _ => {
                        let key = inner.trim_matches(|c| c == '"' || c == '\'');
                        if !key.is_empty() {
                            segments.push(PathSegment::Key(key.to_string()));
                        }
                    }
                }
            }
            _ => current.push(ch),
        }
    }
    push_key(&mut segments, &mut current);
    segments
}

fn push_key(segments: &mut Vec<PathSegment>, current: &mut String) {
    if !current.is_empty() {
        segments.push(PathSegment::Key(std::mem::take(current)));
    }
}

pub fn get_by_path<'a>(root: &'a FormValue, path: &str) -> Option<&'a FormValue> {
    parse_path(path)
        .iter()
        .try_fold(root, |node, segment| child(node, segment))
}

fn child<'a>(node: &'a FormValue, segment: &PathSegment) -> Option<&'a FormValue> {
    match (node, segment) {
        (FormValue::Map(entries), PathSegment::Key(key)) => entries.get(key),
        (FormValue::Map(entries), PathSegment::Index(index)) => entries.get(&index.to_string()),
        (FormValue::List(items), PathSegment::Index(index)) => items.get(*index),
        (FormValue::List(items), PathSegment::Key(key)) => {
            key.parse::<usize>().ok().and_then(|index| items.get(index))
        }
        _ => None,
    }
}

/// Returns a new tree with `value` stored at `path`. Missing intermediate
/// containers are created: a list when the next segment is an index, a map
/// otherwise. An empty path replaces the root.
pub fn set_by_path(root: &FormValue, path: &str, value: FormValue) -> FormValue {
    set_in(root, &parse_path(path), value)
}

fn set_in(node: &FormValue, segments: &[PathSegment], value: FormValue) -> FormValue {
    let Some((head, rest)) = segments.split_first() else {
        return value;
    };

    match (node, head) {
        (FormValue::List(items), PathSegment::Index(index)) => {
            let mut items = Vec::clone(items);
            if items.len() <= *index {
                items.resize(*index + 1, FormValue::Null);
            }
            items[*index] = set_in(&items[*index], rest, value);
            FormValue::List(Arc::new(items))
        }
        (FormValue::Map(entries), segment) => {
            let key = segment_key(segment);
            let mut entries = FormMap::clone(entries);
            let current = entries.get(&key).cloned().unwrap_or_default();
            let next = set_in(&current, rest, value);
            entries.insert(key, next);
            FormValue::Map(Arc::new(entries))
        }
        (_, PathSegment::Index(index)) => {
            let mut items = vec![FormValue::Null; *index + 1];
            items[*index] = set_in(&FormValue::Null, rest, value);
            FormValue::List(Arc::new(items))
        }
        (_, PathSegment::Key(key)) => {
            let mut entries = FormMap::new();
            entries.insert(key.clone(), set_in(&FormValue::Null, rest, value));
            FormValue::Map(Arc::new(entries))
        }
    }
}

fn segment_key(segment: &PathSegment) -> String {
    match segment {
        PathSegment::Key(key) => key.clone(),
        PathSegment::Index(index) => index.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dot_and_bracket_segments() {
        assert_eq!(
            parse_path("a.b[0].c['d']"),
            vec![
                PathSegment::Key("a".into()),
                PathSegment::Key("b".into()),
                PathSegment::Index(0),
                PathSegment::Key("c".into()),
                PathSegment::Key("d".into()),
            ]
        );
        assert!(parse_path("").is_empty());
    }

    #[test]
    fn oversized_indices_become_keys() {
        assert_eq!(
            parse_path("a[18446744073709551615]"),
            vec![
                PathSegment::Key("a".into()),
                PathSegment::Key("18446744073709551615".into()),
            ]
        );
        assert_eq!(
            parse_path("a[99999999999999999999999]")[1],
            PathSegment::Key("99999999999999999999999".into())
        );

        let updated = set_by_path(&FormValue::Null, "a[4294967296]", FormValue::from(1));
        assert_eq!(updated, FormValue::from(json!({ "a": { "4294967296": 1 } })));
    }

    #[test]
    fn reads_nested_values() {
        let tree = FormValue::from(json!({ "a": { "b": [ { "c": 3 } ] } }));
        assert_eq!(get_by_path(&tree, "a.b[0].c"), Some(&FormValue::from(3)));
        assert_eq!(get_by_path(&tree, "a.missing"), None);
        assert_eq!(get_by_path(&tree, ""), Some(&tree));
    }

    #[test]
    fn set_shares_untouched_subtrees() {
        let tree = FormValue::from(json!({
            "profile": { "name": "Ada" },
            "tags": ["x", "y"],
        }));
        let updated = set_by_path(&tree, "profile.name", "Grace".into());

        assert_eq!(
            get_by_path(&tree, "profile.name"),
            Some(&FormValue::from("Ada"))
        );
        assert_eq!(
            get_by_path(&updated, "profile.name"),
            Some(&FormValue::from("Grace"))
        );

        let before_tags = get_by_path(&tree, "tags").expect("tags exist");
        let after_tags = get_by_path(&updated, "tags").expect("tags exist");
        assert!(before_tags.same(after_tags));
        assert!(!tree.same(&updated));
    }

    #[test]
    fn set_creates_missing_containers() {
        let updated = set_by_path(&FormValue::Null, "items[2].label", "third".into());
        assert_eq!(
            updated,
            FormValue::from(json!({ "items": [null, null, { "label": "third" }] }))
        );
    }
}
