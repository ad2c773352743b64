use crate::lens::errors::LensError;
use crate::lens::skeleton::{Skel, Skeleton};
use crate::lens::Lens;
use crate::tree::{Node, NodeId};
use std::collections::HashMap;

/// Position in the children of the node being printed.
#[derive(Clone, Copy)]
struct Cursor<'t> {
    node: &'t Node,
    next: usize,
}

impl<'t> Cursor<'t> {
    fn new(node: &'t Node) -> Self {
        Self { node, next: 0 }
    }

    fn done(&self) -> bool {
        self.next >= self.node.children.len()
    }

    fn describe(&self) -> String {
        self.node.label().unwrap_or("(none)").to_string()
    }
}

struct Putter<'s> {
    node_skels: &'s HashMap<NodeId, Skel>,
    out: String,
    /// Defaults of `del`s that ended the original text, written out as
    /// soon as anything follows them.
    trailing: String,
    /// Values and labels printed so far.
    tokens: usize,
}

/// Output state to roll back to when an attempt fails.
#[derive(Clone)]
struct Mark {
    len: usize,
    trailing: String,
}

type Step = Result<(), String>;

/// Print the children of `file` with `lens`.
///
/// Unchanged parts of the tree come out exactly as they were read; nodes
/// without a skeleton are printed from the lens defaults. When the
/// skeleton no longer fits the tree at all, the file is printed again
/// without the top-level skeleton before giving up.
pub fn put(lens: &Lens, skeleton: &Skeleton, file: &Node, path: &str) -> Result<String, LensError> {
    let mut putter = Putter {
        node_skels: &skeleton.nodes,
        out: String::new(),
        trailing: String::new(),
        tokens: 0,
    };
    let first = putter.run(lens, skeleton.top.as_ref(), file);
    if first.is_ok() {
        return Ok(putter.out);
    }
    if skeleton.top.is_some() {
        putter.out.clear();
        putter.trailing.clear();
        if putter.run(lens, None, file).is_ok() {
            return Ok(putter.out);
        }
    }
    Err(LensError::Put {
        path: path.to_string(),
        message: first.err().unwrap_or_default(),
    })
}

/// Print a tree that was never read from text.
pub fn create(lens: &Lens, file: &Node, path: &str) -> Result<String, LensError> {
    put(lens, &Skeleton::default(), file, path)
}

impl<'s> Putter<'s> {
    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.trailing.is_empty() {
            self.out.push_str(&self.trailing);
            self.trailing.clear();
        }
        self.out.push_str(text);
    }

    fn mark(&self) -> Mark {
        Mark {
            len: self.out.len(),
            trailing: self.trailing.clone(),
        }
    }

    fn reset(&mut self, mark: &Mark) {
        self.out.truncate(mark.len);
        self.trailing.clone_from(&mark.trailing);
    }

    fn run(&mut self, lens: &Lens, skel: Option<&Skel>, file: &Node) -> Step {
        let mut cursor = Cursor::new(file);
        self.put(lens, skel, &mut cursor)?;
        match file.children.get(cursor.next) {
            None => Ok(()),
            Some(extra) => Err(format!(
                "node '{}' does not fit the lens",
                extra.label().unwrap_or("(none)")
            )),
        }
    }

    fn put<'t>(&mut self, lens: &Lens, skel: Option<&Skel>, cursor: &mut Cursor<'t>) -> Step {
        match lens {
            Lens::Del { default, .. } => {
                match skel {
                    Some(Skel::Text(text)) => self.write(text),
                    Some(Skel::AtEnd) => self.trailing.push_str(default),
                    _ => self.write(default),
                }
                Ok(())
            }
            Lens::Store(pattern) => {
                let value = cursor
                    .node
                    .value()
                    .ok_or_else(|| format!("node '{}' has no value", cursor.describe()))?;
                if !pattern.matches(value) {
                    return Err(format!(
                        "value '{value}' of node '{}' does not match {pattern:?}",
                        cursor.describe()
                    ));
                }
                self.write(value);
                self.tokens += 1;
                Ok(())
            }
            Lens::Key(pattern) => {
                let label = cursor.node.label().ok_or("node has no label")?;
                if !pattern.matches(label) {
                    return Err(format!("label '{label}' does not match {pattern:?}"));
                }
                self.write(label);
                self.tokens += 1;
                Ok(())
            }
            Lens::Label(expected) => match cursor.node.label() {
                Some(label) if label == expected => Ok(()),
                other => Err(format!(
                    "expected label '{expected}', found '{}'",
                    other.unwrap_or("(none)")
                )),
            },
            Lens::Seq(_) => match cursor.node.label() {
                Some(label) if !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit()) => {
                    Ok(())
                }
                other => Err(format!(
                    "expected a numbered node, found '{}'",
                    other.unwrap_or("(none)")
                )),
            },
            Lens::Concat(parts) => {
                let items = match skel {
                    Some(Skel::Concat(items)) if items.len() == parts.len() => Some(items),
                    _ => None,
                };
                for (idx, part) in parts.iter().enumerate() {
                    self.put(part, items.map(|items| &items[idx]), cursor)?;
                }
                Ok(())
            }
            Lens::Union(alternatives) => self.union(alternatives, skel, cursor),
            Lens::Star(body) => self.repeat(body, skel, cursor, 0, usize::MAX),
            Lens::Plus(body) => self.repeat(body, skel, cursor, 1, usize::MAX),
            Lens::Maybe(body) => self.repeat(body, skel, cursor, 0, 1),
            Lens::Subtree(body) => {
                let Some(child) = cursor.node.children.get(cursor.next) else {
                    return Err(format!("no node left under '{}'", cursor.describe()));
                };
                let mark = self.mark();
                let mut inner = Cursor::new(child);
                let reused = match self.node_skels.get(&child.id()) {
                    Some(own) => self.put(body, Some(own), &mut inner).is_ok() && inner.done(),
                    None => false,
                };
                if !reused {
                    self.reset(&mark);
                    inner = Cursor::new(child);
                    self.put(body, None, &mut inner)?;
                    if !inner.done() {
                        return Err(format!(
                            "children of '{}' do not fit the lens",
                            inner.describe()
                        ));
                    }
                }
                cursor.next += 1;
                Ok(())
            }
        }
    }

    /// The recorded alternative is tried first. Otherwise the first
    /// alternative that prints a node wins, then the first that succeeds.
    fn union<'t>(&mut self, alternatives: &[Lens], skel: Option<&Skel>, cursor: &mut Cursor<'t>) -> Step {
        let saved = *cursor;
        let mark = self.mark();

        if let Some(Skel::Union(idx, inner)) = skel {
            if let Some(alternative) = alternatives.get(*idx) {
                if self.put(alternative, Some(inner), cursor).is_ok() {
                    return Ok(());
                }
                *cursor = saved;
                self.reset(&mark);
            }
        }

        let mut last_error = None;
        for consuming in [true, false] {
            for alternative in alternatives {
                match self.put(alternative, None, cursor) {
                    Ok(()) if !consuming || cursor.next > saved.next => return Ok(()),
                    Ok(()) => {}
                    Err(err) => last_error = Some(err),
                }
                *cursor = saved;
                self.reset(&mark);
            }
        }
        Err(last_error.unwrap_or_else(|| "no alternative matches".to_string()))
    }

    /// Replay recorded iterations whose nodes are still present, skip the
    /// ones whose nodes were removed, and print new nodes in front of the
    /// first recorded node that follows them.
    fn repeat<'t>(
        &mut self,
        body: &Lens,
        skel: Option<&Skel>,
        cursor: &mut Cursor<'t>,
        min: usize,
        max: usize,
    ) -> Step {
        let items: &[Skel] = match skel {
            Some(Skel::Repeat(items)) => items,
            _ => &[],
        };
        let mut count = 0;

        for item in items {
            if count >= max {
                break;
            }
            let ids = item.subtree_ids();
            let Some(first) = ids.first() else {
                let saved = *cursor;
                let mark = self.mark();
                if self.put(body, Some(item), cursor).is_ok() {
                    count += 1;
                } else {
                    *cursor = saved;
                    self.reset(&mark);
                }
                continue;
            };

            let remaining = &cursor.node.children[cursor.next.min(cursor.node.children.len())..];
            let Some(offset) = remaining.iter().position(|c| c.id() == *first) else {
                continue;
            };
            let target = cursor.next + offset;
            while cursor.next < target {
                self.create_one(body, cursor)?;
                count += 1;
            }

            let saved = *cursor;
            let mark = self.mark();
            let reused = self.put(body, Some(item), cursor).is_ok() && cursor.next > target;
            if !reused {
                *cursor = saved;
                self.reset(&mark);
                self.create_one(body, cursor)?;
            }
            count += 1;
        }

        // An optional part that prints a value but no node (an optional
        // store) is created when the tree has that value.
        let optional = max == 1;
        while count < max && (optional || !cursor.done()) {
            let saved = *cursor;
            let mark = self.mark();
            let tokens = self.tokens;
            match self.put(body, None, cursor) {
                Ok(()) if cursor.next > saved.next => count += 1,
                Ok(()) if optional && self.tokens > tokens => count += 1,
                _ => {
                    *cursor = saved;
                    self.reset(&mark);
                    break;
                }
            }
        }

        if count < min {
            return Err(format!("expected at least {min} item(s) under '{}'", cursor.describe()));
        }
        Ok(())
    }

    fn create_one<'t>(&mut self, body: &Lens, cursor: &mut Cursor<'t>) -> Step {
        let before = cursor.next;
        self.put(body, None, cursor)?;
        if cursor.next == before {
            let label = cursor
                .node
                .children
                .get(before)
                .and_then(|c| c.label())
                .unwrap_or("(none)");
            return Err(format!("node '{label}' does not fit the lens"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::get;

    fn kv() -> Lens {
        let entry = Lens::subtree(Lens::concat(vec![
            Lens::key("[a-z]+").unwrap(),
            Lens::del("[ \t]*=[ \t]*", " = ").unwrap(),
            Lens::store("[^ \t\n#]+").unwrap(),
            Lens::del("\n", "\n").unwrap(),
        ]));
        let comment = Lens::del("#[^\n]*\n", "#\n").unwrap();
        let blank = Lens::del("[ \t]*\n", "\n").unwrap();
        Lens::star(Lens::union(vec![entry, comment, blank]))
    }

    fn file(nodes: Vec<Node>) -> Node {
        Node::labeled("file").with_children(nodes)
    }

    const TEXT: &str = "# header\na=1\n\nb =  2\nc=3\n";

    #[test]
    fn unchanged_tree_prints_original_text() {
        let lens = kv();
        let parsed = get(&lens, TEXT, "f", false).unwrap();
        let out = put(&lens, &parsed.skeleton, &file(parsed.nodes), "f").unwrap();
        assert_eq!(out, TEXT);
    }

    #[test]
    fn edited_value_keeps_surrounding_text() {
        let lens = kv();
        let parsed = get(&lens, TEXT, "f", false).unwrap();
        let mut nodes = parsed.nodes;
        nodes[1].value = Some("42".into());
        let out = put(&lens, &parsed.skeleton, &file(nodes), "f").unwrap();
        assert_eq!(out, "# header\na=1\n\nb =  42\nc=3\n");
    }

    #[test]
    fn removed_and_appended_nodes() {
        let lens = kv();
        let parsed = get(&lens, TEXT, "f", false).unwrap();
        let mut nodes = parsed.nodes;
        nodes.remove(1);
        nodes.push(Node::labeled("d").with_value("4"));
        let out = put(&lens, &parsed.skeleton, &file(nodes), "f").unwrap();
        assert_eq!(out, "# header\na=1\n\nc=3\nd = 4\n");
    }

    #[test]
    fn inserted_node_lands_before_its_successor() {
        let lens = kv();
        let parsed = get(&lens, TEXT, "f", false).unwrap();
        let mut nodes = parsed.nodes;
        nodes.insert(0, Node::labeled("z").with_value("0"));
        let out = put(&lens, &parsed.skeleton, &file(nodes), "f").unwrap();
        assert_eq!(out, "# header\nz = 0\na=1\n\nb =  2\nc=3\n");
    }

    #[test]
    fn invalid_value_is_rejected() {
        let lens = kv();
        let parsed = get(&lens, TEXT, "f", false).unwrap();
        let mut nodes = parsed.nodes;
        nodes[0].value = Some("has space".into());
        let err = put(&lens, &parsed.skeleton, &file(nodes), "/files/f").unwrap_err();
        assert!(matches!(err, LensError::Put { ref path, .. } if path == "/files/f"));
    }

    #[test]
    fn create_uses_defaults() {
        let lens = kv();
        let tree = file(vec![
            Node::labeled("x").with_value("1"),
            Node::labeled("y").with_value("2"),
        ]);
        assert_eq!(create(&lens, &tree, "f").unwrap(), "x = 1\ny = 2\n");
    }

    #[test]
    fn optional_value_follows_the_tree() {
        let lens = Lens::star(Lens::subtree(Lens::concat(vec![
            Lens::key("[a-z]+").unwrap(),
            Lens::maybe(Lens::concat(vec![
                Lens::del("=", "=").unwrap(),
                Lens::store("[0-9]+").unwrap(),
            ])),
            Lens::literal(";").unwrap(),
        ])));
        let parsed = get(&lens, "a;b=2;", "f", false).unwrap();
        let mut nodes = parsed.nodes;
        nodes[0].value = Some("1".into());
        nodes[1].value = None;
        let out = put(&lens, &parsed.skeleton, &file(nodes), "f").unwrap();
        assert_eq!(out, "a=1;b;");
    }

    fn lines() -> Lens {
        Lens::star(Lens::subtree(Lens::concat(vec![
            Lens::key("[a-z]+").unwrap(),
            Lens::del("[ \t]*=[ \t]*", " = ").unwrap(),
            Lens::store("[0-9]+").unwrap(),
            Lens::del("[ \t]*(\n|$)", "\n").unwrap(),
        ])))
    }

    #[test]
    fn missing_final_newline_is_kept() {
        let lens = lines();
        let parsed = get(&lens, "a=1\nb=2", "f", false).unwrap();
        let mut nodes = parsed.nodes;
        nodes[1].value = Some("3".into());
        let out = put(&lens, &parsed.skeleton, &file(nodes), "f").unwrap();
        assert_eq!(out, "a=1\nb=3");
    }

    #[test]
    fn append_after_missing_final_newline_starts_a_new_line() {
        let lens = lines();
        let parsed = get(&lens, "a=1", "f", false).unwrap();
        let mut nodes = parsed.nodes;
        nodes.push(Node::labeled("b").with_value("2"));
        let out = put(&lens, &parsed.skeleton, &file(nodes.clone()), "f").unwrap();
        assert_eq!(out, "a=1\nb = 2\n");

        let reparsed = get(&lens, &out, "f", false).unwrap();
        let labels: Vec<_> = reparsed.nodes.iter().map(|n| n.label()).collect();
        assert_eq!(labels, vec![Some("a"), Some("b")]);
    }

    #[test]
    fn reordered_last_line_gets_its_newline() {
        let lens = lines();
        let parsed = get(&lens, "a=1\nb=2", "f", false).unwrap();
        let mut nodes = parsed.nodes;
        nodes.swap(0, 1);
        let out = put(&lens, &parsed.skeleton, &file(nodes), "f").unwrap();
        assert_eq!(out, "b=2\na=1\n");
    }
}
