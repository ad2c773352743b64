use crate::lens::errors::LensError;
use crate::lens::skeleton::{Parsed, Skel, Skeleton};
use crate::lens::Lens;
use crate::tree::{line_col, Node, NodeId, Span, TextRange};
use std::collections::HashMap;

/// Node being assembled by the innermost enclosing subtree.
#[derive(Default)]
struct Frame {
    label: Option<String>,
    value: Option<String>,
    children: Vec<Node>,
    label_range: TextRange,
    value_range: TextRange,
}

/// Enough of the parser state to undo a failed alternative.
struct Mark {
    children: usize,
    label: Option<String>,
    value: Option<String>,
    label_range: TextRange,
    value_range: TextRange,
    counters: HashMap<String, usize>,
}

struct Getter<'t> {
    text: &'t str,
    filename: &'t str,
    spans: bool,
    frames: Vec<Frame>,
    counters: HashMap<String, usize>,
    node_skels: HashMap<NodeId, Skel>,
    /// Ids of a parse result are local to it; see [`Tree::graft`](crate::tree::Tree::graft).
    next_id: u64,
    /// Furthest position at which a primitive failed, for error reporting.
    furthest: usize,
}

/// Parse `text` with `lens`. The whole input has to be consumed.
pub fn get(lens: &Lens, text: &str, filename: &str, spans: bool) -> Result<Parsed, LensError> {
    let mut getter = Getter {
        text,
        filename,
        spans,
        frames: vec![Frame::default()],
        counters: HashMap::new(),
        node_skels: HashMap::new(),
        next_id: 1,
        furthest: 0,
    };

    let (end, skel) = match getter.get(lens, 0) {
        Some(result) => result,
        None => return Err(getter.error(getter.furthest, "syntax error")),
    };
    if end < text.len() {
        let pos = getter.furthest.max(end);
        return Err(getter.error(pos, "get did not match entire input"));
    }

    let top = getter.frames.pop().unwrap_or_default();
    Ok(Parsed {
        nodes: top.children,
        skeleton: Skeleton {
            top: Some(skel),
            nodes: getter.node_skels,
        },
    })
}

impl<'t> Getter<'t> {
    fn error(&self, pos: usize, message: &str) -> LensError {
        let (line, col) = line_col(self.text, pos);
        LensError::Parse {
            file: self.filename.to_string(),
            pos,
            line,
            col,
            message: message.to_string(),
        }
    }

    fn frame(&mut self) -> &mut Frame {
        // The top-level frame is pushed before parsing starts and popped
        // only after it ends.
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn mark(&mut self) -> Mark {
        let counters = self.counters.clone();
        let frame = self.frame();
        Mark {
            children: frame.children.len(),
            label: frame.label.clone(),
            value: frame.value.clone(),
            label_range: frame.label_range,
            value_range: frame.value_range,
            counters,
        }
    }

    fn restore(&mut self, mark: Mark) {
        self.counters = mark.counters;
        let frame = self.frame();
        frame.children.truncate(mark.children);
        frame.label = mark.label;
        frame.value = mark.value;
        frame.label_range = mark.label_range;
        frame.value_range = mark.value_range;
    }

    fn token(&mut self, pattern: &crate::lens::Pattern, pos: usize) -> Option<(usize, &'t str)> {
        let text = self.text;
        match pattern.match_prefix(&text[pos..]) {
            Some(len) => Some((pos + len, &text[pos..pos + len])),
            None => {
                self.furthest = self.furthest.max(pos);
                None
            }
        }
    }

    fn get(&mut self, lens: &Lens, pos: usize) -> Option<(usize, Skel)> {
        match lens {
            Lens::Del { pattern, .. } => {
                let (end, matched) = self.token(pattern, pos)?;
                if matched.is_empty() && end == self.text.len() {
                    return Some((end, Skel::AtEnd));
                }
                Some((end, Skel::Text(matched.to_string())))
            }
            Lens::Store(pattern) => {
                let (end, matched) = self.token(pattern, pos)?;
                let frame = self.frame();
                frame.value = Some(matched.to_string());
                frame.value_range = TextRange::new(pos, end);
                Some((end, Skel::Token))
            }
            Lens::Key(pattern) => {
                let (end, matched) = self.token(pattern, pos)?;
                let frame = self.frame();
                frame.label = Some(matched.to_string());
                frame.label_range = TextRange::new(pos, end);
                Some((end, Skel::Token))
            }
            Lens::Label(label) => {
                self.frame().label = Some(label.clone());
                Some((pos, Skel::Token))
            }
            Lens::Seq(counter) => {
                let next = self.counters.entry(counter.clone()).or_insert(0);
                *next += 1;
                let label = next.to_string();
                self.frame().label = Some(label);
                Some((pos, Skel::Token))
            }
            Lens::Concat(parts) => {
                let mut at = pos;
                let mut skels = Vec::with_capacity(parts.len());
                for part in parts {
                    let (end, skel) = self.get(part, at)?;
                    skels.push(skel);
                    at = end;
                }
                Some((at, Skel::Concat(skels)))
            }
            Lens::Union(alternatives) => {
                for (idx, alternative) in alternatives.iter().enumerate() {
                    let mark = self.mark();
                    match self.get(alternative, pos) {
                        Some((end, skel)) => return Some((end, Skel::Union(idx, Box::new(skel)))),
                        None => self.restore(mark),
                    }
                }
                None
            }
            Lens::Star(body) => Some(self.repeat(body, pos, usize::MAX)),
            Lens::Plus(body) => {
                let (end, skel) = self.repeat(body, pos, usize::MAX);
                match &skel {
                    Skel::Repeat(items) if items.is_empty() => None,
                    _ => Some((end, skel)),
                }
            }
            Lens::Maybe(body) => Some(self.repeat(body, pos, 1)),
            Lens::Subtree(body) => {
                self.frames.push(Frame::default());
                let result = self.get(body, pos);
                let frame = self.frames.pop().unwrap_or_default();
                let (end, skel) = result?;

                let mut node = Node::new(frame.label, frame.value).with_children(frame.children);
                if self.spans {
                    node.span = Some(Span {
                        filename: self.filename.to_string(),
                        label: frame.label_range,
                        value: frame.value_range,
                        node: TextRange::new(pos, end),
                    });
                }
                let id = NodeId::from_raw(self.next_id);
                self.next_id += 1;
                node.set_id(id);
                self.node_skels.insert(id, skel);
                self.frame().children.push(node);
                Some((end, Skel::Subtree(id)))
            }
        }
    }

    /// Apply `body` up to `limit` times. Stops at the first iteration that
    /// fails or consumes nothing.
    fn repeat(&mut self, body: &Lens, pos: usize, limit: usize) -> (usize, Skel) {
        let mut at = pos;
        let mut items = Vec::new();
        while items.len() < limit {
            let mark = self.mark();
            match self.get(body, at) {
                Some((end, skel)) if end > at => {
                    items.push(skel);
                    at = end;
                }
                _ => {
                    self.restore(mark);
                    break;
                }
            }
        }
        (at, Skel::Repeat(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `key = value` lines
    fn kv() -> Lens {
        Lens::star(Lens::subtree(Lens::concat(vec![
            Lens::key("[a-z]+").unwrap(),
            Lens::del("[ \t]*=[ \t]*", " = ").unwrap(),
            Lens::store("[^\n]*").unwrap(),
            Lens::del("\n", "\n").unwrap(),
        ])))
    }

    #[test]
    fn builds_nodes_in_order() {
        let parsed = get(&kv(), "a = 1\nb=2\n", "test", false).unwrap();
        let labels: Vec<_> = parsed.nodes.iter().map(|n| n.label().unwrap()).collect();
        let values: Vec<_> = parsed.nodes.iter().map(|n| n.value().unwrap()).collect();
        assert_eq!(labels, vec!["a", "b"]);
        assert_eq!(values, vec!["1", "2"]);
        assert_eq!(parsed.skeleton.nodes.len(), 2);
        assert!(parsed.nodes[0].span.is_none());
    }

    #[test]
    fn unconsumed_input_is_a_parse_error() {
        let err = get(&kv(), "a = 1\n!!\n", "f.conf", false).unwrap_err();
        match err {
            LensError::Parse { file, line, col, .. } => {
                assert_eq!(file, "f.conf");
                assert_eq!((line, col), (2, 1));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn records_spans_when_enabled() {
        let parsed = get(&kv(), "a = 1\nbc=22\n", "f", true).unwrap();
        let span = parsed.nodes[1].span.clone().unwrap();
        assert_eq!(span.label, TextRange::new(6, 8));
        assert_eq!(span.value, TextRange::new(9, 11));
        assert_eq!(span.node, TextRange::new(6, 12));
    }

    #[test]
    fn union_restores_state_of_failed_alternative() {
        let lens = Lens::subtree(Lens::union(vec![
            Lens::concat(vec![
                Lens::key("[a-z]+").unwrap(),
                Lens::literal("!").unwrap(),
            ]),
            Lens::concat(vec![Lens::label("num"), Lens::store("[a-z0-9]+").unwrap()]),
        ]));
        let parsed = get(&lens, "abc", "f", false).unwrap();
        assert_eq!(parsed.nodes[0].label(), Some("num"));
        assert_eq!(parsed.nodes[0].value(), Some("abc"));
    }

    #[test]
    fn seq_numbers_records() {
        let lens = Lens::star(Lens::subtree(Lens::concat(vec![
            Lens::seq("rec"),
            Lens::store("[a-z]+").unwrap(),
            Lens::literal(";").unwrap(),
        ])));
        let parsed = get(&lens, "x;y;z;", "f", false).unwrap();
        let labels: Vec<_> = parsed.nodes.iter().map(|n| n.label().unwrap()).collect();
        assert_eq!(labels, vec!["1", "2", "3"]);
    }
}
