//! The `/augeas` subtree: session state published into the tree, and the
//! parts of it that callers may edit and have read back.
//!
//! ```text
//! /augeas/root            root directory, with a trailing slash
//! /augeas/version
//! /augeas/save            overwrite | backup | newfile | noop
//! /augeas/span            enable | disable
//! /augeas/context         base of relative paths
//! /augeas/load/<name>     lens, incl*, excl*
//! /augeas/files/<file>    path, lens, error (message, pos, line, char)
//! /augeas/events/saved*   files written by the last save
//! ```

use crate::transform::{FileEntry, FileError, SaveMode, SavedFile, Transform, TransformTable};
use crate::tree::{Node, NodePath, Tree};
use std::collections::BTreeMap;
use tracing::warn;

pub const META: &str = "augeas";

fn meta(tree: &mut Tree) -> Option<NodePath> {
    tree.ensure_path(&NodePath::root(), &[META])
}

/// Set `/augeas/<labels>` to `value` without marking anything dirty.
fn put_value(tree: &mut Tree, labels: &[&str], value: &str) {
    let Some(base) = meta(tree) else {
        return;
    };
    let Some(at) = tree.ensure_path(&base, labels) else {
        return;
    };
    if let Some(node) = tree.node_mut(&at) {
        node.value = Some(value.to_string());
    }
}

fn value_of(tree: &Tree, labels: &[&str]) -> Option<String> {
    let mut at = tree.child_by_label(&NodePath::root(), META)?;
    for label in labels {
        at = tree.child_by_label(&at, label)?;
    }
    tree.node(&at)?.value().map(str::to_string)
}

/// Replace the children of `/augeas/<label>`.
fn reset(tree: &mut Tree, label: &str) -> Option<NodePath> {
    let base = meta(tree)?;
    let at = tree.ensure_path(&base, &[label])?;
    if let Some(node) = tree.node_mut(&at) {
        node.children.clear();
    }
    Some(at)
}

/// Publish the fixed facts of a session.
pub fn publish_session(tree: &mut Tree, root: &str, mode: SaveMode, spans: bool) {
    let root = if root.ends_with('/') {
        root.to_string()
    } else {
        format!("{root}/")
    };
    put_value(tree, &["root"], &root);
    put_value(tree, &["version"], env!("CARGO_PKG_VERSION"));
    put_value(tree, &["save"], mode.as_str());
    put_value(tree, &["span"], if spans { "enable" } else { "disable" });
    if value_of(tree, &["context"]).is_none() {
        put_value(tree, &["context"], crate::store::DEFAULT_CONTEXT);
    }
}

/// Save mode requested through `/augeas/save`.
pub fn read_save_mode(tree: &Tree) -> Result<Option<SaveMode>, String> {
    match value_of(tree, &["save"]) {
        None => Ok(None),
        Some(value) => SaveMode::parse(&value)
            .map(Some)
            .ok_or_else(|| format!("invalid /augeas/save value '{value}'")),
    }
}

/// Span tracking requested through `/augeas/span`.
pub fn read_span(tree: &Tree) -> Option<bool> {
    value_of(tree, &["span"]).map(|value| value.trim() == "enable")
}

pub fn publish_transforms(tree: &mut Tree, table: &TransformTable) {
    let Some(load) = reset(tree, "load") else {
        return;
    };
    for transform in table.iter() {
        let mut children = vec![Node::labeled("lens").with_value(transform.lens.as_str())];
        children.extend(
            transform
                .incl
                .iter()
                .map(|glob| Node::labeled("incl").with_value(glob.as_str())),
        );
        children.extend(
            transform
                .excl
                .iter()
                .map(|glob| Node::labeled("excl").with_value(glob.as_str())),
        );
        tree.attach(
            &load,
            Node::labeled(transform.name.as_str()).with_children(children),
        );
    }
}

/// Rebuild the transform table from `/augeas/load`. Entries without a
/// lens are skipped.
pub fn read_transforms(tree: &Tree) -> TransformTable {
    let mut table = TransformTable::new();
    let Some(load) = tree
        .child_by_label(&NodePath::root(), META)
        .and_then(|meta| tree.child_by_label(&meta, "load"))
    else {
        return table;
    };
    let Some(load) = tree.node(&load) else {
        return table;
    };
    for entry in &load.children {
        let Some(name) = entry.label() else {
            continue;
        };
        let values = |label: &str| -> Vec<String> {
            entry
                .children
                .iter()
                .filter(|c| c.label() == Some(label))
                .filter_map(|c| c.value().map(str::to_string))
                .collect()
        };
        let Some(lens) = values("lens").into_iter().next() else {
            warn!(transform = name, "transform without lens ignored");
            continue;
        };
        table.add(Transform::new(&lens, Some(name), values("incl"), values("excl")));
    }
    table
}

/// Publish loaded files and load/save errors under `/augeas/files`.
pub fn publish_files(tree: &mut Tree, files: &BTreeMap<String, FileEntry>, errors: &[FileError]) {
    let Some(base) = reset(tree, "files") else {
        return;
    };
    for entry in files.values() {
        if let Some(at) = file_node(tree, &base, &entry.path) {
            set_child(tree, &at, "path", &format!("/files{}", entry.path));
            set_child(tree, &at, "lens", &entry.lens);
        }
    }
    for error in errors {
        record_error(tree, &base, error);
    }
}

/// Add `errors` to the already published `/augeas/files`.
pub fn publish_errors(tree: &mut Tree, errors: &[FileError]) {
    let Some(base) = meta(tree) else {
        return;
    };
    let Some(base) = tree.ensure_path(&base, &["files"]) else {
        return;
    };
    for error in errors {
        record_error(tree, &base, error);
    }
}

fn record_error(tree: &mut Tree, base: &NodePath, error: &FileError) {
    let Some(at) = file_node(tree, base, &error.path) else {
        return;
    };
    set_child(tree, &at, "path", &format!("/files{}", error.path));
    if let Some(lens) = &error.lens {
        set_child(tree, &at, "lens", lens);
    }
    let mut children = vec![Node::labeled("message").with_value(error.message.as_str())];
    if let Some(pos) = &error.position {
        children.push(Node::labeled("pos").with_value(pos.pos.to_string()));
        children.push(Node::labeled("line").with_value(pos.line.to_string()));
        children.push(Node::labeled("char").with_value(pos.col.to_string()));
    }
    if let Some(node) = tree.node_mut(&at) {
        node.children.retain(|c| c.label() != Some("error"));
    }
    tree.attach(
        &at,
        Node::labeled("error")
            .with_value(error.kind.as_str())
            .with_children(children),
    );
}

fn file_node(tree: &mut Tree, base: &NodePath, path: &str) -> Option<NodePath> {
    let labels = crate::transform::path_components(path);
    tree.ensure_path(base, &labels)
}

fn set_child(tree: &mut Tree, at: &NodePath, label: &str, value: &str) {
    let Some(child) = tree.ensure_path(at, &[label]) else {
        return;
    };
    if let Some(node) = tree.node_mut(&child) {
        node.value = Some(value.to_string());
    }
}

/// `/augeas/events/saved`, one entry per file written.
pub fn publish_saved(tree: &mut Tree, saved: &[SavedFile]) {
    let Some(events) = reset(tree, "events") else {
        return;
    };
    for file in saved {
        tree.attach(
            &events,
            Node::labeled("saved").with_value(format!("/files{}", file.path)),
        );
    }
}
