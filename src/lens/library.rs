//! Registry of named lenses.
//!
//! Lenses are grouped in modules and addressed as `Module.lens`. `@Module`
//! names the module's autoload lens. A handful of modules are built in;
//! more are read from TOML files on the load path (see [`crate::lens::module`]).

use crate::lens::errors::LensError;
use crate::lens::module;
use crate::lens::typecheck;
use crate::lens::Lens;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Transform a module asks to have set up automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Autoload {
    /// Name of a lens in the same module.
    pub lens: String,
    pub incl: Vec<String>,
    pub excl: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LensModule {
    pub name: String,
    pub lenses: BTreeMap<String, Arc<Lens>>,
    pub autoload: Option<Autoload>,
    /// File the module was read from; `None` for built-in modules.
    pub origin: Option<PathBuf>,
}

impl LensModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lenses: BTreeMap::new(),
            autoload: None,
            origin: None,
        }
    }

    pub fn with_lens(mut self, name: impl Into<String>, lens: Lens) -> Self {
        self.lenses.insert(name.into(), Arc::new(lens));
        self
    }

    pub fn with_autoload(mut self, lens: &str, incl: &[&str]) -> Self {
        self.autoload = Some(Autoload {
            lens: lens.to_string(),
            incl: incl.iter().map(|s| s.to_string()).collect(),
            excl: Vec::new(),
        });
        self
    }
}

#[derive(Debug, Default)]
pub struct LensLibrary {
    modules: BTreeMap<String, LensModule>,
}

impl LensLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library holding the built-in modules.
    pub fn with_builtins() -> Result<Self, LensError> {
        let mut library = Self::new();
        for module in builtin::modules()? {
            library.register(module);
        }
        Ok(library)
    }

    /// Add `module`, replacing any module of the same name.
    pub fn register(&mut self, module: LensModule) {
        debug!(
            module = %module.name,
            lenses = module.lenses.len(),
            origin = ?module.origin,
            "registered lens module"
        );
        self.modules.insert(module.name.clone(), module);
    }

    /// Read every module file in `dirs`. Files that fail to load are
    /// returned and do not stop the others.
    pub fn load_dirs(&mut self, dirs: &[PathBuf]) -> Vec<LensError> {
        let mut errors = Vec::new();
        for dir in dirs {
            for file in module::module_files(dir) {
                match module::load_module(&file, self) {
                    Ok(loaded) => self.register(loaded),
                    Err(err) => errors.push(err),
                }
            }
        }
        errors
    }

    pub fn module(&self, name: &str) -> Option<&LensModule> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &LensModule> {
        self.modules.values()
    }

    /// Qualified `Module.lens` names of every registered lens.
    pub fn names(&self) -> Vec<String> {
        self.modules
            .values()
            .flat_map(|m| m.lenses.keys().map(move |l| format!("{}.{}", m.name, l)))
            .collect()
    }

    /// Canonical `Module.lens` form of `name`.
    pub fn qualify(&self, name: &str) -> Result<String, LensError> {
        if let Some(module_name) = name.strip_prefix('@') {
            let module = self
                .modules
                .get(module_name)
                .ok_or_else(|| self.not_found(name))?;
            let lens = module
                .autoload
                .as_ref()
                .map(|a| a.lens.as_str())
                .unwrap_or("lns");
            return Ok(format!("{module_name}.{lens}"));
        }
        Ok(name.to_string())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Lens>, LensError> {
        let qualified = self.qualify(name)?;
        qualified
            .split_once('.')
            .and_then(|(module, lens)| self.modules.get(module)?.lenses.get(lens))
            .cloned()
            .ok_or_else(|| self.not_found(name))
    }

    /// Autoload transforms as `(module, Module.lens, autoload)`.
    pub fn autoloads(&self) -> Vec<(String, String, Autoload)> {
        self.modules
            .values()
            .filter_map(|m| {
                let autoload = m.autoload.clone()?;
                let lens = format!("{}.{}", m.name, autoload.lens);
                Some((m.name.clone(), lens, autoload))
            })
            .collect()
    }

    /// Type check every registered lens.
    pub fn typecheck(&self) -> Result<(), LensError> {
        for module in self.modules.values() {
            for (name, lens) in &module.lenses {
                typecheck::check(&format!("{}.{}", module.name, name), lens)?;
            }
        }
        Ok(())
    }

    fn not_found(&self, name: &str) -> LensError {
        let wanted = name.trim_start_matches('@');
        let mut candidates = self.names();
        candidates.extend(self.modules.keys().map(|m| format!("@{m}")));
        let suggestion = candidates
            .into_iter()
            .map(|candidate| {
                let score = strsim::jaro_winkler(wanted, candidate.trim_start_matches('@'));
                (score, candidate)
            })
            .filter(|(score, _)| *score >= 0.85)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, candidate)| candidate);
        LensError::NoLens {
            name: name.to_string(),
            suggestion,
        }
    }
}

/// Built-in modules.
mod builtin {
    use super::LensModule;
    use crate::lens::errors::LensError;
    use crate::lens::Lens;

    pub(super) fn modules() -> Result<Vec<LensModule>, LensError> {
        Ok(vec![hosts()?, simplevars()?, simplelines()?])
    }

    fn eol() -> Result<Lens, LensError> {
        Lens::del("[ \t]*(\n|$)", "\n")
    }

    fn indent() -> Result<Lens, LensError> {
        Lens::del("[ \t]*", "")
    }

    fn empty() -> Result<Lens, LensError> {
        Lens::del("[ \t]*#?[ \t]*\n", "\n")
    }

    /// `# text` on a line of its own, as a `#comment` node.
    fn comment() -> Result<Lens, LensError> {
        Ok(Lens::subtree_labeled(
            "#comment",
            Lens::concat(vec![
                indent()?,
                Lens::del("#[ \t]*", "# ")?,
                Lens::store("[^ \t\n]([^\n]*[^ \t\n])?")?,
                eol()?,
            ]),
        ))
    }

    fn field(label: &str, pattern: &str) -> Result<Lens, LensError> {
        Ok(Lens::subtree_labeled(label, Lens::store(pattern)?))
    }

    /// `/etc/hosts`: numbered records with `ipaddr`, `canonical` and any
    /// number of `alias` entries.
    fn hosts() -> Result<LensModule, LensError> {
        let word = "[^# \n\t]+";
        let record = Lens::subtree(Lens::concat(vec![
            Lens::seq("host"),
            indent()?,
            field("ipaddr", word)?,
            Lens::del("[ \t]+", "\t")?,
            field("canonical", word)?,
            Lens::star(Lens::subtree_labeled(
                "alias",
                Lens::concat(vec![Lens::del("[ \t]+", " ")?, Lens::store(word)?]),
            )),
            Lens::maybe(Lens::subtree_labeled(
                "#comment",
                Lens::concat(vec![
                    Lens::del("[ \t]*#[ \t]*", " # ")?,
                    Lens::store("[^ \t\n]([^\n]*[^ \t\n])?")?,
                ]),
            )),
            eol()?,
        ]));
        let lns = Lens::star(Lens::union(vec![empty()?, comment()?, record.clone()]));
        Ok(LensModule::new("Hosts")
            .with_lens("record", record)
            .with_lens("lns", lns)
            .with_autoload("lns", &["/etc/hosts"]))
    }

    /// `key = value` files with optional trailing comments.
    fn simplevars() -> Result<LensModule, LensError> {
        let entry = Lens::subtree(Lens::concat(vec![
            indent()?,
            Lens::key("[A-Za-z0-9_.-]+")?,
            Lens::del("[ \t]*=[ \t]*", " = ")?,
            Lens::maybe(Lens::store("[^ \t\n#]([^\n#]*[^ \t\n#])?")?),
            Lens::maybe(Lens::subtree_labeled(
                "#comment",
                Lens::concat(vec![
                    Lens::del("[ \t]*#[ \t]*", " # ")?,
                    Lens::store("[^ \t\n]([^\n]*[^ \t\n])?")?,
                ]),
            )),
            eol()?,
        ]));
        let lns = Lens::star(Lens::union(vec![empty()?, comment()?, entry.clone()]));
        Ok(LensModule::new("Simplevars")
            .with_lens("entry", entry)
            .with_lens("lns", lns)
            .with_autoload(
                "lns",
                &["/etc/kernel-img.conf", "/etc/selinux/semanage.conf"],
            ))
    }

    /// One value per line, numbered.
    fn simplelines() -> Result<LensModule, LensError> {
        let line = Lens::subtree(Lens::concat(vec![
            Lens::seq("line"),
            indent()?,
            Lens::store("[^# \t\n]([^\n]*[^ \t\n])?")?,
            eol()?,
        ]));
        let lns = Lens::star(Lens::union(vec![empty()?, comment()?, line.clone()]));
        Ok(LensModule::new("Simplelines")
            .with_lens("line", line)
            .with_lens("lns", lns)
            .with_autoload(
                "lns",
                &["/etc/at.allow", "/etc/at.deny", "/etc/cron.allow", "/etc/cron.deny"],
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::{get, put};
    use crate::tree::Node;

    fn roundtrip(name: &str, text: &str) -> Vec<Node> {
        let library = LensLibrary::with_builtins().unwrap();
        let lens = library.resolve(name).unwrap();
        let parsed = get(&lens, text, "test", false).unwrap();
        let file = Node::labeled("f").with_children(parsed.nodes.clone());
        assert_eq!(put(&lens, &parsed.skeleton, &file, "test").unwrap(), text);
        parsed.nodes
    }

    #[test]
    fn resolves_qualified_and_autoload_names() {
        let library = LensLibrary::with_builtins().unwrap();
        assert!(library.resolve("Hosts.lns").is_ok());
        assert!(library.resolve("@Hosts").is_ok());
        assert_eq!(library.qualify("@Simplevars").unwrap(), "Simplevars.lns");
        assert_eq!(library.autoloads().len(), 3);
    }

    #[test]
    fn unknown_lens_gets_suggestion() {
        let library = LensLibrary::with_builtins().unwrap();
        match library.resolve("Host.lns") {
            Err(LensError::NoLens { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("Hosts.lns"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn builtins_pass_typecheck() {
        LensLibrary::with_builtins().unwrap().typecheck().unwrap();
    }

    #[test]
    fn hosts_roundtrip() {
        let text = "# local\n127.0.0.1\tlocalhost localhost.localdomain\n\n::1 ip6-localhost # v6\n192.168.0.1 gw";
        let nodes = roundtrip("Hosts.lns", text);
        assert_eq!(nodes[0].label(), Some("#comment"));
        assert_eq!(nodes[0].value(), Some("local"));
        let first = &nodes[1];
        assert_eq!(first.label(), Some("1"));
        assert_eq!(first.child_by_label("ipaddr").unwrap().value(), Some("127.0.0.1"));
        assert_eq!(first.children.iter().filter(|c| c.label() == Some("alias")).count(), 1);
        assert_eq!(nodes[2].child_by_label("#comment").unwrap().value(), Some("v6"));
        assert_eq!(nodes[3].label(), Some("3"));
    }

    #[test]
    fn simplevars_roundtrip() {
        let nodes = roundtrip("Simplevars.lns", "# cfg\nfoo = bar\n  baz=1 # one\nempty =\n");
        assert_eq!(nodes[1].label(), Some("foo"));
        assert_eq!(nodes[1].value(), Some("bar"));
        assert_eq!(nodes[2].child_by_label("#comment").unwrap().value(), Some("one"));
        assert_eq!(nodes[3].value(), None);
    }

    #[test]
    fn simplelines_roundtrip() {
        let nodes = roundtrip("Simplelines.lns", "root\n# users\nalice\n");
        let values: Vec<_> = nodes.iter().filter_map(|n| n.value()).collect();
        assert_eq!(values, vec!["root", "users", "alice"]);
    }
}
