//! Lens modules defined in TOML.
//!
//! ```toml
//! module = "Keyvals"
//!
//! [lenses.entry]
//! type = "subtree"
//! body = { type = "concat", parts = [
//!     { type = "key", re = "[a-z]+" },
//!     { type = "del", re = "[ \t]*=[ \t]*", default = "=" },
//!     { type = "store", re = "[^\n]*" },
//!     { type = "literal", text = "\n" },
//! ] }
//!
//! [lenses.lns]
//! type = "star"
//! body = { type = "ref", name = "entry" }
//!
//! [autoload]
//! lens = "lns"
//! incl = ["/etc/keyvals.conf"]
//! ```
//!
//! `ref` names another lens of the same module, or `Module.lens` for a
//! lens of an already registered module.

use crate::lens::errors::LensError;
use crate::lens::library::{Autoload, LensLibrary, LensModule};
use crate::lens::Lens;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
struct ModuleFile {
    module: String,
    #[serde(default)]
    lenses: BTreeMap<String, LensDef>,
    #[serde(default)]
    autoload: Option<AutoloadDef>,
}

#[derive(Debug, Deserialize)]
struct AutoloadDef {
    lens: String,
    #[serde(default)]
    incl: Vec<String>,
    #[serde(default)]
    excl: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LensDef {
    Del {
        re: String,
        #[serde(default)]
        default: String,
    },
    Literal {
        text: String,
    },
    Store {
        re: String,
    },
    Key {
        re: String,
    },
    Label {
        name: String,
    },
    Seq {
        name: String,
    },
    Concat {
        parts: Vec<LensDef>,
    },
    Union {
        alts: Vec<LensDef>,
    },
    Star {
        body: Box<LensDef>,
    },
    Plus {
        body: Box<LensDef>,
    },
    Opt {
        body: Box<LensDef>,
    },
    Subtree {
        #[serde(default)]
        label: Option<String>,
        body: Box<LensDef>,
    },
    Ref {
        name: String,
    },
}

/// `*.toml` files directly inside `dir`, sorted by name.
pub fn module_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        })
        .map(|entry| entry.path().to_path_buf())
        .collect()
}

pub fn load_module(path: &Path, library: &LensLibrary) -> Result<LensModule, LensError> {
    let source = fs::read_to_string(path).map_err(|err| LensError::Module {
        module: path.display().to_string(),
        message: err.to_string(),
    })?;
    let mut module = parse_module(&source, library).map_err(|err| match err {
        LensError::Module { module, message } if module.is_empty() => LensError::Module {
            module: path.display().to_string(),
            message,
        },
        other => other,
    })?;
    module.origin = Some(path.to_path_buf());
    Ok(module)
}

pub fn parse_module(source: &str, library: &LensLibrary) -> Result<LensModule, LensError> {
    let file: ModuleFile = toml_edit::de::from_str(source).map_err(|err| LensError::Module {
        module: String::new(),
        message: err.to_string(),
    })?;

    let name = file.module.trim().to_string();
    if name.is_empty() || name.contains('.') || name.contains('@') {
        return Err(LensError::Module {
            module: String::new(),
            message: format!("invalid module name '{}'", file.module),
        });
    }

    let mut builder = Builder {
        module: &name,
        defs: &file.lenses,
        library,
        built: BTreeMap::new(),
        visiting: Vec::new(),
    };
    for lens_name in file.lenses.keys() {
        builder.named(lens_name)?;
    }
    let lenses = builder
        .built
        .into_iter()
        .map(|(lens_name, lens)| (lens_name, Arc::new(lens)))
        .collect::<BTreeMap<_, _>>();

    let autoload = match file.autoload {
        Some(def) => {
            if !lenses.contains_key(&def.lens) {
                return Err(LensError::Module {
                    module: name,
                    message: format!("autoload lens '{}' is not defined", def.lens),
                });
            }
            Some(Autoload {
                lens: def.lens,
                incl: def.incl,
                excl: def.excl,
            })
        }
        None => None,
    };

    Ok(LensModule {
        name,
        lenses,
        autoload,
        origin: None,
    })
}

struct Builder<'a> {
    module: &'a str,
    defs: &'a BTreeMap<String, LensDef>,
    library: &'a LensLibrary,
    built: BTreeMap<String, Lens>,
    visiting: Vec<String>,
}

impl<'a> Builder<'a> {
    fn error(&self, message: String) -> LensError {
        LensError::Module {
            module: self.module.to_string(),
            message,
        }
    }

    fn named(&mut self, name: &str) -> Result<Lens, LensError> {
        if let Some(lens) = self.built.get(name) {
            return Ok(lens.clone());
        }
        if name.contains('.') {
            return Ok(self.library.resolve(name)?.as_ref().clone());
        }
        let Some(def) = self.defs.get(name) else {
            return Err(self.error(format!("reference to undefined lens '{name}'")));
        };
        if self.visiting.iter().any(|v| v == name) {
            return Err(self.error(format!("lens '{name}' refers to itself")));
        }
        self.visiting.push(name.to_string());
        let lens = self.build(def)?;
        self.visiting.pop();
        self.built.insert(name.to_string(), lens.clone());
        Ok(lens)
    }

    fn build(&mut self, def: &LensDef) -> Result<Lens, LensError> {
        let lens = match def {
            LensDef::Del { re, default } => Lens::del(re, default.clone())?,
            LensDef::Literal { text } => Lens::literal(text)?,
            LensDef::Store { re } => Lens::store(re)?,
            LensDef::Key { re } => Lens::key(re)?,
            LensDef::Label { name } => Lens::label(name.clone()),
            LensDef::Seq { name } => Lens::seq(name.clone()),
            LensDef::Concat { parts } => Lens::concat(self.build_all(parts)?),
            LensDef::Union { alts } => Lens::union(self.build_all(alts)?),
            LensDef::Star { body } => Lens::star(self.build(body)?),
            LensDef::Plus { body } => Lens::plus(self.build(body)?),
            LensDef::Opt { body } => Lens::maybe(self.build(body)?),
            LensDef::Subtree { label, body } => {
                let body = self.build(body)?;
                match label {
                    Some(label) => Lens::subtree_labeled(label.clone(), body),
                    None => Lens::subtree(body),
                }
            }
            LensDef::Ref { name } => self.named(name)?,
        };
        Ok(lens)
    }

    fn build_all(&mut self, defs: &[LensDef]) -> Result<Vec<Lens>, LensError> {
        defs.iter().map(|def| self.build(def)).collect()
    }
}
