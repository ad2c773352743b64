//! Static checks for lens definitions.
//!
//! These catch grammars whose `get` would loop without progress, choose
//! between alternatives arbitrarily, or produce nodes `put` cannot print.
//! Checking is opt-in because module grammars can be large.

use crate::lens::errors::LensError;
use crate::lens::Lens;

pub fn check(name: &str, lens: &Lens) -> Result<(), LensError> {
    walk(lens, false).map_err(|message| LensError::Type {
        name: name.to_string(),
        message,
    })
}

/// `repeated` is set below a star or plus that has no subtree in between.
fn walk(lens: &Lens, repeated: bool) -> Result<(), String> {
    match lens {
        Lens::Del { pattern, default } => {
            if !pattern.matches(default) {
                return Err(format!(
                    "default '{}' does not match {pattern:?}",
                    default.escape_debug()
                ));
            }
            Ok(())
        }
        Lens::Store(pattern) if repeated => Err(format!(
            "store {pattern:?} is repeated outside of a subtree"
        )),
        Lens::Key(pattern) if repeated => Err(format!(
            "key {pattern:?} is repeated outside of a subtree"
        )),
        Lens::Label(label) if repeated => {
            Err(format!("label '{label}' is repeated outside of a subtree"))
        }
        Lens::Seq(counter) if repeated => {
            Err(format!("seq '{counter}' is repeated outside of a subtree"))
        }
        Lens::Store(_) | Lens::Key(_) | Lens::Label(_) | Lens::Seq(_) => Ok(()),
        Lens::Concat(parts) => parts.iter().try_for_each(|part| walk(part, repeated)),
        Lens::Union(alternatives) => {
            let nullable = alternatives.iter().filter(|alt| alt.is_nullable()).count();
            if nullable > 1 {
                return Err(format!(
                    "{nullable} alternatives of a union match the empty string"
                ));
            }
            alternatives.iter().try_for_each(|alt| walk(alt, repeated))
        }
        Lens::Star(body) | Lens::Plus(body) => {
            if body.is_nullable() {
                return Err("repeated lens matches the empty string".to_string());
            }
            walk(body, true)
        }
        Lens::Maybe(body) => walk(body, repeated),
        Lens::Subtree(body) => {
            if !sets_label(body) {
                return Err("subtree has no key, label or seq".to_string());
            }
            walk(body, false)
        }
    }
}

/// Does every successful `get` through `lens` assign a label?
fn sets_label(lens: &Lens) -> bool {
    match lens {
        Lens::Key(_) | Lens::Label(_) | Lens::Seq(_) => true,
        Lens::Concat(parts) => parts.iter().any(sets_label),
        Lens::Union(alternatives) => alternatives.iter().all(sets_label),
        Lens::Plus(body) => sets_label(body),
        Lens::Del { .. } | Lens::Store(_) | Lens::Star(_) | Lens::Maybe(_) | Lens::Subtree(_) => {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Lens {
        Lens::subtree(Lens::concat(vec![
            Lens::key("[a-z]+").unwrap(),
            Lens::literal("=").unwrap(),
            Lens::store("[0-9]+").unwrap(),
            Lens::literal("\n").unwrap(),
        ]))
    }

    #[test]
    fn well_formed_lens_passes() {
        assert!(check("t", &Lens::star(entry())).is_ok());
    }

    #[test]
    fn nullable_star_body_is_rejected() {
        let lens = Lens::star(Lens::del("[ ]*", "").unwrap());
        assert!(matches!(check("t", &lens), Err(LensError::Type { .. })));
    }

    #[test]
    fn ambiguous_empty_alternatives_are_rejected() {
        let lens = Lens::union(vec![
            Lens::del("a*", "").unwrap(),
            Lens::del("b*", "").unwrap(),
        ]);
        assert!(check("t", &lens).is_err());
    }

    #[test]
    fn subtree_needs_a_label() {
        let lens = Lens::subtree(Lens::store("[0-9]+").unwrap());
        assert!(check("t", &lens).is_err());
    }

    #[test]
    fn store_under_star_needs_subtree() {
        let lens = Lens::star(Lens::concat(vec![
            Lens::store("[0-9]+").unwrap(),
            Lens::literal(";").unwrap(),
        ]));
        assert!(check("t", &lens).is_err());
    }

    #[test]
    fn del_default_must_match() {
        let lens = Lens::del("[ \t]+", "").unwrap();
        assert!(check("t", &lens).is_err());
    }
}
