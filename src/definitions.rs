/// Definitions collected during the block phase, looked up during the inline phase
use std::any::{Any, TypeId};
use std::collections::HashMap;

use unicode_casefold::UnicodeCaseFold;

/// A link reference definition, e.g. `[label]: /destination "title"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReferenceDefinition {
    pub label: String,
    pub destination: String,
    pub title: Option<String>,
}

/// Normalize a reference label for matching: trim, Unicode case fold,
/// collapse internal whitespace to single spaces.
pub fn normalize_label(label: &str) -> String {
    let folded: String = label.trim().chars().case_fold().collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A map of definitions, keyed by definition type and normalized label.
///
/// Built-in parsing only stores [`LinkReferenceDefinition`]s; extensions may
/// register their own definition types (e.g. footnote definitions) under the
/// same labels without colliding. The first definition registered for a
/// normalized label wins; later duplicates are ignored.
#[derive(Default)]
pub struct Definitions {
    map: HashMap<TypeId, HashMap<String, Box<dyn Any>>>,
}

impl Definitions {
    pub fn new() -> Self {
        Definitions::default()
    }

    pub fn register<D: Any>(&mut self, label: &str, definition: D) {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return;
        }
        self.map
            .entry(TypeId::of::<D>())
            .or_default()
            .entry(normalized)
            .or_insert_with(|| Box::new(definition));
    }

    pub fn lookup<D: Any>(&self, label: &str) -> Option<&D> {
        let normalized = normalize_label(label);
        self.map
            .get(&TypeId::of::<D>())?
            .get(&normalized)?
            .downcast_ref::<D>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_folds_case_and_whitespace() {
        assert_eq!(normalize_label("  Foo   Bar\t"), "foo bar");
        assert_eq!(normalize_label("foo\nbar"), "foo bar");
        // Unicode case folding, not just ASCII lowercasing
        assert_eq!(normalize_label("ΑΓΩ"), normalize_label("αγω"));
    }

    #[test]
    fn test_first_definition_wins() {
        let mut definitions = Definitions::new();
        definitions.register(
            "foo",
            LinkReferenceDefinition {
                label: "foo".to_string(),
                destination: "/first".to_string(),
                title: None,
            },
        );
        definitions.register(
            "FOO",
            LinkReferenceDefinition {
                label: "FOO".to_string(),
                destination: "/second".to_string(),
                title: None,
            },
        );
        let def = definitions
            .lookup::<LinkReferenceDefinition>("Foo")
            .unwrap();
        assert_eq!(def.destination, "/first");
    }

    #[test]
    fn test_lookup_is_type_keyed() {
        #[derive(Debug, PartialEq)]
        struct OtherDefinition(u32);

        let mut definitions = Definitions::new();
        definitions.register("label", OtherDefinition(7));
        assert!(
            definitions
                .lookup::<LinkReferenceDefinition>("label")
                .is_none()
        );
        assert_eq!(
            definitions.lookup::<OtherDefinition>("label"),
            Some(&OtherDefinition(7))
        );
    }

    #[test]
    fn test_blank_label_is_not_registered() {
        let mut definitions = Definitions::new();
        definitions.register(
            "   ",
            LinkReferenceDefinition {
                label: "   ".to_string(),
                destination: "/url".to_string(),
                title: None,
            },
        );
        assert!(definitions.lookup::<LinkReferenceDefinition>(" ").is_none());
    }
}
