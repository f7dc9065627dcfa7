//! Property-based tests for recipe ids, templates, status derivation and
//! step bounds.

use indexmap::IndexMap;
use proptest::prelude::*;
use recipectl::core::error::RecipeError;
use recipectl::core::parser::is_valid_recipe_id;
use recipectl::core::recipe::{parse_recipe, Recipe};
use recipectl::core::resolver::{resolve_template, Params};
use recipectl::core::types::{RecipeStatus, StepStatus};

// =============================================================================
// Recipe ids
// =============================================================================

proptest! {
    /// Lowercase slugs are always accepted
    #[test]
    fn slug_ids_are_valid(id in "[a-z0-9][a-z0-9._-]{0,40}") {
        prop_assert!(is_valid_recipe_id(&id));
    }

    /// An uppercase letter anywhere makes the id invalid
    #[test]
    fn uppercase_ids_are_invalid(
        head in "[a-z0-9]{0,10}",
        upper in "[A-Z]",
        tail in "[a-z0-9]{0,10}",
    ) {
        let id = format!("{head}{upper}{tail}");
        prop_assert!(!is_valid_recipe_id(&id));
    }

    /// Ids may not start with punctuation
    #[test]
    fn leading_punctuation_is_invalid(lead in "[._-]", rest in "[a-z0-9]{0,10}") {
        let id = format!("{lead}{rest}");
        prop_assert!(!is_valid_recipe_id(&id));
    }
}

// =============================================================================
// Templates
// =============================================================================

fn params(key: &str, value: &str) -> Params {
    IndexMap::from([(
        key.to_string(),
        serde_yaml_ng::Value::String(value.to_string()),
    )])
}

proptest! {
    /// Text without braces passes through untouched
    #[test]
    fn plain_text_is_unchanged(text in "[^{}]{0,64}") {
        let resolved = resolve_template(&text, &Params::new()).unwrap();
        prop_assert_eq!(resolved, text);
    }

    /// A known param is substituted in place
    #[test]
    fn param_is_substituted(
        pre in "[a-z /]{0,12}",
        key in "[a-z_]{1,12}",
        value in "[a-zA-Z0-9.-]{0,16}",
        post in "[a-z /]{0,12}",
    ) {
        let template = format!("{pre}{{{{params.{key}}}}}{post}");
        let resolved = resolve_template(&template, &params(&key, &value)).unwrap();
        prop_assert_eq!(resolved, format!("{pre}{value}{post}"));
    }

    /// An unknown param is a validation error, never a silent blank
    #[test]
    fn unknown_param_is_error(key in "[a-z]{1,8}") {
        let template = format!("{{{{params.{key}_missing}}}}");
        let result = resolve_template(&template, &params(&key, "x"));
        prop_assert!(matches!(result, Err(RecipeError::Validation(_))));
    }
}

// =============================================================================
// Status derivation
// =============================================================================

fn step_status_strategy() -> impl Strategy<Value = StepStatus> {
    prop_oneof![
        Just(StepStatus::NotApplied),
        Just(StepStatus::Applied),
        Just(StepStatus::Reverted),
        Just(StepStatus::Failed),
    ]
}

proptest! {
    /// Any failed step makes the recipe failed
    #[test]
    fn failed_step_dominates(
        mut statuses in prop::collection::vec(step_status_strategy(), 0..8),
        at in any::<prop::sample::Index>(),
    ) {
        let pos = at.index(statuses.len() + 1);
        statuses.insert(pos, StepStatus::Failed);
        prop_assert_eq!(RecipeStatus::derive(&statuses), RecipeStatus::Failed);
    }

    /// Installed exactly when every step is applied
    #[test]
    fn installed_iff_all_applied(statuses in prop::collection::vec(step_status_strategy(), 1..8)) {
        let all_applied = statuses.iter().all(|s| *s == StepStatus::Applied);
        prop_assert_eq!(
            RecipeStatus::derive(&statuses) == RecipeStatus::Installed,
            all_applied
        );
    }
}

// =============================================================================
// Step bounds
// =============================================================================

fn shell_recipe(steps: usize) -> Recipe {
    let mut yaml = String::from("recipe:\n  id: bounds\n  name: Bounds\nsteps:\n");
    for i in 0..steps {
        yaml.push_str(&format!(
            "  - type: shell\n    apply: \"echo {i}\"\n    revert: \"true\"\n"
        ));
    }
    Recipe::from_file(parse_recipe(&yaml).unwrap()).unwrap()
}

proptest! {
    /// `step(i)` succeeds exactly for `0 <= i < len`
    #[test]
    fn step_lookup_respects_bounds(len in 1usize..6, index in 0usize..12) {
        let recipe = shell_recipe(len);
        match recipe.step(index) {
            Ok(step) => {
                prop_assert!(index < len);
                prop_assert_eq!(step.index(), index);
            }
            Err(RecipeError::StepIndexOutOfRange { index: i, len: l, .. }) => {
                prop_assert!(index >= len);
                prop_assert_eq!((i, l), (index, len));
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}
