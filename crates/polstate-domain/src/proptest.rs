//! Property-based tests for the domain crate.
//!
//! Applying a state and evaluating it back must agree, and forgetting a policy must
//! leave nothing behind at the locations it references.

use crate::apply::apply_state;
use crate::evaluate::evaluate;
use crate::model::{PolicyDefinition, PolicyState};
use crate::options::{ElementOption, ElementOptions};
use crate::test_support::*;
use crate::walker::{forget, referenced_locations};
use polstate_polfile::PolFile;
use polstate_types::{PolicyReader, PolicySource, RegistryValue};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn arb_value_name() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,8}").unwrap()
}

/// A policy with no root value whose decimal elements all live under [`KEY`].
fn arb_element_policy() -> impl Strategy<Value = (PolicyDefinition, ElementOptions)> {
    (
        prop::collection::btree_set(arb_value_name(), 1..5),
        prop::collection::vec(any::<u32>(), 5),
    )
        .prop_map(|(names, numbers)| {
            let elements = names
                .iter()
                .map(|name| decimal(&name.to_lowercase(), name))
                .collect();
            let options = names
                .iter()
                .zip(numbers)
                .map(|(name, n)| (name.to_lowercase(), ElementOption::Decimal(n)))
                .collect();
            (with_elements(policy_without_root("p"), elements), options)
        })
}

/// Unrelated values that a policy under [`KEY`] never references.
fn arb_noise() -> impl Strategy<Value = BTreeMap<String, u32>> {
    prop::collection::btree_map(
        prop::string::string_regex("Noise[a-z]{1,4}").unwrap(),
        any::<u32>(),
        0..4,
    )
}

fn seeded(noise: &BTreeMap<String, u32>) -> PolFile {
    let mut pol = PolFile::new();
    for (name, n) in noise {
        set_dword(&mut pol, "Software\\Policies\\Other", name, *n);
    }
    pol
}

proptest! {
    #[test]
    fn root_toggle_states_round_trip(value in arb_value_name(), noise in arb_noise()) {
        let def = root_toggle("p", &value);
        let mut pol = seeded(&noise);
        for state in [PolicyState::Enabled, PolicyState::Disabled, PolicyState::NotConfigured] {
            apply_state(&def, &mut pol, state, &ElementOptions::new()).unwrap();
            prop_assert_eq!(evaluate(&def, &pol), state);
        }
        prop_assert_eq!(pol.len(), noise.len());
    }

    #[test]
    fn element_states_round_trip((def, options) in arb_element_policy()) {
        let mut pol = PolFile::new();
        apply_state(&def, &mut pol, PolicyState::Enabled, &options).unwrap();
        prop_assert_eq!(evaluate(&def, &pol), PolicyState::Enabled);
        prop_assert_eq!(crate::read::read_options(&def, &pol), options);

        apply_state(&def, &mut pol, PolicyState::Disabled, &ElementOptions::new()).unwrap();
        prop_assert_eq!(evaluate(&def, &pol), PolicyState::Disabled);
    }

    #[test]
    fn forget_clears_every_referenced_location(
        (def, options) in arb_element_policy(),
        enable in any::<bool>(),
    ) {
        let mut pol = PolFile::new();
        let state = if enable { PolicyState::Enabled } else { PolicyState::Disabled };
        apply_state(&def, &mut pol, state, &options).unwrap();
        forget(&def, &mut pol).unwrap();

        for pair in referenced_locations(&def) {
            prop_assert!(!pol.contains_value(&pair.key, &pair.value));
            prop_assert!(!pol.will_delete_value(&pair.key, &pair.value));
        }
        prop_assert!(pol.is_empty());
    }

    #[test]
    fn evaluation_never_panics_on_arbitrary_content(
        entries in prop::collection::vec(
            (arb_value_name(), prop_oneof![
                any::<u32>().prop_map(RegistryValue::DWord),
                "[a-z0-9]{0,6}".prop_map(RegistryValue::Text),
            ], any::<bool>()),
            0..8,
        ),
        (def, _) in arb_element_policy(),
    ) {
        let mut pol = PolFile::new();
        for (name, data, delete) in entries {
            if delete {
                pol.delete_value(KEY, &name).unwrap();
            } else {
                let kind = data.natural_type();
                pol.set_value(KEY, &name, data, kind).unwrap();
            }
        }
        let _ = evaluate(&def, &pol);
        let _ = crate::read::read_options(&def, &pol);
    }
}
