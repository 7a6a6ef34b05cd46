//! Policy definitions indexed by id.

use crate::model::{DefinitionError, PolicyDefinition, PolicySection};
use polstate_types::PolicyScope;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

#[derive(Clone, Debug, Default)]
pub struct PolicyCatalog {
    policies: BTreeMap<String, PolicyDefinition>,
}

impl PolicyCatalog {
    /// Build a catalog, rejecting duplicate policy ids and definitions that fail
    /// [`PolicyDefinition::validate`].
    ///
    /// Two definitions that differ only in section (one machine, one user) are merged
    /// into a single `Both` entry under the first id.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = PolicyDefinition>,
    ) -> Result<Self, DefinitionError> {
        let mut seen = HashSet::new();
        let mut ordered: Vec<PolicyDefinition> = Vec::new();
        for def in definitions {
            def.validate()?;
            if !seen.insert(def.id.clone()) {
                return Err(DefinitionError::DuplicatePolicyId(def.id));
            }
            match ordered.iter_mut().find(|existing| complementary(existing, &def)) {
                Some(existing) => {
                    debug!(policy = %existing.id, merged = %def.id, "merged complementary sections");
                    existing.section = PolicySection::Both;
                }
                None => ordered.push(def),
            }
        }
        Ok(Self {
            policies: ordered.into_iter().map(|def| (def.id.clone(), def)).collect(),
        })
    }

    pub fn get(&self, id: &str) -> Option<&PolicyDefinition> {
        self.policies.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyDefinition> {
        self.policies.values()
    }

    /// Definitions that apply to `scope`.
    pub fn in_scope(&self, scope: PolicyScope) -> impl Iterator<Item = &PolicyDefinition> {
        self.iter().filter(move |def| def.section.includes(scope))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

fn complementary(a: &PolicyDefinition, b: &PolicyDefinition) -> bool {
    a.section.complement_of(b.section)
        && a.display_name == b.display_name
        && a.explain_text == b.explain_text
        && polstate_types::key_eq(&a.registry_key, &b.registry_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn sectioned(id: &str, section: PolicySection) -> PolicyDefinition {
        let mut def = root_toggle(id, "Enabled");
        def.display_name = "Shared".to_string();
        def.section = section;
        def
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = PolicyCatalog::from_definitions([root_toggle("a", "X"), root_toggle("a", "Y")])
            .expect_err("duplicate");
        assert_eq!(err, DefinitionError::DuplicatePolicyId("a".to_string()));
    }

    #[test]
    fn machine_and_user_twins_collapse_to_both() {
        let catalog = PolicyCatalog::from_definitions([
            sectioned("m", PolicySection::Machine),
            sectioned("u", PolicySection::User),
        ])
        .expect("catalog");
        assert_eq!(catalog.len(), 1);
        let def = catalog.get("m").expect("merged under the first id");
        assert_eq!(def.section, PolicySection::Both);
        assert_eq!(catalog.in_scope(PolicyScope::User).count(), 1);
    }

    #[test]
    fn differing_definitions_stay_separate() {
        let mut user = sectioned("u", PolicySection::User);
        user.explain_text = "different".to_string();
        let catalog =
            PolicyCatalog::from_definitions([sectioned("m", PolicySection::Machine), user])
                .expect("catalog");
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.in_scope(PolicyScope::Machine).count(), 1);
    }
}
