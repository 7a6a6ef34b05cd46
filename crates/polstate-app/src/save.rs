//! The save pipeline: batch policy changes into both scope files and hand back their bytes.

use anyhow::Context;
use polstate_domain::catalog::PolicyCatalog;
use polstate_domain::model::PolicyState;
use polstate_domain::options::ElementOptions;
use polstate_polfile::PolFile;
use polstate_types::PolicyScope;
use tracing::{debug, warn};

/// One requested change.
#[derive(Clone, Debug)]
pub struct PolicyChange {
    pub policy_id: String,
    pub scope: PolicyScope,
    pub state: PolicyState,
    pub options: ElementOptions,
}

/// Serialized policy files for the privileged writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveBuffers {
    pub machine: Vec<u8>,
    pub user: Vec<u8>,
}

impl SaveBuffers {
    pub fn for_scope(&self, scope: PolicyScope) -> &[u8] {
        match scope {
            PolicyScope::Machine => &self.machine,
            PolicyScope::User => &self.user,
        }
    }
}

/// Apply `changes` in order, then serialize both files.
///
/// Unknown policy ids and policies that do not apply to the requested scope are
/// skipped. A failing change aborts the batch; earlier changes stay applied.
pub fn save_policies(
    catalog: &PolicyCatalog,
    machine: &mut PolFile,
    user: &mut PolFile,
    changes: &[PolicyChange],
) -> anyhow::Result<SaveBuffers> {
    for change in changes {
        let Some(def) = catalog.get(&change.policy_id) else {
            warn!(policy = %change.policy_id, "skipping unknown policy");
            continue;
        };
        if !def.section.includes(change.scope) {
            warn!(policy = %def.id, scope = %change.scope, "policy does not apply to scope");
            continue;
        }
        let target = match change.scope {
            PolicyScope::Machine => &mut *machine,
            PolicyScope::User => &mut *user,
        };
        polstate_domain::forget(def, target)
            .with_context(|| format!("forget {}", def.id))?;
        if matches!(change.state, PolicyState::Enabled | PolicyState::Disabled) {
            polstate_domain::apply_state(def, target, change.state, &change.options)
                .with_context(|| format!("apply {} to {}", change.state, def.id))?;
        }
        debug!(policy = %def.id, scope = %change.scope, state = %change.state, "change staged");
    }

    Ok(SaveBuffers {
        machine: machine.to_bytes(),
        user: user.to_bytes(),
    })
}
