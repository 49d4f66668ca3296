use tokio::sync::OwnedRwLockWriteGuard;

use crate::model::{NannyId, NannyState};

use super::Engine;

/// Write locks held across a decide-then-commit sequence.
///
/// Guards are taken in ascending nanny id order, so two leases can never
/// wait on each other in a cycle. Dropping the lease releases every guard,
/// whichever way the caller leaves.
pub(super) struct Lease {
    guards: Vec<OwnedRwLockWriteGuard<NannyState>>,
}

impl Lease {
    pub(super) fn states(&self) -> Vec<&NannyState> {
        self.guards.iter().map(|g| &**g).collect()
    }

    fn position(&self, id: NannyId) -> Option<usize> {
        self.guards.binary_search_by_key(&id, |g| g.id()).ok()
    }

    pub(super) fn get(&self, id: NannyId) -> Option<&NannyState> {
        self.position(id).map(|i| &*self.guards[i])
    }

    pub(super) fn get_mut(&mut self, id: NannyId) -> Option<&mut NannyState> {
        self.position(id).map(|i| &mut *self.guards[i])
    }

    pub(super) fn len(&self) -> usize {
        self.guards.len()
    }
}

impl Engine {
    /// Lock the whole roster. Used by automatic assignment, which has to see
    /// every nanny's bookings at once.
    pub(super) async fn lease_roster(&self) -> Lease {
        let mut entries: Vec<_> = self
            .nannies
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(entries.len());
        for (_, rs) in entries {
            guards.push(rs.write_owned().await);
        }
        Lease { guards }
    }

    /// Lock a single nanny. `None` if the id is unknown.
    pub(super) async fn lease_nanny(&self, id: NannyId) -> Option<Lease> {
        let rs = self.get_nanny_state(id)?;
        let guard = rs.write_owned().await;
        Some(Lease {
            guards: vec![guard],
        })
    }
}
