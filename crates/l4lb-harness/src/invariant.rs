//! Maglev table consistency.
//!
//! For every address family the service's consistent-hash table must be
//! populated exactly when the service has at least one backend of that family.

use crate::error::{AssertionError, PhaseError};
use crate::sut::{AddressFamily, HashTableView, ServiceDefinition, SutClient};

/// Checks `view` against the backends of `service`, IPv4 first.
pub fn check(view: &HashTableView, service: &ServiceDefinition) -> Result<(), AssertionError> {
    for family in AddressFamily::ALL {
        let populated = view.is_populated(family);
        let backends = service.backends_of(family);
        if populated != (backends > 0) {
            return Err(AssertionError::Invariant {
                service: service.id,
                family,
                populated,
                backends,
                dump: render(view),
            });
        }
    }
    Ok(())
}

/// Reads the SUT's table for `service` and runs [`check`] on it. The raw
/// views are logged at `error` when the check fails.
pub fn assert_maglev_sane<S: SutClient>(
    sut: &S,
    service: &ServiceDefinition,
) -> Result<(), PhaseError> {
    let view = sut.hash_table_list(service.id)?;
    if let Err(e) = check(&view, service) {
        tracing::error!(service = %service.id, "Maglev table:\n{}", render(&view));
        return Err(e.into());
    }
    tracing::info!(service = %service.id, "Maglev table consistent with backends");
    Ok(())
}

fn render(view: &HashTableView) -> String {
    format!("v4: {}\nv6: {}", view.v4.trim(), view.v6.trim())
}
