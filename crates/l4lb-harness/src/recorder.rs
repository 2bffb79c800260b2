//! Packet recorder definition and removal.

use crate::error::{AssertionError, PhaseError};
use crate::sut::{listing_has_id, RecorderDefinition, SutClient};

/// Programs `recorder` and confirms the SUT lists it.
pub fn define_recorder<S: SutClient>(sut: &S, recorder: &RecorderDefinition) -> Result<(), PhaseError> {
    tracing::info!(
        id = recorder.id,
        caplen = recorder.caplen,
        filters = recorder.filters.len(),
        "defining recorder"
    );
    sut.recorder_update(recorder)?;

    let listing = sut.recorder_list()?;
    if !listing_has_id(&listing, recorder.id) {
        tracing::error!(id = recorder.id, "recorder list:\n{listing}");
        return Err(AssertionError::NotListed {
            what: "recorder",
            id: recorder.id,
        }
        .into());
    }
    Ok(())
}

/// Deletes recorder `id` and confirms the very next listing no longer shows it.
pub fn delete_recorder<S: SutClient>(sut: &S, id: u16) -> Result<(), PhaseError> {
    sut.recorder_delete(id)?;

    let listing = sut.recorder_list()?;
    if listing_has_id(&listing, id) {
        tracing::error!(id, "recorder list:\n{listing}");
        return Err(AssertionError::StillListed { what: "recorder", id }.into());
    }
    tracing::info!(id, "recorder deleted");
    Ok(())
}
