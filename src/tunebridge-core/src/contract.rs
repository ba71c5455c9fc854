use crate::error::BridgeError;
use crate::library::{Library, Player};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest a cancelled enumeration may take to stop its worker.
pub const CANCEL_DEADLINE: Duration = Duration::from_secs(5);

/// Known fixture contents a transport supplies to run the shared contract.
#[derive(Debug, Clone)]
pub struct LibraryContractExpectations {
    /// Persistent ids of every library track, in host order.
    pub expected_track_ids: Vec<String>,
    /// An id that `find_track` must resolve.
    pub lookup_id: String,
    /// A well-formed id that does not exist in the library.
    pub missing_id: String,
}

/// Errors surfaced by the library contract harness.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LibraryContractError {
    #[error("enumeration returned {actual:?}, expected {expected:?}")]
    TrackOrderMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("enumeration failed after {delivered} tracks: {error}")]
    EnumerationFailed { delivered: usize, error: BridgeError },
    #[error("track_count returned {actual}, expected {expected}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("track at position 0 is {actual}, expected {expected}")]
    PositionMismatch { expected: String, actual: String },
    #[error("find_track returned {actual}, expected {expected}")]
    LookupMismatch { expected: String, actual: String },
    #[error("missing id {id} did not produce NotFound: {outcome}")]
    MissingNotReported { id: String, outcome: String },
    #[error("malformed id was not rejected as an invalid argument: {outcome}")]
    MalformedIdAccepted { outcome: String },
    #[error("cancelled enumeration kept producing tracks")]
    CancelIgnored,
    #[error("running enumeration held no bracket on the library handle")]
    EnumerationNotBracketed,
    #[error("cancel took {elapsed:?}, longer than {deadline:?}")]
    CancelTooSlow { elapsed: Duration, deadline: Duration },
    #[error("library handle has {actual} pending operations after cancel, expected {expected}")]
    CancelLeftPending { expected: usize, actual: usize },
    #[error("out-of-range volume was not rejected: {outcome}")]
    VolumeAccepted { outcome: String },
    #[error("library error while running contract: {0}")]
    LibraryFailure(BridgeError),
}

/// Run the shared contract suite against a transport's library.
///
/// Transports call this from their tests with a fake host that holds exactly
/// the tracks named in `expectations`.
pub fn run_library_contract<L: Library + Player>(
    library: &L,
    expectations: &LibraryContractExpectations,
) -> Result<(), LibraryContractError> {
    verify_enumeration(library, expectations)?;
    verify_positions(library, expectations)?;
    verify_lookup(library, expectations)?;
    verify_cancellation(library, expectations)?;
    verify_volume(library)?;
    Ok(())
}

fn verify_enumeration<L: Library>(
    library: &L,
    expectations: &LibraryContractExpectations,
) -> Result<(), LibraryContractError> {
    let mut tracks = library.tracks().map_err(LibraryContractError::LibraryFailure)?;
    let mut actual = Vec::new();
    for track in tracks.by_ref() {
        actual.push(track.persistent_id().to_string());
        track.close();
    }
    if let Some(error) = tracks.take_error() {
        return Err(LibraryContractError::EnumerationFailed {
            delivered: actual.len(),
            error,
        });
    }
    if actual != expectations.expected_track_ids {
        return Err(LibraryContractError::TrackOrderMismatch {
            expected: expectations.expected_track_ids.clone(),
            actual,
        });
    }
    Ok(())
}

fn verify_positions<L: Library>(
    library: &L,
    expectations: &LibraryContractExpectations,
) -> Result<(), LibraryContractError> {
    let count = library
        .track_count()
        .map_err(LibraryContractError::LibraryFailure)?;
    if count != expectations.expected_track_ids.len() {
        return Err(LibraryContractError::CountMismatch {
            expected: expectations.expected_track_ids.len(),
            actual: count,
        });
    }

    if let Some(first) = expectations.expected_track_ids.first() {
        let track = library
            .track(0)
            .map_err(LibraryContractError::LibraryFailure)?;
        let actual = track.persistent_id().to_string();
        track.close();
        if &actual != first {
            return Err(LibraryContractError::PositionMismatch {
                expected: first.clone(),
                actual,
            });
        }
    }
    Ok(())
}

fn verify_lookup<L: Library>(
    library: &L,
    expectations: &LibraryContractExpectations,
) -> Result<(), LibraryContractError> {
    let track = library
        .find_track(&expectations.lookup_id)
        .map_err(LibraryContractError::LibraryFailure)?;
    let actual = track.persistent_id().to_string();
    track.close();
    if !actual.eq_ignore_ascii_case(&expectations.lookup_id) {
        return Err(LibraryContractError::LookupMismatch {
            expected: expectations.lookup_id.clone(),
            actual,
        });
    }

    match library.find_track(&expectations.missing_id) {
        Err(BridgeError::NotFound { .. }) => {}
        Ok(track) => {
            let outcome = format!("found {}", track.persistent_id());
            track.close();
            return Err(LibraryContractError::MissingNotReported {
                id: expectations.missing_id.clone(),
                outcome,
            });
        }
        Err(other) => {
            return Err(LibraryContractError::MissingNotReported {
                id: expectations.missing_id.clone(),
                outcome: other.to_string(),
            })
        }
    }

    match library.find_track("not a persistent id") {
        Err(BridgeError::InvalidArgument { .. }) => Ok(()),
        Ok(track) => {
            track.close();
            Err(LibraryContractError::MalformedIdAccepted {
                outcome: "track returned".into(),
            })
        }
        Err(other) => Err(LibraryContractError::MalformedIdAccepted {
            outcome: other.to_string(),
        }),
    }
}

fn verify_cancellation<L: Library>(
    library: &L,
    expectations: &LibraryContractExpectations,
) -> Result<(), LibraryContractError> {
    let baseline = library.handle().pending();
    let mut tracks = library.tracks().map_err(LibraryContractError::LibraryFailure)?;
    // A non-empty enumeration parks its worker on the first item.
    if !expectations.expected_track_ids.is_empty() && library.handle().pending() <= baseline {
        tracks.cancel();
        return Err(LibraryContractError::EnumerationNotBracketed);
    }

    let started = Instant::now();
    tracks.cancel();
    let elapsed = started.elapsed();
    if elapsed > CANCEL_DEADLINE {
        return Err(LibraryContractError::CancelTooSlow {
            elapsed,
            deadline: CANCEL_DEADLINE,
        });
    }
    if let Some(track) = tracks.next() {
        track.close();
        return Err(LibraryContractError::CancelIgnored);
    }

    let actual = library.handle().pending();
    if actual != baseline {
        return Err(LibraryContractError::CancelLeftPending {
            expected: baseline,
            actual,
        });
    }
    Ok(())
}

fn verify_volume<P: Player>(player: &P) -> Result<(), LibraryContractError> {
    match player.set_sound_volume(101) {
        Err(BridgeError::InvalidArgument { .. }) => Ok(()),
        Ok(()) => Err(LibraryContractError::VolumeAccepted {
            outcome: "accepted".into(),
        }),
        Err(other) => Err(LibraryContractError::VolumeAccepted {
            outcome: other.to_string(),
        }),
    }
}
