//! Provider vocabulary normalization.
//!
//! The marketplace reports status through two loosely coupled fields: an
//! activation status string and an SMS status string, sometimes with an
//! SMS code attached. Webhook deliveries and poll snapshots use the same
//! vocabulary, so one normalizer serves both channels.

use crate::activation::{LifecycleState, SmsStatus};

/// A channel observation translated into the lifecycle vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedEvent {
    /// Candidate lifecycle state, after the SMS correction rule.
    pub state: LifecycleState,
    /// Candidate SMS status, when the event carried a recognizable one.
    /// `None` means the event made no claim and the current status
    /// survives.
    pub sms_status: Option<SmsStatus>,
}

/// Maps a raw provider status (plus SMS signals) into the lifecycle
/// vocabulary.
///
/// Status matching is case-insensitive. Anything outside the lifecycle
/// vocabulary — internal event kinds, balance notices, a literal
/// `pending` echo — returns `None`; callers halt gracefully on those
/// rather than failing, since both channels legitimately emit them.
///
/// Correction rule: some providers report "active" and "sms delivered" as
/// two separate fields instead of one unified status. A mapped `Active`
/// is therefore upgraded to `SmsReceived` when the event carries a
/// non-empty SMS code or an explicit `smsReceived` signal.
#[must_use]
pub fn normalize(
    status: &str,
    sms_status: Option<&str>,
    sms_code: Option<&str>,
) -> Option<NormalizedEvent> {
    // `pending` never arrives as a remote claim; a provider echoing it is
    // outside the lifecycle vocabulary just like an unknown string.
    let mapped =
        LifecycleState::from_wire(status).filter(|state| *state != LifecycleState::Pending)?;

    // An explicit "none" carries no information; treat it like an absent
    // field so it cannot regress a previously recorded SMS status.
    let sms = sms_status
        .and_then(SmsStatus::from_wire)
        .filter(|sms| *sms != SmsStatus::None);

    let sms_delivered = sms == Some(SmsStatus::SmsReceived) || has_code(sms_code);
    let state = if mapped == LifecycleState::Active && sms_delivered {
        LifecycleState::SmsReceived
    } else {
        mapped
    };

    Some(NormalizedEvent { state, sms_status: sms })
}

fn has_code(code: Option<&str>) -> bool {
    code.is_some_and(|code| !code.trim().is_empty())
}
