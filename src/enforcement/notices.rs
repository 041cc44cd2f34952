//! Best-effort side channels: private notices, audit entries, oversight
//! notices and the running per-conflict log record.
//!
//! Failures here are logged once and swallowed; they never block counters,
//! mutations or persistence.

use super::engine::ConflictEngine;
use crate::conflict::{now_ms, Conflict};
use crate::platform::{CommunityId, PartyId, PlatformClient};
use std::collections::BTreeSet;
use tracing::{debug, warn};

impl<P: PlatformClient> ConflictEngine<P> {
    /// Send a private notice, swallowing failures.
    pub(crate) async fn notify(&self, party: PartyId, text: &str) {
        if let Err(e) = self.platform.send_private_notice(party, text).await {
            warn!(party = %party, "private notice not delivered: {}", e);
        }
    }

    /// Append an entry to the community's audit channel.
    pub(crate) async fn audit(&self, community: CommunityId, text: &str) {
        let Some(channel) = self.settings.community(community).audit_channel else {
            debug!(community = %community, "no audit channel configured");
            return;
        };
        if let Err(e) = self.platform.post_log(channel, text).await {
            warn!(community = %community, "audit entry not posted: {}", e);
        }
    }

    /// Notify every holder of a configured oversight grant.
    pub(crate) async fn notify_oversight(&self, community: CommunityId, text: &str) {
        let mut recipients = BTreeSet::new();
        for grant in self.settings.community(community).oversight_grants {
            match self.platform.parties_with_grant(community, grant).await {
                Ok(parties) => recipients.extend(parties),
                Err(e) => warn!(grant = %grant, "oversight list unavailable: {}", e),
            }
        }
        if recipients.is_empty() {
            // Fall back to the audit channel so the notice is not lost
            self.audit(community, text).await;
            return;
        }
        for party in recipients {
            self.notify(party, text).await;
        }
    }

    /// Update the conflict's running log record in place, posting it the first time.
    pub(crate) async fn update_running_log(&self, conflict: &mut Conflict) {
        let Some(channel) = self.settings.community(conflict.community).audit_channel else {
            return;
        };
        let text = running_log_text(conflict);

        if let Some(existing) = conflict.log_ref {
            match self.platform.edit_log(channel, existing, &text).await {
                Ok(()) => return,
                Err(e) if e.is_not_found() => {
                    debug!(pair = %conflict.id, "running log record gone, reposting");
                }
                Err(e) => {
                    warn!(pair = %conflict.id, "running log record not updated: {}", e);
                    return;
                }
            }
        }

        match self.platform.post_log(channel, &text).await {
            Ok(id) => conflict.log_ref = Some(id),
            Err(e) => warn!(pair = %conflict.id, "running log record not posted: {}", e),
        }
    }
}

/// Render the running log record for a conflict.
pub fn running_log_text(conflict: &Conflict) -> String {
    let mut output = format!(
        "Conflict {} (parties {} and {})\nOpened by {}: {}\n",
        conflict.id, conflict.party_a, conflict.party_b, conflict.moderator_id, conflict.reason
    );

    for party in conflict.parties() {
        let count = conflict.violations(party);
        let status = match conflict.mutations_of(party) {
            Some(m) if m.strict_mode => "strict enforcement",
            Some(m) if !m.is_empty() => "muted",
            _ if count == 1 => "warned",
            _ if count == 0 => "no contact",
            _ => "messages removed",
        };
        output.push_str(&format!("- {}: {} violation(s), {}\n", party, count, status));
    }

    output.push_str(&format!("Updated {}\n", format_age(conflict.created_at, now_ms())));
    output
}

/// Relative age of a timestamp, for log records.
pub fn format_age(since_ms: u64, now_ms: u64) -> String {
    if now_ms < since_ms {
        return format!("at {}", since_ms);
    }
    let elapsed = (now_ms - since_ms) / 1000;
    match elapsed {
        0..=60 => "just after opening".to_string(),
        61..=3600 => format!("{} min after opening", elapsed / 60),
        3601..=86400 => format!("{} hours after opening", elapsed / 3600),
        _ => format!("{} days after opening", elapsed / 86400),
    }
}

pub(crate) fn warning_text(other: PartyId) -> String {
    format!(
        "You are in an active no-contact case with {}. This message was left up as a \
         warning; further mentions or replies will be removed and may lead to a mute.",
        other
    )
}

pub(crate) fn removed_text(count: u32, enforced: bool) -> String {
    if enforced {
        format!(
            "Your message was removed (violation {}). You have been muted and some \
             roles were temporarily removed; they will be restored automatically.",
            count
        )
    } else {
        format!(
            "Your message was removed (violation {}) because it targeted the other \
             party of your no-contact case.",
            count
        )
    }
}

pub(crate) fn contacted_text(offender: PartyId, count: u32) -> String {
    format!(
        "{} attempted to contact you despite the active no-contact case (violation {}). \
         The moderators have been informed; no action is needed from you.",
        offender, count
    )
}
