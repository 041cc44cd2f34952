use super::load_config;
use cordon::conflict::{now_ms, read_snapshot, Conflict, PairKey};
use cordon::platform::PartyId;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// List active conflicts involving a party
pub fn execute(config_path: &Path, party: u64, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let snapshot = read_snapshot(&config.store.path)?;
    let found = involving(&snapshot, PartyId(party));

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else {
        print!("{}", render(&found, PartyId(party), now_ms()));
    }
    Ok(())
}

/// Conflicts involving `party`, oldest first.
pub(crate) fn involving(snapshot: &BTreeMap<PairKey, Conflict>, party: PartyId) -> Vec<Conflict> {
    let mut found: Vec<Conflict> = snapshot
        .values()
        .filter(|c| c.involves(party))
        .cloned()
        .collect();
    found.sort_by_key(|c| c.created_at);
    found
}

/// Age of a timestamp, rounded to whole seconds.
pub(crate) fn age(since_ms: u64, now_ms: u64) -> String {
    let secs = now_ms.saturating_sub(since_ms) / 1000;
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

fn render(conflicts: &[Conflict], party: PartyId, now: u64) -> String {
    if conflicts.is_empty() {
        return format!("No active conflicts involving {}\n", party);
    }

    let mut output = format!("{} active conflict(s) involving {}\n\n", conflicts.len(), party);
    for conflict in conflicts {
        let other = conflict.counterpart(party).unwrap_or(party);
        output.push_str(&format!(
            "  {}  with {}  violations {}/{}  age {}  mutations {}\n",
            conflict.id,
            other,
            conflict.violations(party),
            conflict.violations(other),
            age(conflict.created_at, now),
            conflict.outstanding_mutations(),
        ));
    }
    output
}
