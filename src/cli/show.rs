use super::list::age;
use super::load_config;
use cordon::conflict::{now_ms, read_snapshot, Conflict, PairKey};
use cordon::enforcement::running_log_text;
use std::path::Path;

/// Show one conflict in detail
pub fn execute(config_path: &Path, pair: &str) -> Result<(), Box<dyn std::error::Error>> {
    let key = PairKey::parse(pair).ok_or_else(|| format!("Invalid pair key '{}'", pair))?;
    let config = load_config(config_path)?;
    let snapshot = read_snapshot(&config.store.path)?;
    let conflict = snapshot
        .get(&key)
        .ok_or_else(|| format!("No active conflict for pair {}", key))?;

    print!("{}", render(conflict, now_ms()));
    Ok(())
}

fn render(conflict: &Conflict, now: u64) -> String {
    let mut output = running_log_text(conflict);
    output.push_str(&format!("State: {:?}\n", conflict.state));
    output.push_str(&format!(
        "Counters last reset {} ago\n",
        age(conflict.last_reset_at, now)
    ));

    for party in conflict.parties() {
        let Some(m) = conflict.mutations_of(party) else {
            continue;
        };
        output.push_str(&format!("\nMutations on {}:\n", party));
        output.push_str(&format!("  muted by engine: {}\n", m.muted));
        output.push_str(&format!("  strict mode: {}\n", m.strict_mode));
        if !m.removed_privileged.is_empty() {
            output.push_str(&format!("  removed administrative: {}\n", join(&m.removed_privileged)));
        }
        if !m.removed_comm.is_empty() {
            output.push_str(&format!("  removed communicate: {}\n", join(&m.removed_comm)));
        }
        if !m.channel_overrides.is_empty() {
            output.push_str(&format!("  channel overrides: {}\n", join(&m.channel_overrides)));
        }
        match m.restore_due_at {
            Some(due) if due > now => {
                output.push_str(&format!("  restore in {}\n", age(now, due)));
            }
            Some(_) => output.push_str("  restore overdue (next sweep)\n"),
            None => {}
        }
    }

    for lock in &conflict.voice_locks {
        let remaining = if lock.expires_at > now {
            format!("expires in {}", age(now, lock.expires_at))
        } else {
            "expired (next sweep)".to_string()
        };
        output.push_str(&format!(
            "\nVoice lock: {} on channel {}, {}\n",
            lock.party, lock.channel, remaining
        ));
    }
    output
}

fn join<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
