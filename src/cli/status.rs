use super::list::age;
use super::load_config;
use cordon::conflict::{now_ms, read_snapshot, Conflict};
use std::path::Path;

/// Summarize the persisted conflict store
///
/// Reports:
/// - Active conflict count
/// - Parties currently under enforcement
/// - Outstanding mutations
/// - Next and overdue restorations
/// - Oldest conflict
pub fn execute(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let snapshot = read_snapshot(&config.store.path)?;
    let conflicts: Vec<Conflict> = snapshot.into_values().collect();

    println!("Cordon Store Status");
    println!("Store: {}", config.store.path.display());
    println!(
        "Communities configured: {} ({} in warning-only mode)",
        config.communities.len(),
        config
            .communities
            .iter()
            .filter(|c| c.mute_grant.is_none())
            .count()
    );
    print!("{}", render(&conflicts, now_ms()));
    Ok(())
}

fn render(conflicts: &[Conflict], now: u64) -> String {
    let enforced: usize = conflicts
        .iter()
        .map(|c| c.parties().iter().filter(|p| c.under_enforcement(**p)).count())
        .sum();
    let outstanding: usize = conflicts.iter().map(Conflict::outstanding_mutations).sum();
    let due: Vec<u64> = conflicts
        .iter()
        .flat_map(|c| c.mutations.values().filter_map(|m| m.restore_due_at))
        .collect();
    let overdue = due.iter().filter(|d| **d <= now).count();

    let mut output = format!("Active conflicts: {}\n", conflicts.len());
    output.push_str(&format!("Parties under enforcement: {}\n", enforced));
    output.push_str(&format!("Outstanding mutations: {}\n", outstanding));
    if let Some(next) = due.iter().filter(|d| **d > now).min() {
        output.push_str(&format!("Next restoration in {}\n", age(now, *next)));
    }
    if overdue > 0 {
        output.push_str(&format!("Overdue restorations: {}\n", overdue));
    }
    if let Some(oldest) = conflicts.iter().min_by_key(|c| c.created_at) {
        output.push_str(&format!(
            "Oldest conflict: {} ({} old)\n",
            oldest.id,
            age(oldest.created_at, now)
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordon::config::CordonConfig;
    use cordon::conflict::ConflictStore;
    use cordon::platform::{CommunityId, GrantId, PartyId};
    use tempfile::TempDir;

    #[test]
    fn test_render_summary() {
        let mut a = Conflict::new(CommunityId(1), PartyId(1), PartyId(2), PartyId(9), "x", 0);
        a.mutations_mut(PartyId(1)).removed_comm.insert(GrantId(5));
        a.mutations_mut(PartyId(1)).restore_due_at = Some(120_000);
        let b = Conflict::new(CommunityId(1), PartyId(3), PartyId(4), PartyId(9), "y", 30_000);

        let text = render(&[a, b], 60_000);

        assert!(text.contains("Active conflicts: 2"));
        assert!(text.contains("Parties under enforcement: 1"));
        assert!(text.contains("Outstanding mutations: 1"));
        assert!(text.contains("Next restoration in 1m"));
        assert!(text.contains("Oldest conflict: 1:2 (1m old)"));
    }

    #[test]
    fn test_render_empty_store() {
        assert_eq!(
            render(&[], 0),
            "Active conflicts: 0\nParties under enforcement: 0\nOutstanding mutations: 0\n"
        );
    }

    #[tokio::test]
    async fn test_status_execute_over_flushed_store() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        let store_path = temp.path().join("conflicts.cbor");
        CordonConfig::create_default(&config_path, &store_path).unwrap();

        let mut store = ConflictStore::open(&store_path, std::time::Duration::from_millis(10)).unwrap();
        store.create(CommunityId(1), PartyId(1), PartyId(2), PartyId(9), "x", 0);
        store.flush().await.unwrap();

        assert!(execute(&config_path).is_ok());
    }
}
