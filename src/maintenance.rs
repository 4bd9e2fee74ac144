use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// One maintenance pass: drop dead listen channels, then rewrite the WAL
/// if enough appends have piled up. Returns whether a compaction ran.
pub async fn run_once(engine: &Engine, threshold: u64) -> bool {
    engine.notify.prune();
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "WAL compaction not due");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that periodically compacts the WAL.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        run_once(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maintenance.wal");
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();

        let branch = engine
            .create_branch(Branch {
                id: Ulid::new(),
                name: "Downtown Branch".into(),
                address: "123 Main St".into(),
                phone: None,
                email: None,
                operating_hours: None,
            })
            .await
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        for h in 9..12 {
            engine
                .create_slot(TimeSlot::new(
                    Ulid::new(),
                    branch.id,
                    date,
                    NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(h, 30, 0).unwrap(),
                    2,
                ))
                .await
                .unwrap();
        }

        assert!(!run_once(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 4);
        assert!(run_once(&engine, 4).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        drop(engine);
        let restored = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(restored.list_branches().len(), 1);
        assert_eq!(restored.slots.len(), 3);
    }
}
