use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// One compactor pass. Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    debug!(appends, threshold, "compacting journal");
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("journal compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SchedulingPolicy;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::wal::Wal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("carebook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(
            path.clone(),
            Arc::new(NotifyHub::new()),
            SchedulingPolicy::default(),
        )
        .unwrap();
        engine
            .register_nanny(Nanny {
                id: 1,
                name: "Ana".into(),
                status: NannyStatus::Active,
                available: true,
            })
            .await
            .unwrap();
        for i in 0..5 {
            engine.set_nanny_available(1, i % 2 == 0).await.unwrap();
        }

        assert!(!compact_if_needed(&engine, 100).await);
        assert_eq!(engine.wal_appends_since_compact().await, 6);

        assert!(compact_if_needed(&engine, 6).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Registration snapshot carries the latest availability.
        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::NannyRegistered { nanny } => assert!(nanny.available),
            other => panic!("expected NannyRegistered, got {other:?}"),
        }
    }
}
