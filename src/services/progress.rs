//! Read-only view over recent download and resize tasks.

use crate::{
    errors::PipelineResult,
    models::task::{TaskKind, TaskSummary},
    services::task_store::TaskStore,
};

/// Tasks of each kind included in the active view.
pub const ACTIVE_WINDOW: i64 = 50;

#[derive(Clone)]
pub struct ProgressReporter {
    tasks: TaskStore,
}

impl ProgressReporter {
    pub fn new(tasks: TaskStore) -> Self {
        Self { tasks }
    }

    /// The latest [`ACTIVE_WINDOW`] downloads and resizes, merged newest first.
    pub async fn get_active_tasks(&self) -> PipelineResult<Vec<TaskSummary>> {
        let mut rows = self.tasks.list_recent(TaskKind::Download, ACTIVE_WINDOW).await?;
        rows.extend(self.tasks.list_recent(TaskKind::Resize, ACTIVE_WINDOW).await?);
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows.into_iter().map(TaskSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        models::{
            album::AlbumIdentity,
            task::{NewTask, TaskContext, TaskStatus, TaskUpdate},
        },
        services::chunk_store::ChunkStore,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn merges_kinds_newest_first_within_window() {
        let (pool, _dir) = db::testing::pool().await;
        let tasks = TaskStore::new(pool.clone());
        let reporter = ProgressReporter::new(tasks.clone());
        assert!(reporter.get_active_tasks().await.unwrap().is_empty());

        for n in 0..(ACTIVE_WINDOW + 5) {
            tasks
                .create(&NewTask {
                    id: format!("d{n}"),
                    context: TaskContext::Download {
                        album_id: "g1".into(),
                        album_name: "Trip".into(),
                    },
                    total: 0,
                })
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let album_id = ChunkStore::new(pool)
            .save_chunks(
                &AlbumIdentity {
                    album_id: "g1".into(),
                    album_name: "Trip".into(),
                    photo_count: 1,
                },
                &[b"x".to_vec()],
            )
            .await
            .unwrap();
        tasks
            .create(&NewTask {
                id: "r1".into(),
                context: TaskContext::Resize {
                    downloaded_album_id: album_id,
                    profile_ids: vec![1],
                    label: "Trip (frame)".into(),
                },
                total: 1,
            })
            .await
            .unwrap();
        tasks
            .update("r1", TaskUpdate::status(TaskStatus::Running, "Resizing 0/1"))
            .await;

        let active = reporter.get_active_tasks().await.unwrap();
        assert_eq!(active.len() as i64, ACTIVE_WINDOW + 1);
        assert_eq!(active[0].id, "r1");
        assert_eq!(active[0].task_type, TaskKind::Resize);
        assert_eq!(active[0].name, "Trip (frame)");
        assert_eq!(active[0].status, TaskStatus::Running);
        assert!(
            active
                .windows(2)
                .all(|pair| pair[0].created_at >= pair[1].created_at)
        );
        assert!(!active.iter().any(|t| t.id == "d0"));
    }
}
