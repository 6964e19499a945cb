//! Album download: gallery assets to local files to a chunked payload.

use std::{sync::Arc, time::Duration};
use uuid::Uuid;

use crate::{
    errors::{ErrorKind, PipelineError, PipelineResult},
    models::{
        album::{AlbumIdentity, AssetRef},
        task::{NewTask, TaskContext, TaskStatus, TaskUpdate},
    },
    services::{
        archive::{AlbumImage, MANIFEST_NAME, pack_album},
        chunk_store::{ChunkStore, split_into_chunks},
        gallery_client::GalleryClient,
        local_files::{LocalFiles, unique_file_names, write_atomic},
        task_store::TaskStore,
    },
};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct DownloadOrchestrator {
    tasks: TaskStore,
    chunks: ChunkStore,
    gallery: Arc<dyn GalleryClient>,
    files: LocalFiles,
    chunk_size: usize,
    fetch_attempts: u32,
    retry_delay: Duration,
}

/// A download task that has been recorded but not yet run.
#[derive(Debug, Clone)]
pub struct PlannedDownload {
    pub task_id: String,
    pub album_id: String,
    pub album_name: String,
}

impl DownloadOrchestrator {
    pub fn new(
        tasks: TaskStore,
        chunks: ChunkStore,
        gallery: Arc<dyn GalleryClient>,
        files: LocalFiles,
        chunk_size: usize,
        fetch_attempts: u32,
    ) -> Self {
        Self {
            tasks,
            chunks,
            gallery,
            files,
            chunk_size: chunk_size.max(1),
            fetch_attempts: fetch_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Base delay between fetch attempts; doubles after each failure.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Record a download task and run it in the background. Returns the task id.
    pub async fn start_download(
        &self,
        album_id: &str,
        album_name: Option<&str>,
    ) -> PipelineResult<String> {
        let planned = self.plan(album_id, album_name).await?;
        let task_id = planned.task_id.clone();
        let this = self.clone();
        tokio::spawn(async move {
            // Outcome is recorded on the task.
            let _ = this.run(&planned).await;
        });
        Ok(task_id)
    }

    /// Create the `pending` task. The album name defaults to the synced
    /// gallery name, then to the album id.
    pub async fn plan(&self, album_id: &str, album_name: Option<&str>) -> PipelineResult<PlannedDownload> {
        let album_id = album_id.trim();
        if album_id.is_empty() {
            return Err(PipelineError::Invalid("album id is empty".into()));
        }
        let cached = self.chunks.gallery_album(album_id).await?;
        let album_name = album_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| cached.as_ref().map(|album| album.name.clone()))
            .unwrap_or_else(|| album_id.to_string());

        let task_id = Uuid::new_v4().to_string();
        self.tasks
            .create(&NewTask {
                id: task_id.clone(),
                context: TaskContext::Download {
                    album_id: album_id.to_string(),
                    album_name: album_name.clone(),
                },
                total: cached.map_or(0, |album| album.photo_count),
            })
            .await?;

        Ok(PlannedDownload {
            task_id,
            album_id: album_id.to_string(),
            album_name,
        })
    }

    /// Run a planned download to a terminal state. Returns the downloaded album id.
    pub async fn run(&self, planned: &PlannedDownload) -> PipelineResult<i64> {
        let task_id = planned.task_id.as_str();
        tracing::info!(task_id, album = %planned.album_name, "download started");

        match self.download(planned).await {
            Ok((album_db_id, photo_count)) => {
                self.tasks
                    .update(
                        task_id,
                        TaskUpdate::status(
                            TaskStatus::Completed,
                            format!("Completed: {} photos stored", photo_count),
                        ),
                    )
                    .await;
                tracing::info!(task_id, album_db_id, photo_count, "download completed");
                Ok(album_db_id)
            }
            Err(err) => {
                self.tasks
                    .update(
                        task_id,
                        TaskUpdate::status(TaskStatus::Failed, format!("Failed: {}", err)),
                    )
                    .await;
                tracing::error!(task_id, error = %err, "download failed");
                Err(err)
            }
        }
    }

    async fn download(&self, planned: &PlannedDownload) -> PipelineResult<(i64, i64)> {
        let task_id = planned.task_id.as_str();
        let assets = self
            .with_retries(&planned.album_id, || self.gallery.list_assets(&planned.album_id))
            .await?;
        let total = assets.len() as i64;

        self.tasks
            .update(
                task_id,
                TaskUpdate::status(TaskStatus::Running, format!("Downloading 0/{}", total))
                    .with_total(total),
            )
            .await;

        let names = unique_file_names(
            &[MANIFEST_NAME],
            assets.iter().map(|a| (a.id.as_str(), a.filename.as_str())),
        );
        let dir = self.files.download_dir(&planned.album_id);
        let mut images = Vec::with_capacity(assets.len());

        for (index, (asset, name)) in assets.iter().zip(names).enumerate() {
            let bytes = self.materialize(asset, &dir.join(&name)).await?;
            images.push(AlbumImage {
                asset_id: asset.id.clone(),
                filename: name,
                orientation: asset.orientation,
                bytes,
            });

            let done = index as i64 + 1;
            self.tasks
                .update(
                    task_id,
                    TaskUpdate::progress(done, format!("Downloading {}/{}: {}", done, total, asset.filename))
                        .with_total(total),
                )
                .await;
        }

        self.tasks
            .update(task_id, TaskUpdate::progress(total, "Storing album").with_total(total))
            .await;

        let chunk_size = self.chunk_size;
        let chunks = tokio::task::spawn_blocking(move || {
            pack_album(&images).map(|payload| split_into_chunks(&payload, chunk_size))
        })
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))??;

        let album_db_id = self
            .chunks
            .save_chunks(
                &AlbumIdentity {
                    album_id: planned.album_id.clone(),
                    album_name: planned.album_name.clone(),
                    photo_count: total,
                },
                &chunks,
            )
            .await?;
        Ok((album_db_id, total))
    }

    /// Local copy if one exists, otherwise fetch and keep a copy on disk.
    async fn materialize(&self, asset: &AssetRef, path: &std::path::Path) -> PipelineResult<Vec<u8>> {
        if let Some(bytes) = self.files.read_existing(path).await? {
            tracing::debug!(asset_id = %asset.id, path = %path.display(), "using existing local copy");
            return Ok(bytes);
        }
        let bytes = self
            .with_retries(&asset.id, || self.gallery.fetch_asset_bytes(&asset.id))
            .await?;
        write_atomic(path, &bytes).await?;
        tracing::debug!(asset_id = %asset.id, size = bytes.len(), "asset fetched");
        Ok(bytes)
    }

    /// Retry connectivity failures up to `fetch_attempts` times with doubling delay.
    async fn with_retries<T, F, Fut>(&self, what: &str, mut op: F) -> PipelineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = PipelineResult<T>>,
    {
        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.kind() == ErrorKind::Connectivity && attempt < self.fetch_attempts => {
                    tracing::warn!(attempt, what, error = %err, "gallery request failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::FakeGallery, *};
    use crate::{db, services::archive::unpack_album};

    fn named(id: &str, filename: &str, bytes: &[u8]) -> (AssetRef, Vec<u8>) {
        (
            AssetRef {
                id: id.into(),
                filename: filename.into(),
                orientation: None,
            },
            bytes.to_vec(),
        )
    }

    async fn stored_images(chunks: &ChunkStore, album_db_id: i64) -> Vec<crate::services::archive::AlbumImage> {
        unpack_album(&chunks.read_chunks(album_db_id).await.unwrap().concat()).unwrap()
    }

    fn asset(n: usize) -> (AssetRef, Vec<u8>) {
        (
            AssetRef {
                id: format!("asset-{n}"),
                filename: format!("IMG_{n:04}.jpg"),
                orientation: if n % 2 == 0 { Some(1) } else { None },
            },
            format!("photo-bytes-{n}").into_bytes(),
        )
    }

    struct Harness {
        orchestrator: DownloadOrchestrator,
        tasks: TaskStore,
        chunks: ChunkStore,
        gallery: Arc<FakeGallery>,
        files: LocalFiles,
        _db_dir: tempfile::TempDir,
        _storage: tempfile::TempDir,
    }

    async fn harness(gallery: FakeGallery, chunk_size: usize) -> Harness {
        let (pool, db_dir) = db::testing::pool().await;
        let storage = tempfile::tempdir().unwrap();
        let tasks = TaskStore::new(pool.clone());
        let chunks = ChunkStore::new(pool);
        let files = LocalFiles::new(storage.path());
        let gallery = Arc::new(gallery);
        let orchestrator = DownloadOrchestrator::new(
            tasks.clone(),
            chunks.clone(),
            gallery.clone(),
            files.clone(),
            chunk_size,
            3,
        )
        .with_retry_delay(Duration::ZERO);
        Harness {
            orchestrator,
            tasks,
            chunks,
            gallery,
            files,
            _db_dir: db_dir,
            _storage: storage,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let gallery = FakeGallery::with_assets((1..=10).map(asset).collect()).fail("asset-7", 2);
        let h = harness(gallery, 64).await;

        let planned = h.orchestrator.plan("album-1", Some("Trip")).await.unwrap();
        let album_db_id = h.orchestrator.run(&planned).await.unwrap();

        let task = h.tasks.get(&planned.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!((task.progress, task.total), (10, 10));
        assert!(task.completed_at.is_some());
        assert_eq!(h.gallery.fetch_count(), 12);

        let album = h.chunks.get_album(album_db_id).await.unwrap();
        assert_eq!(album.photo_count, 10);
        assert!(album.chunk_count > 1);
        assert!(h.chunks.is_complete(&album).await.unwrap());

        let payload = h.chunks.read_chunks(album_db_id).await.unwrap().concat();
        let images = unpack_album(&payload).unwrap();
        assert_eq!(images.len(), 10);
        assert_eq!(images[6].asset_id, "asset-7");
        assert_eq!(images[6].bytes, b"photo-bytes-7");
        assert_eq!(images[1].orientation, Some(1));
        assert_eq!(
            h.chunks
                .chunk_photo_counts(album_db_id)
                .await
                .unwrap()
                .iter()
                .sum::<i64>(),
            10
        );
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_task_and_keep_progress() {
        let gallery = FakeGallery::with_assets((1..=5).map(asset).collect()).fail("asset-4", 10);
        let h = harness(gallery, 1024).await;

        let planned = h.orchestrator.plan("album-1", Some("Trip")).await.unwrap();
        let err = h.orchestrator.run(&planned).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);

        let task = h.tasks.get(&planned.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress, 3);
        assert!(task.current_step.unwrap().starts_with("Failed"));
        assert_eq!(h.chunks.stats().await.unwrap().download_count, 0);

        // Already-fetched assets stay on disk.
        let dir = h.files.download_dir("album-1");
        assert!(dir.join("IMG_0003.jpg").exists());
        assert!(!dir.join("IMG_0004.jpg").exists());
    }

    #[tokio::test]
    async fn rerun_reuses_local_copies() {
        let gallery = FakeGallery::with_assets((1..=4).map(asset).collect());
        let h = harness(gallery, 1024).await;

        let first = h.orchestrator.plan("album-1", Some("Trip")).await.unwrap();
        h.orchestrator.run(&first).await.unwrap();
        assert_eq!(h.gallery.fetch_count(), 4);

        let second = h.orchestrator.plan("album-1", Some("Trip")).await.unwrap();
        h.orchestrator.run(&second).await.unwrap();
        assert_eq!(h.gallery.fetch_count(), 4);
        assert_eq!(
            h.tasks.get(&second.task_id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn asset_listing_failure_fails_task() {
        let mut gallery = FakeGallery::with_assets(vec![asset(1)]);
        gallery.list_fails = true;
        let h = harness(gallery, 1024).await;

        let planned = h.orchestrator.plan("album-1", None).await.unwrap();
        assert_eq!(planned.album_name, "album-1");
        assert!(h.orchestrator.run(&planned).await.is_err());

        let task = h.tasks.get(&planned.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress, 0);
    }

    #[tokio::test]
    async fn background_download_reaches_completed() {
        let gallery = FakeGallery::with_assets((1..=3).map(asset).collect());
        let h = harness(gallery, 1024).await;

        let task_id = h.orchestrator.start_download("album-1", Some("Trip")).await.unwrap();
        let mut last_progress = 0;
        let task = loop {
            let task = h.tasks.get(&task_id).await.unwrap();
            assert!(task.progress >= last_progress);
            last_progress = task.progress;
            if task.status.is_terminal() {
                break task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 3);
    }

    #[tokio::test]
    async fn same_named_albums_keep_their_own_copies() {
        let gallery_a = FakeGallery::with_assets(vec![named("x1", "IMG_0001.jpg", b"album-one-photo")]);
        let h = harness(gallery_a, 1024).await;
        let first = h.orchestrator.plan("album-a", Some("Vacation")).await.unwrap();
        h.orchestrator.run(&first).await.unwrap();

        let gallery_b = FakeGallery::with_assets(vec![named("y1", "IMG_0001.jpg", b"album-two-photo")]);
        let other = DownloadOrchestrator::new(
            h.tasks.clone(),
            h.chunks.clone(),
            Arc::new(gallery_b),
            h.files.clone(),
            1024,
            3,
        )
        .with_retry_delay(Duration::ZERO);
        let second = other.plan("album-b", Some("Vacation")).await.unwrap();
        let album_db_id = other.run(&second).await.unwrap();

        let images = stored_images(&h.chunks, album_db_id).await;
        assert_eq!(images[0].asset_id, "y1");
        assert_eq!(images[0].bytes, b"album-two-photo");
        assert_ne!(h.files.download_dir("album-a"), h.files.download_dir("album-b"));
    }

    #[tokio::test]
    async fn colliding_file_names_still_download() {
        let gallery = FakeGallery::with_assets(vec![
            named("b", "x_b.jpg", b"first"),
            named("a", "x.jpg", b"second"),
            named("b2", "x.jpg", b"third"),
            named("m", "manifest.json", b"fourth"),
        ]);
        let h = harness(gallery, 1024).await;

        let planned = h.orchestrator.plan("album-1", Some("Trip")).await.unwrap();
        let album_db_id = h.orchestrator.run(&planned).await.unwrap();

        let images = stored_images(&h.chunks, album_db_id).await;
        let stored: Vec<(&str, &str, &[u8])> = images
            .iter()
            .map(|i| (i.asset_id.as_str(), i.filename.as_str(), i.bytes.as_slice()))
            .collect();
        assert_eq!(
            stored,
            vec![
                ("b", "x_b.jpg", &b"first"[..]),
                ("a", "x.jpg", &b"second"[..]),
                ("b2", "x_b2.jpg", &b"third"[..]),
                ("m", "manifest_m.json", &b"fourth"[..]),
            ]
        );
    }

    #[tokio::test]
    async fn busy_store_does_not_abort_download() {
        let (pool, db_dir) = db::testing::pool().await;
        let impatient = db::testing::impatient_pool(&db_dir, Duration::from_millis(20)).await;
        let storage = tempfile::tempdir().unwrap();
        let tasks = TaskStore::new(impatient.clone());
        let chunks = ChunkStore::new(impatient);
        let orchestrator = DownloadOrchestrator::new(
            tasks.clone(),
            chunks.clone(),
            Arc::new(FakeGallery::with_assets((1..=3).map(asset).collect())),
            LocalFiles::new(storage.path()),
            1024,
            3,
        )
        .with_retry_delay(Duration::ZERO);
        let planned = orchestrator.plan("album-1", Some("Trip")).await.unwrap();

        let mut lock = pool.begin().await.unwrap();
        sqlx::query("UPDATE tasks SET label = label")
            .execute(&mut *lock)
            .await
            .unwrap();
        let running = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let planned = planned.clone();
            async move { orchestrator.run(&planned).await }
        });
        // Long enough for the first task update to exhaust its attempts.
        tokio::time::sleep(Duration::from_millis(600)).await;
        lock.rollback().await.unwrap();

        let album_db_id = running.await.unwrap().unwrap();
        assert_eq!(stored_images(&chunks, album_db_id).await.len(), 3);
        let task = tasks.get(&planned.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!((task.progress, task.total), (3, 3));
    }

    #[tokio::test]
    async fn empty_album_id_is_rejected() {
        let h = harness(FakeGallery::default(), 1024).await;
        let err = h.orchestrator.plan("  ", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Invalid(_)));
    }
}
