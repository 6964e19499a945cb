//! Letterbox resize of a downloaded album against a set of profiles.
//!
//! Each image is one unit of blocking work: probe, decode once, render every
//! applicable profile. Images run in parallel up to the worker count, and the
//! task's progress advances once per image as results come back.

use futures::{StreamExt, stream};
use serde::Serialize;
use std::{
    io::{Cursor, Write},
    path::PathBuf,
    sync::Arc,
};
use uuid::Uuid;

use crate::{
    errors::{PipelineError, PipelineResult},
    models::{
        album::DownloadedAlbum,
        profile::ResizeProfile,
        task::{Artifact, NewTask, TaskContext, TaskStatus, TaskUpdate},
    },
    services::{
        archive::{AlbumImage, pack_files, unpack_album},
        chunk_store::ChunkStore,
        letterbox,
        local_files::{LocalFiles, output_dir_name, safe_component, write_atomic_blocking},
        profile_store::ProfileStore,
        task_store::TaskStore,
    },
};

/// Output counts of one resize run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResizeStats {
    /// Images with every applicable output in place.
    pub processed: i64,
    /// Outputs written by this run.
    pub rendered: i64,
    /// Outputs left from an earlier run.
    pub existing: i64,
    /// Images that could not be decoded or written.
    pub failed: i64,
    /// File names of the failed images, in completion order.
    pub failed_images: Vec<String>,
}

impl ResizeStats {
    /// Final `current_step` text, naming the images that failed.
    fn summary(&self) -> String {
        let mut step = format!(
            "Completed: {} images processed, {} failed",
            self.processed, self.failed
        );
        if !self.failed_images.is_empty() {
            step.push_str(": ");
            step.push_str(&self.failed_images.join(", "));
        }
        step
    }
}

/// One profile and where its outputs go.
#[derive(Debug, Clone)]
struct RenderTarget {
    profile: ResizeProfile,
    entry_prefix: String,
    dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default)]
struct ImageOutcome {
    rendered: i64,
    existing: i64,
}

#[derive(Debug, Clone)]
pub struct PlannedResize {
    pub task_id: String,
    pub album: DownloadedAlbum,
    pub profiles: Vec<ResizeProfile>,
}

#[derive(Clone)]
pub struct ResizeEngine {
    tasks: TaskStore,
    chunks: ChunkStore,
    profiles: ProfileStore,
    files: LocalFiles,
    workers: usize,
}

impl ResizeEngine {
    pub fn new(
        tasks: TaskStore,
        chunks: ChunkStore,
        profiles: ProfileStore,
        files: LocalFiles,
        workers: usize,
    ) -> Self {
        Self {
            tasks,
            chunks,
            profiles,
            files,
            workers: workers.max(1),
        }
    }

    /// Record a resize task and run it in the background. Returns the task id.
    pub async fn start_resize(
        &self,
        downloaded_album_id: i64,
        profile_ids: &[i64],
    ) -> PipelineResult<String> {
        let planned = self.plan(downloaded_album_id, profile_ids).await?;
        let task_id = planned.task_id.clone();
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.run(&planned).await;
        });
        Ok(task_id)
    }

    /// Resolve the album and profiles and create the `pending` task.
    pub async fn plan(
        &self,
        downloaded_album_id: i64,
        profile_ids: &[i64],
    ) -> PipelineResult<PlannedResize> {
        let mut ids = Vec::with_capacity(profile_ids.len());
        for &id in profile_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Err(PipelineError::Invalid("no resize profiles selected".into()));
        }

        let album = match self.chunks.get_album(downloaded_album_id).await {
            Ok(album) => album,
            Err(PipelineError::NotFound { .. }) => {
                return Err(PipelineError::Integrity(format!(
                    "downloaded album {} does not exist",
                    downloaded_album_id
                )));
            }
            Err(err) => return Err(err),
        };
        let profiles = self.profiles.get_many(&ids).await?;

        let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        let label = format!("{} ({})", album.album_name, names.join(", "));

        let task_id = Uuid::new_v4().to_string();
        self.tasks
            .create(&NewTask {
                id: task_id.clone(),
                context: TaskContext::Resize {
                    downloaded_album_id: album.id,
                    profile_ids: ids,
                    label,
                },
                total: album.photo_count,
            })
            .await?;

        Ok(PlannedResize {
            task_id,
            album,
            profiles,
        })
    }

    /// Run a planned resize to a terminal state.
    pub async fn run(&self, planned: &PlannedResize) -> PipelineResult<ResizeStats> {
        let task_id = planned.task_id.as_str();
        tracing::info!(
            task_id,
            album = %planned.album.album_name,
            profiles = planned.profiles.len(),
            "resize started"
        );

        match self.resize(planned).await {
            Ok((stats, artifact)) => {
                let size = artifact.data.len();
                let update = TaskUpdate {
                    status: Some(TaskStatus::Completed),
                    current_step: Some(stats.summary()),
                    artifact: Some(artifact),
                    processed_count: Some(stats.processed),
                    failed_count: Some(stats.failed),
                    ..TaskUpdate::default()
                };
                self.tasks.update(task_id, update).await;
                tracing::info!(
                    task_id,
                    processed = stats.processed,
                    rendered = stats.rendered,
                    existing = stats.existing,
                    failed = stats.failed,
                    artifact_size = size,
                    "resize completed"
                );
                Ok(stats)
            }
            Err(err) => {
                self.tasks
                    .update(
                        task_id,
                        TaskUpdate::status(TaskStatus::Failed, format!("Failed: {}", err)),
                    )
                    .await;
                tracing::error!(task_id, error = %err, "resize failed");
                Err(err)
            }
        }
    }

    async fn resize(&self, planned: &PlannedResize) -> PipelineResult<(ResizeStats, Artifact)> {
        let task_id = planned.task_id.as_str();
        let album = &planned.album;

        self.tasks
            .update(task_id, TaskUpdate::status(TaskStatus::Running, "Loading album"))
            .await;

        if !self.chunks.is_complete(album).await? {
            return Err(PipelineError::Integrity(format!(
                "downloaded album {} is missing chunks",
                album.id
            )));
        }
        let payload = self.chunks.read_chunks(album.id).await?.concat();
        let images = blocking(move || unpack_album(&payload)).await?;

        let total = images.len() as i64;
        self.tasks
            .update(
                task_id,
                TaskUpdate::progress(0, format!("Resizing 0/{}", total)).with_total(total),
            )
            .await;

        let targets: Arc<Vec<RenderTarget>> = Arc::new(
            planned
                .profiles
                .iter()
                .map(|profile| RenderTarget {
                    entry_prefix: output_dir_name(&album.album_name, &profile.name),
                    dir: self.files.output_dir(&album.album_name, &profile.name),
                    profile: profile.clone(),
                })
                .collect(),
        );

        let mut results = stream::iter(images.into_iter().map(|image| {
            let targets = Arc::clone(&targets);
            async move {
                let name = image.filename.clone();
                let outcome = blocking(move || render_image(&image, &targets)).await;
                (name, outcome)
            }
        }))
        .buffer_unordered(self.workers);

        let mut stats = ResizeStats::default();
        let mut done = 0;
        while let Some((name, outcome)) = results.next().await {
            done += 1;
            match outcome {
                Ok(outcome) => {
                    stats.processed += 1;
                    stats.rendered += outcome.rendered;
                    stats.existing += outcome.existing;
                    tracing::debug!(task_id, image = %name, rendered = outcome.rendered, "image done");
                }
                Err(err) => {
                    stats.failed += 1;
                    tracing::warn!(task_id, image = %name, error = %err, "image skipped");
                    stats.failed_images.push(name.clone());
                }
            }
            let update = TaskUpdate {
                processed_count: Some(stats.processed),
                failed_count: Some(stats.failed),
                ..TaskUpdate::progress(done, format!("Resizing {}/{}: {}", done, total, name))
            };
            self.tasks.update(task_id, update).await;
        }
        drop(results);

        if stats.processed == 0 && stats.failed > 0 {
            return Err(PipelineError::Worker(format!(
                "all {} images failed to process",
                stats.failed
            )));
        }

        self.tasks
            .update(task_id, TaskUpdate::progress(done, "Packaging outputs"))
            .await;
        let artifact = blocking(move || package_outputs(&targets)).await?;
        Ok((stats, artifact))
    }
}

/// Run blocking work on the blocking pool.
async fn blocking<T, F>(work: F) -> PipelineResult<T>
where
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
}

/// Render one image for every target that accepts its orientation, skipping
/// outputs already on disk. The image is decoded at most once.
fn render_image(image: &AlbumImage, targets: &[RenderTarget]) -> PipelineResult<ImageOutcome> {
    let file_name = safe_component(&image.filename);
    let (width, height) = letterbox::probe(&file_name, &image.bytes, image.orientation)?;
    let horizontal = letterbox::is_horizontal(width, height);

    let mut outcome = ImageOutcome::default();
    let mut pending = Vec::new();
    for target in targets.iter().filter(|t| t.profile.accepts(horizontal)) {
        let path = target.dir.join(&file_name);
        if path.exists() {
            outcome.existing += 1;
        } else {
            pending.push((target, path));
        }
    }
    if pending.is_empty() {
        return Ok(outcome);
    }

    let source = letterbox::decode(&file_name, &image.bytes, image.orientation)?;
    for (target, path) in pending {
        let canvas = letterbox::render(
            &source,
            target.profile.width as u32,
            target.profile.height as u32,
        );
        let mut encoded = Cursor::new(Vec::new());
        letterbox::encode(&canvas, letterbox::output_format(&path), &mut encoded)
            .map_err(|e| PipelineError::Worker(format!("encoding {}: {}", file_name, e)))?;
        write_atomic_blocking(&path, |file| file.write_all(encoded.get_ref()))?;
        outcome.rendered += 1;
    }
    Ok(outcome)
}

/// Zip every output file under the targets' directories, including ones from
/// earlier runs.
fn package_outputs(targets: &[RenderTarget]) -> PipelineResult<Artifact> {
    let mut files = Vec::new();
    for target in targets {
        let entries = match std::fs::read_dir(&target.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_file() && !name.starts_with(".tmp-") {
                names.push(name);
            }
        }
        names.sort();
        for name in names {
            let path = target.dir.join(&name);
            files.push((format!("{}/{}", target.entry_prefix, name), path));
        }
    }

    let data = pack_files(&files)?;
    let etag = format!("{:x}", md5::compute(&data));
    Ok(Artifact { data, etag })
}
