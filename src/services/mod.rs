pub mod archive;
pub mod chunk_store;
pub mod downloader;
pub mod gallery_client;
pub mod letterbox;
pub mod local_files;
pub mod profile_store;
pub mod progress;
pub mod resizer;
pub mod task_store;
