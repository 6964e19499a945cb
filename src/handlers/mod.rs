pub mod album_handlers;
pub mod health_handlers;
pub mod profile_handlers;
pub mod task_handlers;
