pub mod events;
pub mod files;
pub mod job;
pub mod models;
pub mod prompt;
pub mod runs;
