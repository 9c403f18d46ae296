//! Gemini image client, render orchestration and the background render worker.

pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod render;
pub mod transport;
pub mod worker;

pub use client::{GeminiClient, GenerateResponse, ImageClient};
pub use config::{ClientConfig, ConfigOverrides, TransportPreference};
pub use error::ClientError;
pub use render::{RenderOutput, RenderProgress, Renderer};
pub use transport::{InlineFile, TransportKind};
pub use worker::{RenderController, RenderMessage, RenderWorker};
