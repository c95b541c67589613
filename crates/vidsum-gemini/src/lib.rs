//! Gemini adapter: credential pooling, resumable uploads, and the
//! content-generation call used for chunk analysis.
//!
//! This crate provides:
//! - [`CredentialPool`] - least-loaded key selection with concurrency caps
//!   and rate-limit cooldowns
//! - [`FileUploader`] - resumable, bounded-memory streaming upload plus
//!   wait-for-ready polling
//! - [`GenerateClient`] - one analysis call per chunk, with fenced and
//!   truncated JSON recovery
//! - [`build_chunk_prompt`] - the chunk-scoped prompt

pub mod client;
pub mod credentials;
pub mod error;
pub mod prompt;
pub mod repair;
pub mod upload;

pub use client::{parse_analysis, GenerateClient};
pub use credentials::{CredentialPool, PoolConfig, PoolStatus, PooledCredential};
pub use error::{GeminiError, GeminiResult};
pub use prompt::build_chunk_prompt;
pub use upload::{max_wait_for_size, FileRef, FileUploader, UploadConfig};
