//! Algebras - AI-powered localization automation
//!
//! Keeps translated resource files (JSON, Android XML, gettext PO) in sync with
//! their source language: detects missing and outdated strings, translates them
//! through a rate-limited AI backend with a persistent cache, and merges the
//! results back into the target files.

pub mod cache;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod formats;
pub mod history;
pub mod merge;
pub mod summary;
pub mod translate;
pub mod workflow;
