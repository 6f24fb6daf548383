//! trawl-core
//!
//! Orchestration core for the trawl crawler: a durable task queue, a generic
//! stage runner and the crawl-state / watermark bookkeeping that lets every
//! stage resume where it stopped.
//!
//! # Modules
//! - **domain**: ids, task records, crawl state, watermarks, scraped records, errors
//! - **ports**: storage and collaborator seams (TaskStore, CrawlStateStore, PostFeed, ...)
//! - **queue**: TaskQueue over a TaskStore plus per-stage retry/backoff policy
//! - **typed**: typed task params, the Stage trait and the worker registry
//! - **app**: worker loop, crawl tracker, enricher, scheduler, builder
//! - **impls**: in-memory and SQLite stores
//! - **config**: environment configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;
