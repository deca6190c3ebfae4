#![doc = include_str!("../README.md")]

/// Articles and the `Post` trait the engine consumes
pub mod article;
mod client;
/// NNTP command builders and response parsers
pub mod commands;
mod config;
mod error;
/// Bounded FIFO/LIFO queue with deferred admission
pub mod queue;
mod response;
/// Debt based rate limiting
pub mod throttle;
/// Bounded queue with delayed visibility
pub mod timer_queue;
mod uploader;

pub use article::{Article, ArticleBuilder, Post};
pub use client::{
    ConnectionState, ConnectionStats, NntpConnection, Request, RequestKind, RequestStep,
};
pub use commands::GroupInfo;
pub use config::{
    CheckConfig, PostMethod, PostTimeoutAction, ServerConfig, SkipErrors, SkippableError,
    ThrottleConfig, UploadConfig,
};
pub use error::{ErrorKind, NntpError, Phase, Result, UploadError};
pub use queue::{Admission, BoundedQueue};
pub use response::{NntpResponse, codes};
pub use throttle::ThrottleQueue;
pub use timer_queue::TimerQueue;
pub use uploader::{UploadEvent, UploadStatsSnapshot, UploadSummary, Uploader};
