// Static file sub-handler
// GET-only; serves files under a fixed root. No caching layer — every hit
// goes to the filesystem.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::Sub;
use crate::query::Query;
use crate::wire::{boiler, Method};

/// Serves static files from a directory. Mount with `Server::add_sub`;
/// the stripped query path is resolved under the root, with an empty path
/// defaulting to `index.html`. Anything that walks outside the root is a
/// 404.
pub struct StaticSub {
    root: PathBuf,
}

impl StaticSub {
    pub fn new(root: impl Into<PathBuf>) -> StaticSub {
        StaticSub { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let trimmed = path.trim_start_matches('/');
        let relative = if trimmed.is_empty() {
            Path::new("index.html")
        } else {
            Path::new(trimmed)
        };
        // Reject parent-directory escapes before touching the filesystem.
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl Sub for StaticSub {
    async fn serve(&self, query: Query) {
        if query.request().method != Method::Get {
            let _ = query.resume_and_write(boiler::not_found()).await;
            return;
        }
        let Some(full) = self.resolve(query.path()) else {
            let _ = query.resume_and_write(boiler::not_found()).await;
            return;
        };
        match tokio::fs::read(&full).await {
            Ok(data) => {
                let resp = boiler::ok_with_body(data)
                    .with_header("Content-Type", content_type(&full));
                let _ = query.resume_and_write(resp).await;
            }
            Err(e) => {
                debug!(path = %full.display(), error = %e, "static file miss");
                let _ = query.resume_and_write(boiler::not_found()).await;
            }
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
