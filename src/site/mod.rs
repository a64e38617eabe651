//! Mapping between the URL space under the virtual path and the files
//! under the physical root.

pub mod files;
pub mod listing;

use std::path::{Path, PathBuf};

use anyhow::Context;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::config::Config;
use crate::http::request::Request;

/// Tried in order when a directory is requested with a trailing slash.
pub const DEFAULT_DOCUMENTS: [&str; 4] = ["default.htm", "default.html", "index.htm", "index.html"];

/// Bytes escaped in a redirect `Location`; non-ASCII is always escaped.
const LOCATION_ESCAPES: &AsciiSet = &CONTROLS.add(b' ');

/// What to do with a GET that names a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryRoute {
    /// The path is not an existing directory.
    NotDirectory,
    /// Missing trailing slash: redirect to the given location.
    Redirect(String),
    /// Serve this default document path instead.
    DefaultDocument(String),
    /// A directory with no default document.
    Directory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Site {
    virtual_path: String,
    physical_root: PathBuf,
    directory_listing: bool,
    require_authentication: bool,
}

impl Site {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let physical_root = std::path::absolute(&cfg.site.physical_path).with_context(|| {
            format!(
                "cannot resolve site root {}",
                cfg.site.physical_path.display()
            )
        })?;

        Ok(Self::new(&cfg.server.virtual_path, physical_root)
            .with_directory_listing(cfg.site.directory_listing)
            .with_authentication(cfg.site.require_authentication))
    }

    pub fn new(virtual_path: &str, physical_root: impl Into<PathBuf>) -> Self {
        let trimmed = virtual_path.trim().trim_matches('/');
        Self {
            virtual_path: format!("/{trimmed}"),
            physical_root: physical_root.into(),
            directory_listing: true,
            require_authentication: false,
        }
    }

    pub fn with_directory_listing(mut self, enabled: bool) -> Self {
        self.directory_listing = enabled;
        self
    }

    pub fn with_authentication(mut self, required: bool) -> Self {
        self.require_authentication = required;
        self
    }

    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    pub fn physical_root(&self) -> &Path {
        &self.physical_root
    }

    pub fn directory_listing(&self) -> bool {
        self.directory_listing
    }

    pub fn requires_authentication(&self) -> bool {
        self.require_authentication
    }

    /// Whether `path` lies under the virtual path, compared ASCII
    /// case-insensitively.
    pub fn is_in_app(&self, path: &str) -> bool {
        if self.virtual_path == "/" {
            return path.starts_with('/');
        }

        let prefix = self.virtual_path.as_bytes();
        let bytes = path.as_bytes();
        if bytes.len() < prefix.len() || !bytes[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return false;
        }
        bytes.len() == prefix.len() || bytes[prefix.len()] == b'/'
    }

    /// Translates a decoded URL path to a path under the physical root.
    pub fn map_path(&self, path: &str) -> PathBuf {
        let relative = if self.virtual_path == "/" {
            path
        } else {
            path.get(self.virtual_path.len()..).unwrap_or("")
        };

        relative
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.physical_root.clone(), |mut mapped, segment| {
                mapped.push(segment);
                mapped
            })
    }

    /// Decides how a GET for `req` is routed when it names a directory.
    pub async fn route_directory(&self, req: &Request) -> DirectoryRoute {
        let dir = self.map_path(&req.path);
        if !is_dir(&dir).await {
            return DirectoryRoute::NotDirectory;
        }

        if !req.path.ends_with('/') {
            return DirectoryRoute::Redirect(redirect_location(&format!("{}/", req.path)));
        }

        for name in DEFAULT_DOCUMENTS {
            if is_file(&dir.join(name)).await {
                return DirectoryRoute::DefaultDocument(format!("{}{}", req.path, name));
            }
        }

        DirectoryRoute::Directory(dir)
    }

    /// URL of the parent of a directory path, or `None` when that parent
    /// falls outside the virtual path.
    pub fn parent_link(&self, path: &str) -> Option<String> {
        if path.len() <= 1 {
            return None;
        }
        let trimmed = path.strip_suffix('/').unwrap_or(path);
        let parent = match trimmed.rfind('/') {
            Some(idx) if idx > 0 => &path[..idx],
            _ => "/",
        };
        self.is_in_app(parent).then(|| parent.to_string())
    }
}

/// Percent-encodes a redirect target.
pub fn redirect_location(path: &str) -> String {
    utf8_percent_encode(path, LOCATION_ESCAPES).to_string()
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_dir())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}
