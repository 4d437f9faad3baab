use std::collections::HashMap;
use std::sync::RwLock;

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};

use evalctl_types::Language;

use crate::error::DispatchError;

/// A SHA-like tag (12+ hex chars) is preferred over `latest`, matching the
/// "prefer SHA-like tags over `latest`" rule (§4.6 "Image resolution").
fn is_sha_like(tag: &str) -> bool {
    tag.len() >= 12 && tag.chars().all(|c| c.is_ascii_hexdigit())
}

/// Picks the "most recent" of two candidate tags for the same language,
/// preferring a SHA-like tag over `latest` when both are present.
fn prefer(current: &str, candidate: &str) -> bool {
    match (is_sha_like(current), is_sha_like(candidate)) {
        (false, true) => true,
        (true, false) => false,
        _ => candidate > current,
    }
}

/// Per-language image tag cache, refreshed by scanning node images for the
/// configured name prefix (§4.6). Cheap to clone; the inner map is shared.
pub struct ImageCache {
    prefix: String,
    tags: RwLock<HashMap<String, String>>,
}

impl ImageCache {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            tags: RwLock::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, language: &Language) -> Option<String> {
        self.tags.read().expect("image cache lock poisoned").get(language.as_str()).cloned()
    }

    /// Rescans node images, called on startup and on a periodic refresh
    /// (§4.6). Does not fail the caller on transient API errors; a stale
    /// cache is preferable to blocking `Execute`.
    pub async fn refresh(&self, client: kube::Client) -> Result<(), DispatchError> {
        let nodes: Api<Node> = Api::all(client);
        let list = nodes.list(&ListParams::default()).await?;

        let mut discovered: HashMap<String, String> = HashMap::new();
        for node in list.items {
            let Some(status) = node.status else { continue };
            let Some(images) = status.images else { continue };
            for image in images {
                for name in image.names.unwrap_or_default() {
                    let Some((repo, tag)) = name.rsplit_once(':') else { continue };
                    if !repo.contains(&self.prefix) {
                        continue;
                    }
                    let Some(language) = language_from_repo(repo) else { continue };
                    discovered
                        .entry(language)
                        .and_modify(|current| {
                            if prefer(current, tag) {
                                *current = tag.to_string();
                            }
                        })
                        .or_insert_with(|| tag.to_string());
                }
            }
        }

        if !discovered.is_empty() {
            *self.tags.write().expect("image cache lock poisoned") = discovered;
        }
        Ok(())
    }
}

fn language_from_repo(repo: &str) -> Option<String> {
    repo.rsplit('/').next().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha_like_tag_preferred_over_latest() {
        assert!(prefer("latest", "a1b2c3d4e5f6"));
        assert!(!prefer("a1b2c3d4e5f6", "latest"));
    }

    #[test]
    fn newer_sha_like_tag_wins_lexicographically() {
        assert!(prefer("aaaaaaaaaaaa", "bbbbbbbbbbbb"));
    }
}
