// ─── Archive Fetcher ───
// Turns an update source into a concrete downloadable artifact, following
// one level of feed or descriptor indirection.

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, Url};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::{cache_busted, no_cache_headers};
use crate::core::operation::{cancellable, check_cancelled};

/// Bodies at or below this size are sniffed for a JSON descriptor.
pub const DESCRIPTOR_SNIFF_LIMIT: u64 = 512 * 1024;

/// Where the next artifact comes from. Immutable for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSource {
    /// The feed document must be fetched every time to discover the artifact.
    Feed { feed_url: String },
    Direct {
        url: String,
        version: Option<String>,
        expected_sha256: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedArtifact {
    pub url: String,
    pub version: Option<String>,
    pub sha256: Option<String>,
}

/// A response the fetcher already opened while probing a direct URL. The
/// transfer engine consumes it instead of issuing a second request.
#[derive(Debug)]
pub enum ArtifactBody {
    Buffered(Vec<u8>),
    Streaming(Response),
    /// Bytes already read while sniffing, followed by the rest of the body.
    Prefixed { prefix: Vec<u8>, response: Response },
}

#[derive(Debug)]
pub struct Resolution {
    pub artifact: ResolvedArtifact,
    pub body: Option<ArtifactBody>,
}

pub struct ArtifactFetcher {
    client: Client,
}

impl ArtifactFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn resolve(
        &self,
        source: &UpdateSource,
        cancel: &CancellationToken,
    ) -> LauncherResult<Resolution> {
        check_cancelled(cancel)?;
        match source {
            UpdateSource::Feed { feed_url } => {
                let artifact = self.resolve_feed(feed_url, cancel).await?;
                Ok(Resolution {
                    artifact,
                    body: None,
                })
            }
            UpdateSource::Direct {
                url,
                version,
                expected_sha256,
            } => {
                self.resolve_direct(url, version.as_deref(), expected_sha256.as_deref(), cancel)
                    .await
            }
        }
    }

    async fn resolve_feed(
        &self,
        feed_url: &str,
        cancel: &CancellationToken,
    ) -> LauncherResult<ResolvedArtifact> {
        info!("Fetching update feed {}", feed_url);
        let request = self
            .client
            .get(cache_busted(feed_url))
            .headers(no_cache_headers());

        let response = cancellable(cancel, async {
            request
                .send()
                .await
                .map_err(|e| LauncherError::Source(format!("feed {feed_url} unreachable: {e}")))
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::Source(format!(
                "feed {feed_url} returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = cancellable(cancel, async {
            response
                .bytes()
                .await
                .map_err(|e| LauncherError::Source(format!("feed {feed_url} body unreadable: {e}")))
        })
        .await?;

        let artifact = parse_feed(&body, feed_url)?;
        info!(
            "Feed resolved to {} (version {:?})",
            artifact.url, artifact.version
        );
        Ok(artifact)
    }

    async fn resolve_direct(
        &self,
        url: &str,
        version: Option<&str>,
        expected_sha256: Option<&str>,
        cancel: &CancellationToken,
    ) -> LauncherResult<Resolution> {
        let configured = ResolvedArtifact {
            url: url.to_string(),
            version: version.map(str::to_string),
            sha256: expected_sha256.map(str::to_string),
        };

        debug!("Probing direct source {}", url);
        let response = cancellable(cancel, async {
            Ok(self.client.get(url).send().await?)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let declared_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(is_json_content_type)
            .unwrap_or(false);
        let looks_like_json = declared_json || url_looks_like_json(url);

        let body = match response.content_length() {
            Some(len) if looks_like_json || len <= DESCRIPTOR_SNIFF_LIMIT => {
                cancellable(cancel, async { Ok(response.bytes().await?.to_vec()) }).await?
            }
            Some(_) => {
                // Large sized binary body: this is the artifact itself.
                return Ok(Resolution {
                    artifact: configured,
                    body: Some(ArtifactBody::Streaming(response)),
                });
            }
            None if looks_like_json => {
                cancellable(cancel, async { Ok(response.bytes().await?.to_vec()) }).await?
            }
            None => match read_prefix(response, DESCRIPTOR_SNIFF_LIMIT, cancel).await? {
                (prefix, Some(response)) => {
                    debug!("Unsized body from {} exceeds the sniff limit", url);
                    return Ok(Resolution {
                        artifact: configured,
                        body: Some(ArtifactBody::Prefixed { prefix, response }),
                    });
                }
                (complete, None) => complete,
            },
        };

        match parse_descriptor(&body, url) {
            Ok(descriptor) => {
                let artifact = ResolvedArtifact {
                    url: descriptor.url,
                    version: descriptor.version.or(configured.version),
                    sha256: descriptor.sha256.or(configured.sha256),
                };
                info!(
                    "Direct source {} is a descriptor pointing at {} (version {:?})",
                    url, artifact.url, artifact.version
                );
                Ok(Resolution {
                    artifact,
                    body: None,
                })
            }
            Err(err) if declared_json => Err(err),
            Err(err) => {
                debug!("Direct source {} is not a descriptor ({})", url, err);
                Ok(Resolution {
                    artifact: configured,
                    body: Some(ArtifactBody::Buffered(body)),
                })
            }
        }
    }
}

/// Read until the body ends or grows past `limit`. The response is handed
/// back only when more of the body remains.
async fn read_prefix(
    mut response: Response,
    limit: u64,
    cancel: &CancellationToken,
) -> LauncherResult<(Vec<u8>, Option<Response>)> {
    let mut prefix = Vec::new();
    loop {
        let chunk = cancellable(cancel, async { Ok(response.chunk().await?) }).await?;
        match chunk {
            Some(chunk) => {
                prefix.extend_from_slice(&chunk);
                if prefix.len() as u64 > limit {
                    return Ok((prefix, Some(response)));
                }
            }
            None => return Ok((prefix, None)),
        }
    }
}

fn is_json_content_type(value: &str) -> bool {
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime == "text/json" || mime.ends_with("+json")
}

fn url_looks_like_json(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase().ends_with(".json"),
        Err(_) => url.to_ascii_lowercase().ends_with(".json"),
    }
}

/// Feed document: `{ url, version?, sha256? | hash? }`.
pub fn parse_feed(body: &[u8], feed_url: &str) -> LauncherResult<ResolvedArtifact> {
    let doc: Value = serde_json::from_slice(body)
        .map_err(|e| LauncherError::Source(format!("feed {feed_url} is not valid JSON: {e}")))?;
    let url = string_field(&doc, "url").ok_or_else(|| {
        LauncherError::Source(format!("feed {feed_url} is missing the required 'url' field"))
    })?;
    Ok(ResolvedArtifact {
        url: absolutize(&url, feed_url)?,
        version: string_field(&doc, "version"),
        sha256: hash_field(&doc),
    })
}

/// Descriptor document: `{ modpack?: { url, version?, sha256|hash }, url?,
/// version?, sha256? }`. The nested `modpack` block wins over top-level keys.
pub fn parse_descriptor(body: &[u8], origin: &str) -> LauncherResult<ResolvedArtifact> {
    let doc: Value = serde_json::from_slice(body).map_err(|e| {
        LauncherError::Source(format!("descriptor at {origin} is not valid JSON: {e}"))
    })?;
    if !doc.is_object() {
        return Err(LauncherError::Source(format!(
            "descriptor at {origin} is not a JSON object"
        )));
    }

    let nested = doc.get("modpack").filter(|v| v.is_object());
    let nested_url = nested.and_then(|m| string_field(m, "url"));

    let (url, version, sha256) = match nested_url {
        Some(url) => {
            let nested = nested.unwrap_or(&Value::Null);
            (
                url,
                string_field(nested, "version").or_else(|| string_field(&doc, "version")),
                hash_field(nested).or_else(|| hash_field(&doc)),
            )
        }
        None => {
            let url = string_field(&doc, "url").ok_or_else(|| {
                LauncherError::Source(format!(
                    "descriptor at {origin} has neither 'modpack.url' nor 'url'"
                ))
            })?;
            (url, string_field(&doc, "version"), hash_field(&doc))
        }
    };

    Ok(ResolvedArtifact {
        url: absolutize(&url, origin)?,
        version,
        sha256,
    })
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    let raw = match value.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!raw.is_empty()).then_some(raw)
}

fn hash_field(value: &Value) -> Option<String> {
    string_field(value, "sha256").or_else(|| string_field(value, "hash"))
}

/// Resolve a possibly relative artifact URL against the document it came from.
fn absolutize(candidate: &str, origin: &str) -> LauncherResult<String> {
    if let Ok(absolute) = Url::parse(candidate) {
        return Ok(absolute.to_string());
    }
    let base = Url::parse(origin)
        .map_err(|e| LauncherError::Source(format!("invalid source URL {origin}: {e}")))?;
    match base.join(candidate) {
        Ok(joined) => Ok(joined.to_string()),
        Err(e) => {
            warn!("Artifact URL {} is unusable: {}", candidate, e);
            Err(LauncherError::Source(format!(
                "artifact URL '{candidate}' from {origin} is invalid: {e}"
            )))
        }
    }
}
