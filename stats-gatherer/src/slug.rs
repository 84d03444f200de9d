//! # Organization slugs
//!
//! Resolves org ids into the human readable slugs used as metric tags.
//!
//! Lookups go to the organization directory (`GET <directory>/api/orgs/<id>/members`) at most once per org id.
//! Every answer, including failures, is cached on disk and never re-checked. Delete the cache file to force
//! fresh lookups.

use crate::task::OrgId;
use eyre::{
    Context as _,
    Result,
};
use std::{
    collections::BTreeMap,
    future::Future,
    io::Write as _,
    path::{
        Path,
        PathBuf,
    },
    pin::Pin,
    time::Duration,
};

/// Slug cached for orgs the directory could not resolve.
pub const UNKNOWN_SLUG: &str = "unknown";

/// Outcome of a single directory lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugLookup {
    Resolved(String),
    /// The directory answered but knows no slug for the org.
    NotFound,
    /// The directory could not be asked (network error, timeout, unreadable response).
    TransientFailure(String),
}

impl SlugLookup {
    pub fn into_slug(self) -> String {
        match self {
            SlugLookup::Resolved(slug) => slug,
            SlugLookup::NotFound | SlugLookup::TransientFailure(_) => UNKNOWN_SLUG.to_string(),
        }
    }
}

/// Source of org slugs.
pub trait OrgDirectory: Send + Sync {
    fn lookup(&self, org_id: OrgId) -> Pin<Box<dyn Future<Output = SlugLookup> + Send + '_>>;
}

/// [`OrgDirectory`] backed by the directory's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpOrgDirectory {
    client: reqwest::Client,
    base_url: url::Url,
}

impl HttpOrgDirectory {
    pub fn new(base_url: url::Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build directory client")?;
        Ok(Self { client, base_url })
    }

    fn members_url(&self, org_id: OrgId) -> String {
        format!(
            "{}/api/orgs/{org_id}/members",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    async fn fetch(&self, org_id: OrgId) -> SlugLookup {
        let url = self.members_url(org_id);
        debug!(%url, "requesting org members");

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return SlugLookup::TransientFailure(e.to_string()),
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return SlugLookup::NotFound;
        }
        if status != reqwest::StatusCode::OK {
            return SlugLookup::TransientFailure(format!("directory answered {status}"));
        }

        match response.json::<serde_json::Value>().await {
            Ok(body) => slug_from_members(&body).map_or(SlugLookup::NotFound, SlugLookup::Resolved),
            Err(e) => SlugLookup::TransientFailure(e.to_string()),
        }
    }
}

impl OrgDirectory for HttpOrgDirectory {
    fn lookup(&self, org_id: OrgId) -> Pin<Box<dyn Future<Output = SlugLookup> + Send + '_>> {
        Box::pin(self.fetch(org_id))
    }
}

/// The slug of the first member in a members listing (`{"items": [{"orgSlug": ...}, ...]}`).
fn slug_from_members(body: &serde_json::Value) -> Option<String> {
    body.get("items")?
        .as_array()?
        .first()?
        .get("orgSlug")?
        .as_str()
        .map(str::to_string)
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-

/// Org id to slug mapping persisted as a flat JSON object between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SlugCache {
    file: PathBuf,
    slugs: BTreeMap<String, String>,
    /// Set when an unreadable cache file could not be backed up. `save` then leaves it alone.
    keep_existing: bool,
}

impl SlugCache {
    pub fn empty(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            slugs: Default::default(),
            keep_existing: false,
        }
    }

    /// Read the cache. A missing file yields an empty cache.
    ///
    /// Entries whose slug is not a string (older caches stored `null` for orgs without a slug) load as
    /// [`UNKNOWN_SLUG`]. A file that cannot be parsed at all is copied to `<file>.corrupt` and the cache starts
    /// empty. If that copy fails the file is never overwritten by [`SlugCache::save`].
    pub fn load(file: impl AsRef<Path>) -> Self {
        let file = file.as_ref();
        info!(?file, "reading org slug cache");

        if !file.exists() {
            debug!(?file, "no org slug cache found");
            return Self::empty(file);
        }

        let parsed: Result<BTreeMap<String, serde_json::Value>> = std::fs::File::open(file)
            .map_err(eyre::Report::from)
            .and_then(|f| serde_json::from_reader(std::io::BufReader::new(f)).map_err(eyre::Report::from));

        match parsed {
            Ok(entries) => Self {
                file: file.to_path_buf(),
                slugs: entries
                    .into_iter()
                    .map(|(org_id, slug)| match slug {
                        serde_json::Value::String(slug) => (org_id, slug),
                        other => {
                            debug!(%org_id, slug = %other, "cached slug is not a string");
                            (org_id, UNKNOWN_SLUG.to_string())
                        }
                    })
                    .collect(),
                keep_existing: false,
            },
            Err(e) => {
                warn!(?file, error = %e, "ignoring unreadable org slug cache");
                let backup = corrupt_backup_path(file);
                match std::fs::copy(file, &backup) {
                    Ok(_) => {
                        warn!(?backup, "kept a copy of the unreadable org slug cache");
                        Self::empty(file)
                    }
                    Err(e) => {
                        error!(?backup, error = %e, "unable to back up org slug cache, it will not be overwritten");
                        Self {
                            keep_existing: true,
                            ..Self::empty(file)
                        }
                    }
                }
            }
        }
    }

    pub fn get(&self, org_id: OrgId) -> Option<&str> {
        self.slugs.get(&org_id.to_string()).map(String::as_str)
    }

    /// The cached slug, or [`UNKNOWN_SLUG`] for orgs that were never resolved.
    pub fn slug_or_unknown(&self, org_id: OrgId) -> &str {
        self.get(org_id).unwrap_or(UNKNOWN_SLUG)
    }

    pub fn insert(&mut self, org_id: OrgId, slug: impl Into<String>) {
        self.slugs.insert(org_id.to_string(), slug.into());
    }

    pub fn len(&self) -> usize {
        self.slugs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slugs.is_empty()
    }

    /// Replace the cache file with the current mapping.
    ///
    /// The mapping is written to a sibling temp file first and renamed over the target, so readers never see a
    /// half-written cache.
    pub fn save(&self) -> Result<()> {
        if self.keep_existing {
            warn!(file = ?self.file, "leaving unreadable org slug cache in place");
            return Ok(());
        }

        info!(file = ?self.file, entries = self.slugs.len(), "writing org slug cache");
        let dir = match self.file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => std::env::current_dir().context("failed to get current directory")?,
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).context("failed to create temp cache file")?;
        serde_json::to_writer(&mut tmp, &self.slugs).context("failed to serialize org slug cache")?;
        tmp.flush()?;
        tmp.persist(&self.file)
            .map_err(|e| e.error)
            .wrap_err_with(|| format!("failed to write org slug cache to {:?}", self.file))?;
        Ok(())
    }
}

fn corrupt_backup_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-

/// Memoizing front of an [`OrgDirectory`].
pub struct OrgSlugResolver {
    directory: Box<dyn OrgDirectory>,
    cache: SlugCache,
}

impl OrgSlugResolver {
    pub fn new(directory: impl OrgDirectory + 'static, cache: SlugCache) -> Self {
        Self {
            directory: Box::new(directory),
            cache,
        }
    }

    /// Slug for `org_id`, asking the directory only when the cache has no entry yet.
    pub async fn resolve(&mut self, org_id: OrgId) -> String {
        if let Some(slug) = self.cache.get(org_id) {
            return slug.to_string();
        }

        info!(org_id, "getting slug for org");
        let lookup = self.directory.lookup(org_id).await;
        match &lookup {
            SlugLookup::Resolved(slug) => debug!(org_id, slug, "resolved org slug"),
            SlugLookup::NotFound => info!(org_id, "org has no slug in the directory"),
            SlugLookup::TransientFailure(reason) => info!(org_id, %reason, "unable to get org slug"),
        }
        let slug = lookup.into_slug();

        self.cache.insert(org_id, slug.clone());
        slug
    }

    pub fn cache(&self) -> &SlugCache {
        &self.cache
    }

    pub fn into_cache(self) -> SlugCache {
        self.cache
    }
}
