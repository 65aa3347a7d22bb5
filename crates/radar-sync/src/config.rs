//! On-disk configuration: the source registry, the candidate profile, the resume.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use radar_adapters::{FeedFetcher, FixtureFetcher, SourceFetcher};
use radar_core::CandidateProfile;
use radar_storage::HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Fixture,
    Feed,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceConfig {
    pub fn fixture(name: &str, interval_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            interval_secs,
            enabled: true,
            mode: SourceMode::Fixture,
            endpoint: None,
            notes: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    /// The default board set; LinkedIn is opt-in because it rate-limits hard.
    pub fn builtin(with_linkedin: bool) -> Self {
        let mut sources = vec![
            SourceConfig::fixture("indeed", 3),
            SourceConfig::fixture("zip_recruiter", 5),
            SourceConfig::fixture("google", 8),
        ];
        if with_linkedin {
            sources.push(SourceConfig::fixture("linkedin", 30));
        }
        Self { sources }
    }

    /// Parse a `sources.yaml`. `Ok(None)` when the file does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no source registry; using built-in sources");
                return Ok(None);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let registry: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing YAML {}", path.display()))?;
        for source in &registry.sources {
            if source.name.trim().is_empty() {
                bail!("{}: source with an empty name", path.display());
            }
            if source.interval_secs == 0 {
                bail!("{}: source {} has a zero interval", path.display(), source.name);
            }
        }
        Ok(Some(registry))
    }

    pub fn get(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Keep only `name`, enabling it even if the registry had it disabled.
    pub fn restrict_to(&mut self, name: &str) -> anyhow::Result<()> {
        let Some(mut source) = self.sources.iter().find(|s| s.name == name).cloned() else {
            let known: Vec<&str> = self.sources.iter().map(|s| s.name.as_str()).collect();
            bail!("unknown source {name:?}; known sources: {}", known.join(", "));
        };
        source.enabled = true;
        self.sources = vec![source];
        Ok(())
    }

    /// Override the poll interval of one source. Unknown names are an error.
    pub fn set_interval(&mut self, name: &str, interval_secs: u64) -> anyhow::Result<()> {
        if interval_secs == 0 {
            bail!("interval for {name} must be at least one second");
        }
        match self.sources.iter_mut().find(|s| s.name == name) {
            Some(source) => {
                source.interval_secs = interval_secs;
                Ok(())
            }
            None => bail!("cannot set interval for unknown source {name:?}"),
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Instantiate the fetcher for one registry entry.
pub fn build_fetcher(
    source: &SourceConfig,
    fixtures_dir: &Path,
    http: &HttpClient,
) -> anyhow::Result<Box<dyn SourceFetcher>> {
    match source.mode {
        SourceMode::Fixture => Ok(Box::new(FixtureFetcher::new(&source.name, fixtures_dir))),
        SourceMode::Feed => {
            let Some(endpoint) = source.endpoint.as_deref().filter(|e| !e.trim().is_empty()) else {
                bail!("feed source {} has no endpoint", source.name);
            };
            Ok(Box::new(FeedFetcher::new(&source.name, endpoint, http.clone())))
        }
    }
}

/// `config.yaml`: thresholds plus the candidate context the scorer sees.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub min_score: i64,
    pub save_threshold: Option<i64>,
    pub goals: String,
    pub background: String,
    pub pay: String,
    pub location: String,
    pub evaluation_factors: String,
}

impl ProfileConfig {
    /// A missing file yields defaults with a warning; a broken one is an error.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => serde_yaml::from_str(&text)
                .with_context(|| format!("parsing YAML {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config not found; using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn into_profile(self, resume: String) -> CandidateProfile {
        CandidateProfile {
            resume,
            goals: self.goals,
            background: self.background,
            pay: self.pay,
            location: self.location,
            evaluation_factors: self.evaluation_factors,
        }
    }
}

/// Resume text, trimmed. Missing or unreadable files give an empty resume.
pub async fn load_resume(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => text.trim().to_string(),
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "resume unreadable");
            }
            String::new()
        }
    }
}

/// Conventional file locations under a config directory.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub dir: PathBuf,
}

impl ConfigPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn profile(&self) -> PathBuf {
        self.dir.join("config.yaml")
    }

    pub fn sources(&self) -> PathBuf {
        self.dir.join("sources.yaml")
    }

    pub fn resume(&self) -> PathBuf {
        self.dir.join("resume.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radar_storage::HttpClientConfig;
    use tempfile::tempdir;

    #[test]
    fn builtin_registry_has_default_intervals() {
        let registry = SourceRegistry::builtin(false);
        let pairs: Vec<_> = registry
            .sources
            .iter()
            .map(|s| (s.name.as_str(), s.interval_secs))
            .collect();
        assert_eq!(pairs, vec![("indeed", 3), ("zip_recruiter", 5), ("google", 8)]);
        assert_eq!(SourceRegistry::builtin(true).get("linkedin").map(|s| s.interval_secs), Some(30));
    }

    #[tokio::test]
    async fn registry_loads_yaml_with_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sources.yaml");
        std::fs::write(
            &path,
            "sources:\n  - name: indeed\n    interval_secs: 4\n  - name: remote_feed\n    interval_secs: 60\n    mode: feed\n    endpoint: http://localhost:8080/jobs\n  - name: google\n    interval_secs: 8\n    enabled: false\n",
        )
        .expect("write");

        let registry = SourceRegistry::load(&path).await.expect("load").expect("present");
        assert_eq!(registry.sources.len(), 3);
        assert_eq!(registry.sources[0].mode, SourceMode::Fixture);
        assert!(registry.sources[0].enabled);
        assert_eq!(registry.sources[1].mode, SourceMode::Feed);
        let enabled: Vec<_> = registry.enabled().map(|s| s.name.as_str()).collect();
        assert_eq!(enabled, vec!["indeed", "remote_feed"]);
    }

    #[tokio::test]
    async fn missing_registry_is_none_and_zero_interval_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sources.yaml");
        assert!(SourceRegistry::load(&path).await.expect("load").is_none());

        std::fs::write(&path, "sources:\n  - name: indeed\n    interval_secs: 0\n").expect("write");
        assert!(SourceRegistry::load(&path).await.is_err());
    }

    #[test]
    fn restrict_and_override_by_name() {
        let mut registry = SourceRegistry::builtin(false);
        registry.set_interval("google", 20).expect("known source");
        assert!(registry.set_interval("monster", 20).is_err());
        assert!(registry.set_interval("google", 0).is_err());

        assert!(registry.clone().restrict_to("monster").is_err());
        registry.restrict_to("google").expect("restrict");
        assert_eq!(registry.sources.len(), 1);
        assert_eq!(registry.sources[0].interval_secs, 20);
    }

    #[test]
    fn feed_sources_need_an_endpoint() {
        let http = HttpClient::new(HttpClientConfig::default()).expect("client");
        let dir = Path::new("fixtures");
        let fixture = build_fetcher(&SourceConfig::fixture("indeed", 3), dir, &http).expect("fixture");
        assert_eq!(fixture.source_name(), "indeed");

        let mut feed = SourceConfig::fixture("remote", 3);
        feed.mode = SourceMode::Feed;
        assert!(build_fetcher(&feed, dir, &http).is_err());
        feed.endpoint = Some("http://localhost/jobs".into());
        assert_eq!(build_fetcher(&feed, dir, &http).expect("feed").source_name(), "remote");
    }

    #[tokio::test]
    async fn profile_config_and_resume_load() {
        let dir = tempdir().expect("tempdir");
        let paths = ConfigPaths::new(dir.path());

        let defaults = ProfileConfig::load(&paths.profile()).await.expect("defaults");
        assert_eq!(defaults, ProfileConfig::default());
        assert_eq!(load_resume(&paths.resume()).await, "");

        std::fs::write(
            paths.profile(),
            "min_score: 55\nsave_threshold: 75\ngoals: staff IC\npay: $180k\n",
        )
        .expect("write config");
        std::fs::write(paths.resume(), "\n  Systems engineer, 10 years  \n").expect("write resume");

        let config = ProfileConfig::load(&paths.profile()).await.expect("config");
        assert_eq!(config.min_score, 55);
        assert_eq!(config.save_threshold, Some(75));
        let profile = config.into_profile(load_resume(&paths.resume()).await);
        assert_eq!(profile.resume, "Systems engineer, 10 years");
        assert_eq!(profile.goals, "staff IC");
        assert!(profile.has_resume());

        std::fs::write(paths.profile(), "min_score: [oops").expect("write broken");
        assert!(ProfileConfig::load(&paths.profile()).await.is_err());
    }
}
