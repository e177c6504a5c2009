//! Whitelist matcher – which live topics get bridged, and in which direction.
//!
//! The persisted whitelist is a JSON object of named groups (usually one per
//! robot):
//!
//! ```json
//! {
//!   "robot1": { "publisher": ["/robot1/cmd_vel"], "subscriber": ["/robot1/pose.*"] }
//! }
//! ```
//!
//! Patterns are regular expressions searched anywhere in the topic name (no
//! implicit anchoring).  Publisher patterns of every group are evaluated
//! before subscriber patterns, and the first matching rule decides a topic's
//! role.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ctxbridge_types::{BridgeError, TopicRole, Transport};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A compiled whitelist pattern and the role it grants.
#[derive(Debug, Clone)]
pub struct WhitelistRule {
    pattern: Regex,
    role: TopicRole,
}

impl WhitelistRule {
    pub fn new(pattern: &str, role: TopicRole) -> Result<Self, BridgeError> {
        let pattern = Regex::new(pattern).map_err(|e| BridgeError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern, role })
    }

    pub fn role(&self) -> TopicRole {
        self.role
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.pattern.is_match(topic)
    }
}

/// Resolved type and role of a whitelisted topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub type_name: String,
    pub role: TopicRole,
}

/// Match `rules`, in order, against `live_topics`.
///
/// A topic is resolved at most once: the first rule that matches it fixes
/// its role, and its type is looked up through `transport` at that moment.
/// Topics whose type cannot be resolved are logged and left out.
pub fn resolve(
    rules: &[WhitelistRule],
    live_topics: &[String],
    transport: &dyn Transport,
) -> BTreeMap<String, TopicSpec> {
    let mut resolved = BTreeMap::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for rule in rules {
        for topic in live_topics {
            if seen.contains(topic.as_str()) || !rule.matches(topic) {
                continue;
            }
            seen.insert(topic.as_str());
            match transport.topic_type(topic) {
                Ok(type_name) => {
                    debug!(topic = %topic, role = %rule.role, pattern = %rule.pattern(), "topic whitelisted");
                    resolved.insert(topic.clone(), TopicSpec { type_name, role: rule.role });
                }
                Err(e) => error!(topic = %topic, error = %e, "cannot resolve topic type"),
            }
        }
    }
    resolved
}

// ---------------------------------------------------------------------------
// Persisted whitelist
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhitelistGroup {
    #[serde(default)]
    pub publisher: Vec<String>,
    #[serde(default)]
    pub subscriber: Vec<String>,
}

impl WhitelistGroup {
    pub fn new(publisher: &[&str], subscriber: &[&str]) -> Self {
        Self {
            publisher: publisher.iter().map(|s| s.to_string()).collect(),
            subscriber: subscriber.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Whitelist {
    groups: BTreeMap<String, WhitelistGroup>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, name: impl Into<String>, group: WhitelistGroup) -> Self {
        self.groups.insert(name.into(), group);
        self
    }

    /// Load from `path`.  A missing file yields an empty whitelist.
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        if !path.exists() {
            warn!(path = %path.display(), "whitelist not found, nothing will be bridged");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read whitelist at {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| BridgeError::Config(format!("Failed to parse whitelist at {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), BridgeError> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize whitelist: {e}")))?;
        fs::write(path, raw)
            .map_err(|e| BridgeError::Config(format!("Failed to write whitelist at {}: {e}", path.display())))
    }

    pub fn groups(&self) -> &BTreeMap<String, WhitelistGroup> {
        &self.groups
    }

    /// Insert or replace whole groups.
    pub fn add_groups(&mut self, additions: BTreeMap<String, WhitelistGroup>) {
        self.groups.extend(additions);
    }

    /// Remove individual patterns from existing groups.  Unknown groups and
    /// patterns are ignored.
    pub fn remove_topics(&mut self, deletions: &BTreeMap<String, WhitelistGroup>) {
        for (name, removed) in deletions {
            if let Some(group) = self.groups.get_mut(name) {
                group.publisher.retain(|p| !removed.publisher.contains(p));
                group.subscriber.retain(|p| !removed.subscriber.contains(p));
            }
        }
    }

    /// Compile every pattern, publishers first.  Invalid patterns are logged
    /// and skipped.
    pub fn rules(&self) -> Vec<WhitelistRule> {
        let publishers = self
            .groups
            .values()
            .flat_map(|g| g.publisher.iter().map(|p| (p, TopicRole::Publisher)));
        let subscribers = self
            .groups
            .values()
            .flat_map(|g| g.subscriber.iter().map(|p| (p, TopicRole::Subscriber)));
        publishers
            .chain(subscribers)
            .filter_map(|(pattern, role)| match WhitelistRule::new(pattern, role) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(error = %e, "skipping whitelist pattern");
                    None
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TopicMatcher
// ---------------------------------------------------------------------------

/// Caches the live topic list and the resolved mapping between calls.
pub struct TopicMatcher {
    transport: Arc<dyn Transport>,
    path: Option<PathBuf>,
    whitelist: Whitelist,
    entries: Vec<String>,
    resolved: Option<BTreeMap<String, TopicSpec>>,
}

impl TopicMatcher {
    pub fn new(transport: Arc<dyn Transport>, whitelist: Whitelist) -> Self {
        Self {
            transport,
            path: None,
            whitelist,
            entries: Vec::new(),
            resolved: None,
        }
    }

    /// Matcher backed by a whitelist file, which [`restore`][Self::restore]
    /// and [`save`][Self::save] use.
    pub fn from_file(transport: Arc<dyn Transport>, path: impl Into<PathBuf>) -> Result<Self, BridgeError> {
        let path = path.into();
        let whitelist = Whitelist::load(&path)?;
        Ok(Self {
            path: Some(path),
            ..Self::new(transport, whitelist)
        })
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// The whitelisted topics.
    ///
    /// `refresh` re-reads the live topic list from the transport and
    /// re-resolves; `restore` additionally reloads the whitelist from disk
    /// first.  Without either, the mapping from the previous call is
    /// returned (it is computed on first use).
    pub fn system_topics(&mut self, refresh: bool, restore: bool) -> Result<BTreeMap<String, TopicSpec>, BridgeError> {
        if restore {
            self.restore()?;
        }
        if refresh || restore || self.resolved.is_none() {
            self.entries = self.transport.published_topics()?;
            let rules = self.whitelist.rules();
            self.resolved = Some(resolve(&rules, &self.entries, self.transport.as_ref()));
        }
        Ok(self.resolved.clone().unwrap_or_default())
    }

    /// Live topics seen by the last refresh.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn add_groups(&mut self, additions: BTreeMap<String, WhitelistGroup>) {
        self.whitelist.add_groups(additions);
    }

    pub fn remove_topics(&mut self, deletions: &BTreeMap<String, WhitelistGroup>) {
        self.whitelist.remove_topics(deletions);
    }

    /// Drop `topic` from the cached mapping until the next refresh.
    pub fn forget(&mut self, topic: &str) {
        if let Some(resolved) = self.resolved.as_mut() {
            resolved.remove(topic);
        }
    }

    /// Reload the whitelist from its file, discarding in-memory edits.
    pub fn restore(&mut self) -> Result<(), BridgeError> {
        if let Some(path) = &self.path {
            self.whitelist = Whitelist::load(path)?;
        }
        Ok(())
    }

    /// Persist the in-memory whitelist to its file.
    pub fn save(&self) -> Result<(), BridgeError> {
        match &self.path {
            Some(path) => self.whitelist.save(path),
            None => Err(BridgeError::Config("whitelist has no backing file".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalTransport;
    use ctxbridge_types::{PublisherOptions, TransportPublisher};

    fn transport_with(topics: &[(&str, &str)]) -> (LocalTransport, Vec<Box<dyn TransportPublisher>>) {
        let transport = LocalTransport::default();
        let handles = topics
            .iter()
            .map(|(topic, ty)| transport.advertise(topic, ty, PublisherOptions::default()).unwrap())
            .collect();
        (transport, handles)
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let (transport, _handles) = transport_with(&[("/robot1/cmd", "geometry_msgs/Twist")]);
        let live = transport.published_topics().unwrap();

        let rules = vec![
            WhitelistRule::new("/robot1/.*", TopicRole::Publisher).unwrap(),
            WhitelistRule::new("/robot1/cmd", TopicRole::Subscriber).unwrap(),
        ];
        let resolved = resolve(&rules, &live, &transport);
        assert_eq!(resolved["/robot1/cmd"].role, TopicRole::Publisher);
        assert_eq!(resolved["/robot1/cmd"].type_name, "geometry_msgs/Twist");

        let reversed: Vec<WhitelistRule> = rules.into_iter().rev().collect();
        let resolved = resolve(&reversed, &live, &transport);
        assert_eq!(resolved["/robot1/cmd"].role, TopicRole::Subscriber);
    }

    #[tokio::test]
    async fn patterns_search_without_anchoring_and_skip_unmatched() {
        let (transport, _handles) = transport_with(&[
            ("/robot1/pose", "geometry_msgs/Pose"),
            ("/robot2/pose", "geometry_msgs/Pose"),
            ("/rosout", "std_msgs/String"),
        ]);
        let live = transport.published_topics().unwrap();
        let rules = vec![WhitelistRule::new("pose", TopicRole::Subscriber).unwrap()];
        let resolved = resolve(&rules, &live, &transport);
        assert_eq!(
            resolved.keys().cloned().collect::<Vec<_>>(),
            vec!["/robot1/pose".to_string(), "/robot2/pose".to_string()]
        );
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let err = WhitelistRule::new("(unclosed", TopicRole::Publisher).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPattern { .. }));

        let whitelist = Whitelist::new().with_group("r", WhitelistGroup::new(&["(bad", "/ok"], &[]));
        let rules = whitelist.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].pattern(), "/ok");
    }

    #[test]
    fn publisher_patterns_precede_subscriber_patterns() {
        let whitelist = Whitelist::new()
            .with_group("a", WhitelistGroup::new(&[], &["/a/.*"]))
            .with_group("b", WhitelistGroup::new(&["/b/cmd"], &[]));
        let roles: Vec<TopicRole> = whitelist.rules().iter().map(WhitelistRule::role).collect();
        assert_eq!(roles, vec![TopicRole::Publisher, TopicRole::Subscriber]);
    }

    #[test]
    fn add_and_remove_edit_groups() {
        let mut whitelist = Whitelist::new().with_group("robot1", WhitelistGroup::new(&["/robot1/cmd"], &["/robot1/pose"]));

        let mut additions = BTreeMap::new();
        additions.insert("robot2".to_string(), WhitelistGroup::new(&["/robot2/cmd"], &[]));
        whitelist.add_groups(additions);
        assert_eq!(whitelist.groups().len(), 2);

        let mut deletions = BTreeMap::new();
        deletions.insert("robot1".to_string(), WhitelistGroup::new(&[], &["/robot1/pose", "/never"]));
        deletions.insert("ghost".to_string(), WhitelistGroup::new(&["/x"], &[]));
        whitelist.remove_topics(&deletions);
        assert_eq!(whitelist.groups()["robot1"], WhitelistGroup::new(&["/robot1/cmd"], &[]));
    }

    #[test]
    fn whitelist_file_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("whitelist.json");
        assert_eq!(Whitelist::load(&path).unwrap(), Whitelist::default());

        std::fs::write(&path, r#"{"robot1": {"publisher": ["/robot1/cmd_vel"]}}"#).unwrap();
        let loaded = Whitelist::load(&path).unwrap();
        assert_eq!(loaded.groups()["robot1"].subscriber, Vec::<String>::new());

        let edited = loaded.with_group("robot2", WhitelistGroup::new(&[], &["/robot2/.*"]));
        edited.save(&path).unwrap();
        assert_eq!(Whitelist::load(&path).unwrap(), edited);
    }

    #[test]
    fn malformed_whitelist_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("whitelist.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(Whitelist::load(&path), Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn matcher_caches_until_refreshed_and_restores_from_disk() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("whitelist.json");
        Whitelist::new()
            .with_group("robot1", WhitelistGroup::new(&[], &["/robot1/.*"]))
            .save(&path)
            .unwrap();

        let transport = LocalTransport::default();
        let _pose = transport
            .advertise("/robot1/pose", "geometry_msgs/Pose", PublisherOptions::default())
            .unwrap();
        let mut matcher = TopicMatcher::from_file(Arc::new(transport.clone()), &path).unwrap();
        assert_eq!(matcher.system_topics(false, false).unwrap().len(), 1);

        let _odom = transport
            .advertise("/robot1/odom", "geometry_msgs/Pose", PublisherOptions::default())
            .unwrap();
        assert_eq!(matcher.system_topics(false, false).unwrap().len(), 1);
        assert_eq!(matcher.system_topics(true, false).unwrap().len(), 2);

        let mut deletions = BTreeMap::new();
        deletions.insert("robot1".to_string(), WhitelistGroup::new(&[], &["/robot1/.*"]));
        matcher.remove_topics(&deletions);
        assert!(matcher.system_topics(true, false).unwrap().is_empty());

        let restored = matcher.system_topics(true, true).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored["/robot1/odom"].role, TopicRole::Subscriber);
    }
}
