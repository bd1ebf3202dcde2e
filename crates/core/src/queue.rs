use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use thiserror::Error;

/// Characters escaped inside a queue-name component. Escaping `%` and the
/// `/` separator keeps the encoding bijective.
const COMPONENT: &AsciiSet = &CONTROLS.add(b'%').add(b'/');

/// Identity of one job queue: a work category (`queue_type`) inside an
/// isolated namespace (`tenant`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId {
    pub queue_type: String,
    pub tenant: String,
}

/// Errors produced when decoding a canonical queue name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueIdError {
    /// The encoded name has no `/` separator.
    #[error("queue name {0:?} has no type/tenant separator")]
    MissingSeparator(String),

    /// A percent-decoded component is not valid UTF-8.
    #[error("queue name {0:?} contains invalid percent-encoding")]
    InvalidEncoding(String),
}

impl QueueId {
    pub fn new(queue_type: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            queue_type: queue_type.into(),
            tenant: tenant.into(),
        }
    }

    /// Render the canonical encoded queue name: `pct(type) "/" pct(tenant)`.
    pub fn encode(&self) -> String {
        format!(
            "{}/{}",
            utf8_percent_encode(&self.queue_type, COMPONENT),
            utf8_percent_encode(&self.tenant, COMPONENT)
        )
    }

    /// Parse a canonical encoded queue name back into its components.
    ///
    /// The split is on the *first* `/`; a literal `/` inside either
    /// component is always percent-encoded by [`encode`](Self::encode).
    pub fn decode(encoded: &str) -> Result<Self, QueueIdError> {
        let (ty, tenant) = encoded
            .split_once('/')
            .ok_or_else(|| QueueIdError::MissingSeparator(encoded.to_owned()))?;

        let decode = |part: &str| {
            percent_decode_str(part)
                .decode_utf8()
                .map(|s| s.into_owned())
                .map_err(|_| QueueIdError::InvalidEncoding(encoded.to_owned()))
        };

        Ok(Self {
            queue_type: decode(ty)?,
            tenant: decode(tenant)?,
        })
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.queue_type, self.tenant)
    }
}

/// The aggregator's readiness map: which queues currently hold work,
/// keyed by type then tenant, with the unix timestamp of the last cycle
/// that saw them ready.
///
/// Backed by `BTreeMap`s so iteration order is deterministic, which keeps
/// selection reproducible under a seeded RNG.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadyMap {
    map: BTreeMap<String, BTreeMap<String, i64>>,
}

impl ReadyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &QueueId, last_ready: i64) {
        self.map
            .entry(id.queue_type.clone())
            .or_default()
            .insert(id.tenant.clone(), last_ready);
    }

    /// Drop a single queue; empty type buckets are removed with it.
    pub fn remove(&mut self, id: &QueueId) {
        if let Some(tenants) = self.map.get_mut(&id.queue_type) {
            tenants.remove(&id.tenant);
            if tenants.is_empty() {
                self.map.remove(&id.queue_type);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of (type, tenant) entries.
    pub fn len(&self) -> usize {
        self.map.values().map(BTreeMap::len).sum()
    }

    /// Every type currently present.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// The tenant entries for one type, if any.
    pub fn tenants_for(&self, queue_type: &str) -> Option<&BTreeMap<String, i64>> {
        self.map.get(queue_type)
    }
}

impl FromIterator<(QueueId, i64)> for ReadyMap {
    fn from_iter<I: IntoIterator<Item = (QueueId, i64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (id, ts) in iter {
            map.insert(&id, ts);
        }
        map
    }
}
