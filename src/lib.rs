pub mod error;
pub mod model;
pub mod storage;
pub mod geo;
pub mod select;
pub mod index;
pub mod gate;
pub mod export;
pub mod server;
pub mod api;
pub mod parser;
pub mod manager;

use std::fmt;
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geo::great_circle_km;
use crate::index::IdentityIndex;
use crate::model::{Nearest, Neighbor, PositionRecord};
use crate::select::Strategy;
use crate::storage::PositionLog;

/// Position store plus proximity query engine.
///
/// Stateless per call apart from the identity index, which only ever
/// mirrors what is on disk. Share it as `Arc<NearbyDb>`.
pub struct NearbyDb {
    log: PositionLog,
    index: RwLock<IdentityIndex>,
    strategy: Strategy,
}

impl fmt::Debug for NearbyDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NearbyDb")
        .field("path", &self.log.file_path)
        .field("strategy", &self.strategy)
        .finish()
    }
}

impl NearbyDb {
    pub fn new(storage_path: &Path, strategy: Strategy, strict_durability: bool) -> Self {
        Self {
            log: PositionLog::new(storage_path, strict_durability),
            index: RwLock::new(IdentityIndex::new()),
            strategy,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn path(&self) -> &Path {
        &self.log.file_path
    }

    /// Append a position for `identity`, stamped with the current time.
    pub fn record(&self, identity: &str, latitude: f64, longitude: f64) -> Result<PositionRecord> {
        if !model::is_valid_identity(identity) {
            return Err(Error::InvalidIdentity(identity.to_string()));
        }
        let record = PositionRecord::new(identity, latitude, longitude, now_ms());
        self.log.append(&record)?;
        debug!(identity, latitude, longitude, "recorded position");
        Ok(record)
    }

    /// `recorded_at` of the first record for `identity`, if any.
    pub fn first_seen(&self, identity: &str) -> Result<Option<u64>> {
        Ok(self.first_record(identity)?.map(|r| r.recorded_at))
    }

    /// First record for `identity` in append order, resolved through the index.
    pub fn first_record(&self, identity: &str) -> Result<Option<PositionRecord>> {
        let current = self.log.len()?;
        let cached = {
            let index = self.index.read().map_err(|_| Error::Poisoned("identity index"))?;
            (index.indexed_len() == current).then(|| (index.first_offset(identity), index.indexed_len()))
        };
        let (offset, tail) = match cached {
            Some(hit) => hit,
            None => {
                let mut index = self.index.write().map_err(|_| Error::Poisoned("identity index"))?;
                index.refresh(&self.log)?;
                (index.first_offset(identity), index.indexed_len())
            }
        };

        if let Some(offset) = offset {
            return Ok(self.log.read_at(offset)?.filter(|r| r.identity == identity));
        }
        // Only an unterminated last line can sit past the indexed prefix
        Ok(self.log.read_at(tail)?.filter(|r| r.identity == identity))
    }

    /// Every well-formed record in append order, read fresh from disk.
    pub fn all_records(&self) -> Result<Vec<PositionRecord>> {
        Ok(self.log.scan()?)
    }

    pub fn count(&self) -> Result<usize> {
        let mut total = 0;
        self.log.for_each(|_, _| {
            total += 1;
            true
        })?;
        Ok(total)
    }

    /// The `k` records nearest to `identity`'s first recorded position.
    ///
    /// `None` when `identity` has never recorded a position. Every record
    /// carrying the caller's identity is excluded from the candidates.
    pub fn nearest(&self, identity: &str, k: usize) -> Result<Option<Nearest>> {
        let records = self.all_records()?;
        let total = records.len();

        let origin = match records.iter().find(|r| r.identity == identity) {
            Some(r) => (r.latitude, r.longitude),
            None => return Ok(None),
        };

        let candidates = records
        .into_iter()
        .filter(|r| r.identity != identity)
        .map(|r| Neighbor {
            distance_km: great_circle_km(origin.0, origin.1, r.latitude, r.longitude),
            identity: r.identity,
            latitude: r.latitude,
            longitude: r.longitude,
        });

        let ranked = self.strategy.select(candidates, k);
        debug!(identity, k, total, returned = ranked.len(), strategy = %self.strategy, "nearest query");
        Ok(Some(Nearest { ranked, total }))
    }

    /// When `identity` may record a new position again.
    ///
    /// `Some(ms)` while the first record is younger than `cooldown`, `None`
    /// when a new record is allowed now (including when there is no record).
    pub fn change_allowed_at(&self, identity: &str, cooldown: Duration) -> Result<Option<u64>> {
        let since = match self.first_seen(identity)? {
            Some(ts) => ts,
            None => return Ok(None),
        };
        let allowed_at = since.saturating_add(cooldown.as_millis() as u64);
        if now_ms() < allowed_at {
            info!(identity, allowed_at, "position change refused during cooldown");
            Ok(Some(allowed_at))
        } else {
            Ok(None)
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}
