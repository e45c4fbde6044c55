use serde::{Deserialize, Serialize};

/// One line of the position log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PositionRecord {
    /// Opaque caller key (never empty)
    pub identity: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Milliseconds since the Unix epoch, stamped by the store on append
    pub recorded_at: u64,
}

impl PositionRecord {
    pub fn new(identity: impl Into<String>, latitude: f64, longitude: f64, recorded_at: u64) -> Self {
        Self {
            identity: identity.into(),
            latitude,
            longitude,
            recorded_at,
        }
    }

    /// Encode as `identity,latitude,longitude,timestamp_ms\n`.
    pub fn to_line(&self) -> String {
        format!("{},{},{},{}\n", self.identity, self.latitude, self.longitude, self.recorded_at)
    }

    /// Decode one log line (terminator already stripped).
    /// Returns `None` for anything that is not exactly four well-formed fields.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut fields = line.split(',');
        let identity = fields.next()?;
        let latitude = fields.next()?.trim().parse::<f64>().ok()?;
        let longitude = fields.next()?.trim().parse::<f64>().ok()?;
        let recorded_at = fields.next()?.trim().parse::<u64>().ok()?;

        if fields.next().is_some() || identity.is_empty() {
            return None;
        }
        Some(Self::new(identity, latitude, longitude, recorded_at))
    }
}

/// A ranked candidate produced by a proximity query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub identity: String,
    pub distance_km: f64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Result of `NearbyDb::nearest`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Nearest {
    /// Closest first
    pub ranked: Vec<Neighbor>,

    /// Every well-formed record scanned, the caller's own included
    pub total: usize,
}

/// Identities end up as the first CSV field, so they must not carry separators.
pub fn is_valid_identity(identity: &str) -> bool {
    !identity.is_empty() && !identity.contains([',', '\n', '\r'])
}
