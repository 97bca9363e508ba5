use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::HsError;

/// Positional index of a worker within a task.
///
/// Partitions are matched back to workers strictly by this index, so it
/// orders numerically (worker 10 sorts after worker 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkerId {
    type Err = HsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<usize>()
            .map(WorkerId)
            .map_err(|e| crate::config_error!("invalid worker id {s:?}: {e}"))
    }
}

/// Serialization format of payloads exchanged through the blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Json,
}

impl PayloadFormat {
    /// File extension used in blob object names.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, HsError> {
        match self {
            Self::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T, HsError> {
        match self {
            Self::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn worker_ids_order_numerically() {
        let mut ids: Vec<WorkerId> = ["10", "2", "0", "1"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, vec![WorkerId(0), WorkerId(1), WorkerId(2), WorkerId(10)]);
    }

    #[test]
    fn worker_ids_work_as_json_map_keys() {
        let mut map = BTreeMap::new();
        map.insert(WorkerId(3), "c");
        map.insert(WorkerId(11), "d");

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"3":"c","11":"d"}"#);

        let back: BTreeMap<WorkerId, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&WorkerId(11)).map(String::as_str), Some("d"));
    }

    #[test]
    fn rejects_non_numeric_worker_id() {
        assert!("worker-1".parse::<WorkerId>().is_err());
    }
}
