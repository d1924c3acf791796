//! Wire format of a differential expression request as the host hands it
//! over.

use serde::Deserialize;

/// A complete request: two cohorts, an optional column-to-sample mapping and
/// the expression records.
///
/// Expected JSON shape:
///
/// ```json
/// {
///   "cohortA": { "n": "Cases",    "sids": ["s1", "s2"], "pids": ["p1", "p2"] },
///   "cohortB": { "n": "Controls", "sids": ["s3", "s4"], "pids": ["p3", "p4"] },
///   "map":  [ { "i": 0, "s": "s1" }, { "i": 1, "s": "s3" } ],
///   "data": [ { "m": "TFF3", "d": [12, 40, 3, 7] } ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DeaPayload {
    #[serde(rename = "cohortA")]
    pub cohort_a: CohortPayload,
    #[serde(rename = "cohortB")]
    pub cohort_b: CohortPayload,
    /// Position-to-sample mapping for the count vectors.  Optional when the
    /// expression encoding carries its own sample ids.
    #[serde(default)]
    pub map: Option<Vec<MapEntry>>,
    pub data: Vec<GeneCounts>,
}

/// One cohort of the comparison.
#[derive(Debug, Clone, Deserialize)]
pub struct CohortPayload {
    /// Display name, only used in logs.
    #[serde(default)]
    pub n: Option<String>,
    /// Sample ids, in the order the cohort was assembled.
    pub sids: Vec<String>,
    /// Participant ids, parallel to `sids`.  Not used by the analysis.
    #[serde(default)]
    pub pids: Vec<String>,
}

/// Position `i` of every count vector belongs to sample `s`.
#[derive(Debug, Clone, Deserialize)]
pub struct MapEntry {
    pub i: u64,
    pub s: String,
}

/// Expression record: gene `m` with one raw count per mapped position.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneCounts {
    pub m: String,
    pub d: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_wire_shape() {
        let raw = r#"{
            "cohortA": { "n": "Cases", "sids": ["s1", "s2"], "pids": ["p1", "p2"] },
            "cohortB": { "n": "Controls", "sids": ["s3"], "pids": ["p3"] },
            "map": [ { "i": 0, "s": "s1" }, { "i": 1, "s": "s2" }, { "i": 2, "s": "s3" } ],
            "data": [ { "m": "TFF3", "d": [12, 40, 3] } ]
        }"#;
        let payload: DeaPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.cohort_a.n.as_deref(), Some("Cases"));
        assert_eq!(payload.cohort_a.sids, vec!["s1", "s2"]);
        assert_eq!(payload.cohort_b.pids, vec!["p3"]);
        let map = payload.map.unwrap();
        assert_eq!(map[2].i, 2);
        assert_eq!(map[2].s, "s3");
        assert_eq!(payload.data[0].m, "TFF3");
        assert_eq!(payload.data[0].d, vec![12.0, 40.0, 3.0]);
    }

    #[test]
    fn map_and_names_are_optional() {
        let raw = r#"{
            "cohortA": { "sids": ["s1"] },
            "cohortB": { "sids": ["s2"] },
            "data": []
        }"#;
        let payload: DeaPayload = serde_json::from_str(raw).unwrap();
        assert!(payload.map.is_none());
        assert!(payload.cohort_a.n.is_none());
        assert!(payload.cohort_a.pids.is_empty());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        // Hosts decorate the payload with extra bookkeeping fields.
        let raw = r#"{
            "cohortA": { "n": "A", "sids": ["s1"], "pids": ["p1"], "created": 123 },
            "cohortB": { "n": "B", "sids": ["s2"], "pids": ["p2"] },
            "map": [ { "i": 0, "s": "s1" }, { "i": 1, "s": "s2" } ],
            "data": [ { "m": "ABO", "d": [1, 2], "note": "x" } ],
            "jobId": "abc"
        }"#;
        let payload: DeaPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.data[0].m, "ABO");
    }
}
