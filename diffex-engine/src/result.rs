//! Result serialization: the columns-oriented JSON table and the response
//! envelope handed back to the embedding host.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use diffex_stats::DeaResults;

/// Column order of the serialized results table.
pub const RESULT_COLUMNS: [&str; 6] = [
    "baseMean",
    "log2FoldChange",
    "lfcSE",
    "stat",
    "pvalue",
    "padj",
];

/// One column serialized as `{gene: value, ...}` with NaN as `null`.
struct Column<'a> {
    gene_ids: &'a [String],
    values: &'a [f64],
}

impl Serialize for Column<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.gene_ids.len()))?;
        for (gene, &v) in self.gene_ids.iter().zip(self.values) {
            map.serialize_entry(gene, &v.is_finite().then_some(v))?;
        }
        map.end()
    }
}

/// The whole results table, column-major: `{"baseMean": {...}, ...}`.
struct ColumnsTable<'a>(&'a DeaResults);

impl Serialize for ColumnsTable<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let res = self.0;
        let columns: [&[f64]; 6] = [
            &res.base_mean,
            &res.log2_fold_change,
            &res.lfc_se,
            &res.stat,
            &res.pvalue,
            &res.padj,
        ];
        let mut map = serializer.serialize_map(Some(RESULT_COLUMNS.len()))?;
        for (name, values) in RESULT_COLUMNS.iter().zip(columns) {
            map.serialize_entry(
                name,
                &Column {
                    gene_ids: &res.gene_ids,
                    values,
                },
            )?;
        }
        map.end()
    }
}

/// Serialize the results the way a column-oriented data frame dump would:
/// one object per statistic keyed by gene id, non-finite values as `null`.
pub fn results_to_json(results: &DeaResults) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ColumnsTable(results))
}

/// The uniform response shape the host receives, success or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: String,
    /// Results JSON on success, a message on error.  Always a string, so the
    /// host decides when to parse.
    pub data: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Envelope {
    pub fn success(data: String) -> Self {
        Envelope {
            status: "success".to_string(),
            data,
            kind: "json".to_string(),
        }
    }

    pub fn error(message: String) -> Self {
        Envelope {
            status: "error".to_string(),
            data: message,
            kind: "error".to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","data":"failed to serialize response envelope","type":"error"}"#
                .to_string()
        })
    }
}
