use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, Float64Array, Int32Array, Int64Array, LargeListArray, LargeStringArray, ListArray,
    StringArray,
};
use arrow::datatypes::DataType;
use bytes::Bytes;
use ndarray::Array2;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::model::{CohortTable, ExpressionTable};
use crate::payload::{CohortPayload, GeneCounts, MapEntry};

// ---------------------------------------------------------------------------
// Cohort loading
// ---------------------------------------------------------------------------

/// Turn one cohort payload into a labelled table.
pub fn load_cohort(payload: &CohortPayload, label: &'static str) -> Result<CohortTable> {
    if payload.sids.is_empty() {
        bail!("cohort {label} has no samples");
    }
    if !payload.pids.is_empty() && payload.pids.len() != payload.sids.len() {
        bail!(
            "cohort {label}: {} participant ids for {} samples",
            payload.pids.len(),
            payload.sids.len()
        );
    }
    let mut seen = HashSet::new();
    for sid in &payload.sids {
        if !seen.insert(sid.as_str()) {
            bail!("cohort {label}: duplicate sample id '{sid}'");
        }
    }
    let display_name = payload
        .n
        .clone()
        .unwrap_or_else(|| format!("cohort {label}"));

    Ok(CohortTable {
        label,
        display_name,
        sample_ids: payload.sids.clone(),
        participant_ids: payload.pids.clone(),
    })
}

// ---------------------------------------------------------------------------
// Expression loading
// ---------------------------------------------------------------------------

/// Where the expression matrix comes from.  Dispatch by variant.
///
/// * `Records` – parsed payload records, one per gene (the browser path)
/// * `CsvText` – CSV text whose header row carries the sample ids
/// * `ParquetBytes` – a Parquet buffer with `m` and `d` columns per gene
pub enum ExpressionSource {
    Records(Vec<GeneCounts>),
    CsvText(String),
    ParquetBytes(Bytes),
}

/// Decode an expression source into a gene-by-sample table.
///
/// `map` names the sample behind every count-vector position.  Sources that
/// carry their own sample ids (CSV headers, Parquet `samples` metadata)
/// take precedence over it.
pub fn load_expression(
    source: ExpressionSource,
    map: Option<&[MapEntry]>,
) -> Result<ExpressionTable> {
    match source {
        ExpressionSource::Records(records) => from_records(&records, map),
        ExpressionSource::CsvText(text) => from_csv_text(&text, map),
        ExpressionSource::ParquetBytes(bytes) => from_parquet_bytes(bytes, map),
    }
}

/// Sample ids in count-vector order: map entries sorted by position.
fn sample_order(map: &[MapEntry]) -> Result<Vec<String>> {
    let mut entries: Vec<(u64, &str)> = map.iter().map(|e| (e.i, e.s.as_str())).collect();
    entries.sort_by_key(|&(i, _)| i);
    let mut seen = HashSet::new();
    for &(i, _) in &entries {
        if !seen.insert(i) {
            bail!("sample map: duplicate position {i}");
        }
    }
    Ok(entries.into_iter().map(|(_, s)| s.to_string()).collect())
}

fn from_records(records: &[GeneCounts], map: Option<&[MapEntry]>) -> Result<ExpressionTable> {
    let map = map.context("record-encoded expression needs a sample map")?;
    let sample_ids = sample_order(map)?;

    let mut gene_ids = Vec::with_capacity(records.len());
    let mut flat = Vec::with_capacity(records.len() * sample_ids.len());
    for rec in records {
        if rec.d.len() != sample_ids.len() {
            bail!(
                "gene '{}': {} counts for {} mapped samples",
                rec.m,
                rec.d.len(),
                sample_ids.len()
            );
        }
        gene_ids.push(rec.m.clone());
        flat.extend_from_slice(&rec.d);
    }
    build_table(gene_ids, sample_ids, flat)
}

/// CSV layout: header `gene,<sample ids...>`, one row per gene.
///
/// ```text
/// gene,s1,s2,s3
/// TFF3,12,40,3
/// ```
fn from_csv_text(text: &str, map: Option<&[MapEntry]>) -> Result<ExpressionTable> {
    if map.is_some() {
        log::warn!("CSV expression carries its own sample ids, ignoring the payload map");
    }
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV header")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.len() < 2 {
        bail!("CSV header needs a gene column and at least one sample column");
    }
    let sample_ids: Vec<String> = headers[1..].to_vec();

    let mut gene_ids = Vec::new();
    let mut flat = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        gene_ids.push(record.get(0).unwrap_or("").trim().to_string());
        for (k, tok) in record.iter().skip(1).enumerate() {
            let value: f64 = tok.trim().parse().with_context(|| {
                format!(
                    "CSV row {row_no}, column '{}': '{tok}' is not a number",
                    sample_ids[k]
                )
            })?;
            flat.push(value);
        }
    }
    build_table(gene_ids, sample_ids, flat)
}

/// Parquet schema: a string column `m` and a List or LargeList column `d`,
/// one row per gene.  Sample ids come from a `samples` entry in the schema
/// metadata (a JSON string array) or, failing that, from the payload map.
fn from_parquet_bytes(bytes: Bytes, map: Option<&[MapEntry]>) -> Result<ExpressionTable> {
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(bytes).context("reading parquet metadata")?;
    let schema = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;

    let in_band: Option<Vec<String>> = match schema.metadata().get("samples") {
        Some(raw) => {
            Some(serde_json::from_str(raw).context("parsing 'samples' schema metadata")?)
        }
        None => None,
    };
    let sample_ids = match (in_band, map) {
        (Some(ids), Some(_)) => {
            log::warn!("Parquet expression carries its own sample ids, ignoring the payload map");
            ids
        }
        (Some(ids), None) => ids,
        (None, Some(map)) => sample_order(map)?,
        (None, None) => bail!("parquet expression has no 'samples' metadata and no sample map"),
    };

    let m_idx = schema.index_of("m").context("Parquet file missing 'm' column")?;
    let d_idx = schema.index_of("d").context("Parquet file missing 'd' column")?;

    let mut gene_ids = Vec::new();
    let mut flat = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let m_col = batch.column(m_idx);
        let d_col = batch.column(d_idx);

        for row in 0..batch.num_rows() {
            let gene = extract_string(m_col, row)
                .with_context(|| format!("Row {row}: failed to read 'm'"))?;
            let counts = extract_count_list(d_col, row)
                .with_context(|| format!("Row {row}: failed to read 'd' for gene '{gene}'"))?;
            if counts.len() != sample_ids.len() {
                bail!(
                    "gene '{gene}': {} counts for {} samples",
                    counts.len(),
                    sample_ids.len()
                );
            }
            gene_ids.push(gene);
            flat.extend_from_slice(&counts);
        }
    }
    build_table(gene_ids, sample_ids, flat)
}

fn build_table(
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    flat: Vec<f64>,
) -> Result<ExpressionTable> {
    let mut seen = HashSet::new();
    for g in &gene_ids {
        if !seen.insert(g.as_str()) {
            bail!("duplicate gene id '{g}' in expression data");
        }
    }
    let mut seen = HashSet::new();
    for s in &sample_ids {
        if !seen.insert(s.as_str()) {
            bail!("duplicate sample id '{s}' in expression data");
        }
    }
    let counts = Array2::from_shape_vec((gene_ids.len(), sample_ids.len()), flat)
        .context("assembling count matrix")?;
    Ok(ExpressionTable {
        gene_ids,
        sample_ids,
        counts,
    })
}

// -- Parquet / Arrow helpers --

fn extract_string(col: &Arc<dyn Array>, row: usize) -> Result<String> {
    if col.is_null(row) {
        bail!("null gene id");
    }
    match col.data_type() {
        DataType::Utf8 => {
            let arr = col
                .as_any()
                .downcast_ref::<StringArray>()
                .context("expected StringArray")?;
            Ok(arr.value(row).to_string())
        }
        DataType::LargeUtf8 => {
            let arr = col
                .as_any()
                .downcast_ref::<LargeStringArray>()
                .context("expected LargeStringArray")?;
            Ok(arr.value(row).to_string())
        }
        other => bail!("Expected a string column, got {other:?}"),
    }
}

/// Extract one gene's counts from a List or LargeList column.  Null slots
/// become NaN so validation can report them downstream.
fn extract_count_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null count list");
    }
    let values = match col.data_type() {
        DataType::List(_) => {
            let arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            arr.value(row)
        }
        DataType::LargeList(_) => {
            let arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    if let Some(arr) = values.as_any().downcast_ref::<Int64Array>() {
        Ok(arr
            .iter()
            .map(|v| v.map(|x| x as f64).unwrap_or(f64::NAN))
            .collect())
    } else if let Some(arr) = values.as_any().downcast_ref::<Int32Array>() {
        Ok(arr
            .iter()
            .map(|v| v.map(|x| x as f64).unwrap_or(f64::NAN))
            .collect())
    } else if let Some(arr) = values.as_any().downcast_ref::<Float64Array>() {
        Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Int64, Int32 or Float64",
            values.data_type()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(u64, &str)]) -> Vec<MapEntry> {
        entries
            .iter()
            .map(|&(i, s)| MapEntry { i, s: s.to_string() })
            .collect()
    }

    #[test]
    fn sample_order_follows_positions_not_entry_order() {
        let m = map(&[(2, "s3"), (0, "s1"), (1, "s2")]);
        assert_eq!(sample_order(&m).unwrap(), vec!["s1", "s2", "s3"]);

        let err = sample_order(&map(&[(0, "a"), (0, "b")])).unwrap_err();
        assert!(err.to_string().contains("duplicate position"));
    }

    #[test]
    fn records_need_matching_vector_lengths() {
        let records = vec![GeneCounts {
            m: "TFF3".into(),
            d: vec![1.0, 2.0, 3.0],
        }];
        let m = map(&[(0, "s1"), (1, "s2")]);
        let err = from_records(&records, Some(&m)).unwrap_err();
        assert!(err.to_string().contains("3 counts for 2 mapped samples"));
    }

    #[test]
    fn records_without_a_map_are_rejected() {
        let err = from_records(&[], None).unwrap_err();
        assert!(err.to_string().contains("needs a sample map"));
    }

    #[test]
    fn csv_header_supplies_the_sample_ids() {
        let text = "gene,s1,s2\nTFF3,12,40\nABO,3,7\n";
        let table = from_csv_text(text, None).unwrap();
        assert_eq!(table.gene_ids, vec!["TFF3", "ABO"]);
        assert_eq!(table.sample_ids, vec!["s1", "s2"]);
        assert_eq!(table.counts[[1, 0]], 3.0);

        let err = from_csv_text("gene,s1\nTFF3,oops\n", None).unwrap_err();
        assert!(format!("{err:#}").contains("'oops' is not a number"));
    }

    #[test]
    fn build_table_rejects_duplicates() {
        let err = build_table(
            vec!["g".into(), "g".into()],
            vec!["s1".into()],
            vec![1.0, 2.0],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate gene id 'g'"));

        let err = build_table(
            vec!["g".into()],
            vec!["s".into(), "s".into()],
            vec![1.0, 2.0],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate sample id 's'"));
    }

    #[test]
    fn cohorts_are_validated() {
        let empty = CohortPayload {
            n: None,
            sids: vec![],
            pids: vec![],
        };
        let err = load_cohort(&empty, "A").unwrap_err();
        assert!(err.to_string().contains("cohort A has no samples"));

        let dup = CohortPayload {
            n: Some("Cases".into()),
            sids: vec!["s1".into(), "s1".into()],
            pids: vec!["p1".into(), "p2".into()],
        };
        let err = load_cohort(&dup, "A").unwrap_err();
        assert!(err.to_string().contains("duplicate sample id 's1'"));

        let ok = CohortPayload {
            n: None,
            sids: vec!["s1".into()],
            pids: vec![],
        };
        let table = load_cohort(&ok, "B").unwrap();
        assert_eq!(table.display_name, "cohort B");
        assert_eq!(table.label, "B");
    }
}
