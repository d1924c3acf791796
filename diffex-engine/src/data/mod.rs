/// Data layer: cohort tables, expression loading, and alignment.
///
/// Architecture:
/// ```text
///  records / CSV text / Parquet bytes
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  decode payload → CohortTable, ExpressionTable
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  align    │  merge cohorts, drop strays, reorder columns
///   └──────────┘
///        │
///        ▼
///   ┌────────────────┐
///   │ AlignedDataset  │  counts + conditions in merged cohort order
///   └────────────────┘
/// ```

pub mod loader;
pub mod model;
pub mod align;
