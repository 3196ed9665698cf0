//! SQL for the three transformation steps.
//!
//! Each statement fully replaces its destination table and reads only its
//! upstream table, so re-running a step for the same run date gives the same
//! table. Statements may contain `{{ ds }}` and are rendered per run.

use crate::warehouse::TableRef;
use chrono::NaiveDate;

/// Columns the raw CSV header must provide.
pub const RAW_COLUMNS: [&str; 8] = [
    "Invoice",
    "StockCode",
    "Description",
    "Quantity",
    "InvoiceDate",
    "Price",
    "Customer ID",
    "Country",
];

/// Typed, filtered order lines with `line_amount`.
///
/// `line_amount` is computed at `DECIMAL(38, 9)` and is NULL only when the
/// product does not fit that type. The DOUBLE bound guards the exact multiply,
/// which would otherwise raise an overflow error for the whole statement.
#[must_use]
pub fn staging_sql(raw: &TableRef, staging: &TableRef) -> String {
    format!(
        r#"CREATE OR REPLACE TABLE {staging} AS
SELECT
  CAST(Invoice AS VARCHAR) AS invoice_no,
  CAST(StockCode AS VARCHAR) AS stock_code,
  NULLIF(TRIM(CAST(Description AS VARCHAR)), '') AS description,
  CAST(Quantity AS BIGINT) AS quantity,
  CAST(Price AS DECIMAL(38, 9)) AS unit_price,
  CASE
    WHEN abs(CAST(Quantity AS DOUBLE) * CAST(Price AS DOUBLE)) < 1e29
      THEN CAST(CAST(Quantity AS DECIMAL(38, 0)) * CAST(Price AS DECIMAL(38, 9)) AS DECIMAL(38, 9))
  END AS line_amount,
  CAST(InvoiceDate AS TIMESTAMP) AS invoice_ts,
  CAST(CAST(InvoiceDate AS TIMESTAMP) AS DATE) AS invoice_date,
  CAST(CAST("Customer ID" AS BIGINT) AS VARCHAR) AS customer_id,
  NULLIF(TRIM(CAST(Country AS VARCHAR)), '') AS country,
  DATE '{{{{ ds }}}}' AS ingestion_dt
FROM {raw}
WHERE Quantity > 0
  AND Price > 0
  AND InvoiceDate IS NOT NULL
  AND "Customer ID" IS NOT NULL;"#,
        staging = staging.sql_ident(),
        raw = raw.sql_ident(),
    )
}

/// One row per (invoice, date, customer, country).
#[must_use]
pub fn fact_orders_sql(staging: &TableRef, fact: &TableRef) -> String {
    format!(
        r"CREATE OR REPLACE TABLE {fact} AS
SELECT
  invoice_no,
  invoice_date,
  customer_id,
  country,
  COUNT(DISTINCT stock_code) AS distinct_products,
  SUM(quantity) AS total_items,
  SUM(line_amount) AS order_amount
FROM {staging}
GROUP BY invoice_no, invoice_date, customer_id, country
ORDER BY invoice_no, invoice_date, customer_id, country;",
        fact = fact.sql_ident(),
        staging = staging.sql_ident(),
    )
}

/// Recency, frequency and monetary features per customer as of `snapshot`.
#[must_use]
pub fn features_sql(fact: &TableRef, features: &TableRef, snapshot: NaiveDate) -> String {
    format!(
        r"CREATE OR REPLACE TABLE {features} AS
WITH ref AS (
  SELECT
    DATE '{snapshot}' AS snapshot_date,
    CAST(DATE '{snapshot}' - INTERVAL 12 MONTH AS DATE) AS window_12m_start,
    CAST(DATE '{snapshot}' - INTERVAL 90 DAY AS DATE) AS window_90d_start
),
orders AS (
  SELECT invoice_no, invoice_date, customer_id, order_amount
  FROM {fact}
)
SELECT
  o.customer_id,
  date_diff('day', MAX(o.invoice_date), r.snapshot_date) AS recency_days,
  COUNT(DISTINCT o.invoice_no) AS total_orders,
  COUNT(DISTINCT CASE WHEN o.invoice_date >= r.window_12m_start THEN o.invoice_no END) AS frequency_12m,
  SUM(CASE WHEN o.invoice_date >= r.window_12m_start THEN o.order_amount ELSE 0 END) AS monetary_12m,
  CASE WHEN MAX(o.invoice_date) >= r.window_90d_start THEN 1 ELSE 0 END AS is_active_90d
FROM orders o
CROSS JOIN ref r
GROUP BY o.customer_id, r.snapshot_date, r.window_12m_start, r.window_90d_start
ORDER BY o.customer_id;",
        features = features.sql_ident(),
        fact = fact.sql_ident(),
        snapshot = snapshot.format("%Y-%m-%d"),
    )
}
