//! CSV batch runner
//!
//! Reads binding rows from a CSV file, validates all of them up front, then
//! feeds them one by one through the [`BindingEngine`]. A failing row is
//! recorded and the batch moves on.

use crate::engine::{BindingEngine, BindingRequest, BindingResult, BindingStatus};
use crate::error::BindingError;
use crate::gcp::http::format_gcp_error;
use crate::policy::Principal;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const REQUIRED_COLUMNS: [&str; 5] = ["user_email", "role", "asset_name", "asset_type", "project_id"];

/// One validated CSV row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRow {
    /// 1-based file line (header = line 1)
    pub line: u64,
    pub user_email: String,
    pub role: String,
    pub asset_name: String,
    pub asset_type: String,
    pub project_id: Option<String>,
}

impl BindingRow {
    pub fn to_request(&self, dry_run: bool) -> BindingRequest {
        BindingRequest::new(&self.user_email, &self.role, &self.asset_name, &self.asset_type)
            .with_project_id(self.project_id.clone())
            .with_dry_run(dry_run)
    }
}

/// Column positions resolved from the header row
struct Columns {
    user_email: usize,
    role: usize,
    asset_name: usize,
    asset_type: usize,
    project_id: usize,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| match name {
            "user_email" => headers
                .iter()
                .position(|h| h == "user_email" || h == "email"),
            _ => headers.iter().position(|h| h == name),
        };

        match REQUIRED_COLUMNS.map(find) {
            [Some(user_email), Some(role), Some(asset_name), Some(asset_type), Some(project_id)] => {
                Ok(Self {
                    user_email,
                    role,
                    asset_name,
                    asset_type,
                    project_id,
                })
            },
            found => {
                let missing: Vec<&str> = REQUIRED_COLUMNS
                    .iter()
                    .zip(found)
                    .filter(|(_, idx)| idx.is_none())
                    .map(|(name, _)| *name)
                    .collect();
                bail!("Missing required columns: {}", missing.join(", "))
            },
        }
    }
}

/// Read and validate every row of a binding CSV.
///
/// Any problem (missing file or columns, ragged rows, empty required fields,
/// a principal with no identity, no data rows) fails the whole file before a
/// single request is issued.
pub fn read_rows(csv_path: &Path) -> Result<Vec<BindingRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {}", csv_path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header: {}", csv_path.display()))?
        .clone();
    let columns = Columns::from_headers(&headers)?;

    let mut rows = Vec::new();
    let mut problems = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", idx + 2))?;
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(idx as u64 + 2);

        if record.len() != headers.len() {
            problems.push(format!(
                "line {}: expected {} columns, found {}",
                line,
                headers.len(),
                record.len()
            ));
            continue;
        }

        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        let row = BindingRow {
            line,
            user_email: field(columns.user_email),
            role: field(columns.role),
            asset_name: field(columns.asset_name),
            asset_type: field(columns.asset_type),
            project_id: Some(field(columns.project_id)).filter(|p| !p.is_empty()),
        };

        let empty: Vec<&str> = [
            ("user_email", &row.user_email),
            ("role", &row.role),
            ("asset_name", &row.asset_name),
            ("asset_type", &row.asset_type),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(name, _)| name)
        .collect();

        if !empty.is_empty() {
            problems.push(format!("line {}: empty {}", line, empty.join(", ")));
            continue;
        }

        if let Err(err) = Principal::parse(&row.user_email) {
            problems.push(format!("line {}: {}", line, err));
            continue;
        }

        rows.push(row);
    }

    if !problems.is_empty() {
        bail!(
            "Invalid CSV file {}:\n  {}",
            csv_path.display(),
            problems.join("\n  ")
        );
    }
    if rows.is_empty() {
        bail!("CSV file {} contains no data rows", csv_path.display());
    }

    tracing::debug!("Read {} rows from {}", rows.len(), csv_path.display());
    Ok(rows)
}

/// Result of one processed row
#[derive(Debug)]
pub struct RowOutcome {
    pub row: BindingRow,
    pub result: BindingResult,
}

/// Summary of a batch run
#[derive(Debug)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<RowOutcome>,
    /// Rows in the input, processed or not
    pub total_rows: usize,
    /// Stopped early on request
    pub cancelled: bool,
}

impl BatchReport {
    fn count(&self, status: BindingStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result.status == status)
            .count()
    }

    /// Rows granted or validated (dry run)
    pub fn succeeded(&self) -> usize {
        self.count(BindingStatus::Granted) + self.count(BindingStatus::DryRun)
    }

    /// Rows whose grant was already present
    pub fn skipped(&self) -> usize {
        self.count(BindingStatus::AlreadyGranted)
    }

    pub fn failed(&self) -> usize {
        self.count(BindingStatus::Failed)
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &RowOutcome> {
        self.outcomes.iter().filter(|o| !o.result.success())
    }

    pub fn log_summary(&self) {
        let elapsed = self.finished_at - self.started_at;
        tracing::info!(
            "Processed {}/{} rows in {:.1}s: {} succeeded, {} already granted, {} failed",
            self.processed(),
            self.total_rows,
            elapsed.num_milliseconds() as f64 / 1000.0,
            self.succeeded(),
            self.skipped(),
            self.failed()
        );
        if self.cancelled {
            tracing::warn!("Batch stopped before all rows were processed");
        }
        for outcome in self.failures() {
            if let Some(error) = &outcome.result.error {
                tracing::warn!(
                    "Line {}: [{}] {}",
                    outcome.row.line,
                    error.kind(),
                    failure_reason(error)
                );
            }
        }
    }
}

/// User-facing reason for a failed row
pub fn failure_reason(error: &BindingError) -> String {
    match error {
        BindingError::Transport(err) => format!("{} ({})", format_gcp_error(err), err.message),
        other => other.to_string(),
    }
}

/// Apply every row in order, sleeping `delay` between requests.
///
/// Setting `stop` prevents further rows from being issued; the request in
/// flight always completes.
pub async fn run_batch(
    engine: &mut BindingEngine,
    rows: &[BindingRow],
    dry_run: bool,
    delay: Duration,
    stop: &AtomicBool,
) -> BatchReport {
    let started_at = Utc::now();
    let mut outcomes = Vec::with_capacity(rows.len());
    let mut cancelled = false;

    for (idx, row) in rows.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            cancelled = true;
            break;
        }

        if idx > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        tracing::debug!(
            "Line {}: {} {} on {}",
            row.line,
            row.user_email,
            row.role,
            row.asset_name
        );
        let result = engine.add_binding(&row.to_request(dry_run)).await;
        outcomes.push(RowOutcome {
            row: row.clone(),
            result,
        });
    }

    BatchReport {
        started_at,
        finished_at: Utc::now(),
        outcomes,
        total_rows: rows.len(),
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetTypeRegistry;
    use crate::config::EngineConfig;
    use crate::engine::tests::{MockApi, MockConnector};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID: &str = "\
user_email,project_id,asset_name,asset_type,role
user1@example.com,proj-1,//cloudresourcemanager.googleapis.com/projects/proj-1,cloudresourcemanager.googleapis.com/Project,roles/viewer
user1@example.com,proj-1,//storage.googleapis.com/projects/_/buckets/b1,storage.googleapis.com/Bucket,roles/storage.objectViewer
user2@example.com,,//bigquery.googleapis.com/projects/proj-1/datasets/d1,bigquery.googleapis.com/Dataset,roles/bigquery.dataViewer
";

    #[test]
    fn test_read_rows() {
        let file = csv_file(VALID);
        let rows = read_rows(file.path()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].project_id.as_deref(), Some("proj-1"));
        assert_eq!(rows[1].asset_type, "storage.googleapis.com/Bucket");
        assert_eq!(rows[2].line, 4);
        assert_eq!(rows[2].project_id, None);
    }

    #[test]
    fn test_email_alias_column() {
        let file = csv_file(
            "email,role,asset_name,asset_type,project_id\n\
             a@example.com,roles/viewer,//cloudresourcemanager.googleapis.com/projects/p,cloudresourcemanager.googleapis.com/Project,p\n",
        );
        let rows = read_rows(file.path()).unwrap();
        assert_eq!(rows[0].user_email, "a@example.com");
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let file = csv_file(
            "user_email,project_id,asset_type,role\n\
             a@example.com,p,cloudresourcemanager.googleapis.com/Project,roles/viewer\n",
        );
        let err = read_rows(file.path()).unwrap_err();
        assert!(err.to_string().contains("asset_name"), "{}", err);
    }

    #[test]
    fn test_empty_required_field_is_rejected() {
        let file = csv_file(
            "user_email,project_id,asset_name,asset_type,role\n\
             a@example.com,p,,storage.googleapis.com/Bucket,roles/storage.objectViewer\n",
        );
        let err = read_rows(file.path()).unwrap_err();
        assert!(err.to_string().contains("line 2: empty asset_name"), "{}", err);
    }

    #[test]
    fn test_principal_without_identity_is_rejected() {
        let file = csv_file(
            "user_email,project_id,asset_name,asset_type,role
             allUsers,p,//storage.googleapis.com/projects/_/buckets/b1,storage.googleapis.com/Bucket,roles/storage.objectViewer
             user:,p,//cloudresourcemanager.googleapis.com/projects/p,cloudresourcemanager.googleapis.com/Project,roles/viewer
",
        );
        let err = read_rows(file.path()).unwrap_err();
        assert!(err.to_string().contains("line 3: invalid principal: `user:`"), "{}", err);
        assert!(!err.to_string().contains("line 2"), "{}", err);
    }

    #[test]
    fn test_ragged_row_is_rejected() {
        let file = csv_file(
            "user_email,project_id,asset_name,asset_type,role\n\
             a@example.com,p,//x\n",
        );
        let err = read_rows(file.path()).unwrap_err();
        assert!(err.to_string().contains("expected 5 columns, found 3"), "{}", err);
    }

    #[test]
    fn test_header_only_is_rejected() {
        let file = csv_file("user_email,project_id,asset_name,asset_type,role\n");
        let err = read_rows(file.path()).unwrap_err();
        assert!(err.to_string().contains("no data rows"));
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let err = read_rows(Path::new("non_existent_file.csv")).unwrap_err();
        assert!(err.to_string().contains("Failed to open CSV file"));
    }

    fn engine(connector: &std::sync::Arc<MockConnector>) -> BindingEngine {
        BindingEngine::new(
            AssetTypeRegistry::new(),
            connector.clone(),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let file = csv_file(
            "user_email,project_id,asset_name,asset_type,role\n\
             a@example.com,p1,//cloudresourcemanager.googleapis.com/projects/p1,cloudresourcemanager.googleapis.com/Project,roles/viewer\n\
             a@example.com,p1,//compute.googleapis.com/projects/p1/zones/z/instances/i,compute.googleapis.com/Instance,roles/viewer\n\
             a@example.com,p1,//cloudresourcemanager.googleapis.com/projects/p1,cloudresourcemanager.googleapis.com/Project,roles/viewer\n",
        );
        let rows = read_rows(file.path()).unwrap();
        let connector = MockConnector::new(MockApi::with_iam_policy(json!({})));
        let mut engine = engine(&connector);
        let stop = AtomicBool::new(false);

        let report = run_batch(&mut engine, &rows, false, Duration::ZERO, &stop).await;
        assert_eq!(report.processed(), 3);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(report.has_failures());
        assert!(!report.cancelled);

        let failed: Vec<u64> = report.failures().map(|o| o.row.line).collect();
        assert_eq!(failed, vec![3]);
    }

    #[tokio::test]
    async fn test_batch_dry_run_counts_as_success() {
        let file = csv_file(VALID);
        let rows = read_rows(file.path()).unwrap();
        let connector = MockConnector::new(MockApi::with_iam_policy(json!({})));
        let mut engine = engine(&connector);
        let stop = AtomicBool::new(false);

        let report = run_batch(&mut engine, &rows, true, Duration::ZERO, &stop).await;
        assert_eq!(report.succeeded(), 3);
        assert!(!report.has_failures());
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.result.status == BindingStatus::DryRun));
    }

    #[test]
    fn test_failure_reason_explains_transport_status() {
        let err = BindingError::Transport(crate::gcp::http::TransportError {
            status: Some(403),
            message: "caller lacks resourcemanager.projects.setIamPolicy".to_string(),
        });
        let reason = failure_reason(&err);
        assert!(reason.starts_with("Permission denied"));
        assert!(reason.contains("setIamPolicy"));
        assert_eq!(err.kind(), "transport");

        let err = BindingError::UnsupportedAssetType("x/Y".to_string());
        assert_eq!(failure_reason(&err), "unsupported asset type: x/Y");
    }

    #[tokio::test]
    async fn test_stopped_batch_issues_no_requests() {
        let file = csv_file(VALID);
        let rows = read_rows(file.path()).unwrap();
        let connector = MockConnector::new(MockApi::default());
        let mut engine = engine(&connector);
        let stop = AtomicBool::new(true);

        let report = run_batch(&mut engine, &rows, false, Duration::ZERO, &stop).await;
        assert!(report.cancelled);
        assert_eq!(report.processed(), 0);
        assert_eq!(report.total_rows, 3);
        assert!(connector.api.calls().is_empty());
    }
}
