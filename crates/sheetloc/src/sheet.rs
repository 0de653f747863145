//! Spreadsheet collaborator interface.
//!
//! The pipeline never talks to a spreadsheet service directly. A session loads
//! rows, makes sure the status column exists and snapshots a backup through
//! [`SheetClient`]; after the final approval it hands over the whole write set
//! in one [`SheetClient::batch_write`] call.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::SheetError;
use crate::model::{CellUpdate, SheetRow};

pub trait SheetClient: Send + Sync {
    fn load_rows(&self, sheet: &str) -> Result<Vec<SheetRow>, SheetError>;

    /// Adds `column` to the header row when it is missing.
    fn ensure_status_column(&self, sheet: &str, column: &str) -> Result<(), SheetError>;

    /// Applies every update in a single call. Never called per cell.
    fn batch_write(&self, sheet: &str, updates: &[CellUpdate]) -> Result<(), SheetError>;

    fn create_backup(&self, sheet: &str, rows: &[SheetRow]) -> Result<Vec<u8>, SheetError>;
}

/// Exponential backoff for rate-limited spreadsheet calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt + 1` (zero-based): base, 2×base, 4×base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Outcome of one attempt of a spreadsheet call.
#[derive(Debug)]
pub enum CallError {
    /// The service asked us to slow down; worth another attempt.
    RateLimited,
    Failed(SheetError),
}

/// Retries `call` while it reports [`CallError::RateLimited`], sleeping with
/// exponential backoff between attempts. Other failures return immediately.
///
/// [`SheetClient`] implementations wrap their remote calls in this;
/// [`MemorySheet`] runs its writes through it as well.
pub fn retry_with_backoff<T, F>(policy: &BackoffPolicy, mut call: F) -> Result<T, SheetError>
where
    F: FnMut() -> Result<T, CallError>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        match call() {
            Ok(value) => return Ok(value),
            Err(CallError::Failed(e)) => return Err(e),
            Err(CallError::RateLimited) if attempt + 1 < attempts => {
                let delay = policy.delay(attempt);
                log::warn!(
                    "Spreadsheet rate limit hit, retrying in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    attempts
                );
                thread::sleep(delay);
            }
            Err(CallError::RateLimited) => {}
        }
    }
    Err(SheetError::RateLimited { attempts })
}

#[derive(Default)]
struct SheetData {
    headers: Vec<String>,
    rows: Vec<SheetRow>,
}

#[derive(Default)]
struct MemorySheetInner {
    sheets: BTreeMap<String, SheetData>,
    writes: Vec<(String, Vec<CellUpdate>)>,
    fail_writes: Option<SheetError>,
    /// Write attempts still to be answered with a rate limit.
    throttled_writes: u32,
}

/// In-memory spreadsheet, for tests and embedders without a remote sheet.
///
/// Backups are the rows serialized as JSON. Every successful `batch_write` is
/// kept in a write log. Writes retry rate limits with the sheet's
/// [`BackoffPolicy`].
#[derive(Default)]
pub struct MemorySheet {
    inner: Mutex<MemorySheetInner>,
    backoff: BackoffPolicy,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Answers the next `attempts` write attempts with a rate limit.
    pub fn throttle_writes(&self, attempts: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.throttled_writes = attempts;
        }
    }

    pub fn with_sheet(self, name: impl Into<String>, rows: Vec<SheetRow>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for row in &rows {
            for column in row.cells.keys() {
                if !headers.contains(column) {
                    headers.push(column.clone());
                }
            }
        }
        if let Ok(mut inner) = self.inner.lock() {
            inner.sheets.insert(name.into(), SheetData { headers, rows });
        }
        self
    }

    /// Makes every following `batch_write` fail with `error`.
    pub fn fail_writes(&self, error: SheetError) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = Some(error);
        }
    }

    pub fn rows(&self, sheet: &str) -> Vec<SheetRow> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.sheets.get(sheet).map(|data| data.rows.clone()))
            .unwrap_or_default()
    }

    pub fn headers(&self, sheet: &str) -> Vec<String> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.sheets.get(sheet).map(|data| data.headers.clone()))
            .unwrap_or_default()
    }

    /// Every batch written so far, oldest first.
    pub fn writes(&self) -> Vec<(String, Vec<CellUpdate>)> {
        self.inner.lock().map(|inner| inner.writes.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemorySheetInner>, SheetError> {
        self.inner
            .lock()
            .map_err(|_| SheetError::Backup("sheet lock poisoned".to_string()))
    }
}

impl SheetClient for MemorySheet {
    fn load_rows(&self, sheet: &str) -> Result<Vec<SheetRow>, SheetError> {
        let inner = self.lock()?;
        inner
            .sheets
            .get(sheet)
            .map(|data| data.rows.clone())
            .ok_or_else(|| SheetError::Load {
                sheet: sheet.to_string(),
                reason: "no such worksheet".to_string(),
            })
    }

    fn ensure_status_column(&self, sheet: &str, column: &str) -> Result<(), SheetError> {
        let mut inner = self.lock()?;
        let data = inner.sheets.get_mut(sheet).ok_or_else(|| SheetError::Load {
            sheet: sheet.to_string(),
            reason: "no such worksheet".to_string(),
        })?;
        if !data.headers.iter().any(|h| h == column) {
            log::info!("Adding status column '{}' to '{}'", column, sheet);
            data.headers.push(column.to_string());
        }
        Ok(())
    }

    fn batch_write(&self, sheet: &str, updates: &[CellUpdate]) -> Result<(), SheetError> {
        if updates.is_empty() {
            return Ok(());
        }

        retry_with_backoff(&self.backoff, || {
            let mut inner = self.lock().map_err(CallError::Failed)?;
            if inner.throttled_writes > 0 {
                inner.throttled_writes -= 1;
                return Err(CallError::RateLimited);
            }
            apply_updates(&mut inner, sheet, updates).map_err(CallError::Failed)
        })
    }

    fn create_backup(&self, _sheet: &str, rows: &[SheetRow]) -> Result<Vec<u8>, SheetError> {
        serde_json::to_vec_pretty(rows).map_err(|e| SheetError::Backup(e.to_string()))
    }
}

fn apply_updates(inner: &mut MemorySheetInner, sheet: &str, updates: &[CellUpdate]) -> Result<(), SheetError> {
    if let Some(error) = inner.fail_writes.clone() {
        return Err(error);
    }

    let data = inner.sheets.get_mut(sheet).ok_or_else(|| SheetError::Write {
        count: updates.len(),
        reason: format!("no such worksheet '{}'", sheet),
    })?;

    // Validate first so a bad update leaves the sheet untouched.
    if let Some(bad) = updates.iter().find(|u| u.row_index >= data.rows.len()) {
        return Err(SheetError::Write {
            count: updates.len(),
            reason: format!("row {} is out of range", bad.row_index),
        });
    }
    if let Some(bad) = updates.iter().find(|u| !data.headers.contains(&u.column)) {
        return Err(SheetError::Write {
            count: updates.len(),
            reason: format!("unknown column '{}'", bad.column),
        });
    }

    for update in updates {
        data.rows[update.row_index].set(update.column.clone(), update.value.clone());
    }
    inner.writes.push((sheet.to_string(), updates.to_vec()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeKind;
    use std::cell::Cell;

    fn sheet() -> MemorySheet {
        MemorySheet::new().with_sheet(
            "Sheet1",
            vec![
                SheetRow::new().with("Key", "A1").with("Korean(ko)", "안녕"),
                SheetRow::new().with("Key", "A2").with("Korean(ko)", "잘가"),
            ],
        )
    }

    fn update(row_index: usize, column: &str, value: &str) -> CellUpdate {
        CellUpdate {
            row_index,
            column: column.to_string(),
            value: value.to_string(),
            change: ChangeKind::Translation,
        }
    }

    #[test]
    fn test_load_unknown_sheet() {
        let err = sheet().load_rows("Missing").unwrap_err();
        assert!(matches!(err, SheetError::Load { .. }));
    }

    #[test]
    fn test_ensure_status_column_then_write() {
        let sheet = sheet();
        assert!(sheet.batch_write("Sheet1", &[update(0, "Tool_Status", "Completed")]).is_err());

        sheet.ensure_status_column("Sheet1", "Tool_Status").unwrap();
        sheet.ensure_status_column("Sheet1", "Tool_Status").unwrap();
        assert_eq!(sheet.headers("Sheet1").iter().filter(|h| *h == "Tool_Status").count(), 1);

        sheet.batch_write("Sheet1", &[update(0, "Tool_Status", "Completed")]).unwrap();
        assert_eq!(sheet.rows("Sheet1")[0].get("Tool_Status"), "Completed");
        assert_eq!(sheet.writes().len(), 1);
    }

    #[test]
    fn test_bad_update_leaves_sheet_untouched() {
        let sheet = sheet();
        let updates = [update(0, "Key", "changed"), update(5, "Key", "x")];
        let err = sheet.batch_write("Sheet1", &updates).unwrap_err();

        assert!(matches!(err, SheetError::Write { count: 2, .. }));
        assert_eq!(sheet.rows("Sheet1")[0].get("Key"), "A1");
        assert!(sheet.writes().is_empty());
    }

    #[test]
    fn test_backup_is_json() {
        let sheet = sheet();
        let rows = sheet.load_rows("Sheet1").unwrap();
        let bytes = sheet.create_backup("Sheet1", &rows).unwrap();
        let back: Vec<SheetRow> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, rows);
    }

    fn fast_backoff(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_write_rides_out_rate_limit() {
        let sheet = sheet().with_backoff(fast_backoff(5));
        sheet.throttle_writes(2);

        sheet.batch_write("Sheet1", &[update(1, "Key", "B2")]).unwrap();
        assert_eq!(sheet.rows("Sheet1")[1].get("Key"), "B2");
        assert_eq!(sheet.writes().len(), 1);
    }

    #[test]
    fn test_write_gives_up_after_backoff() {
        let sheet = sheet().with_backoff(fast_backoff(3));
        sheet.throttle_writes(10);

        let err = sheet.batch_write("Sheet1", &[update(1, "Key", "B2")]).unwrap_err();
        assert!(matches!(err, SheetError::RateLimited { attempts: 3 }));
        assert_eq!(sheet.rows("Sheet1")[1].get("Key"), "A2");
        assert!(sheet.writes().is_empty());
    }

    #[test]
    fn test_backoff_delays_double() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_until_success() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let result = retry_with_backoff(&policy, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(CallError::RateLimited)
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy, || {
            calls.set(calls.get() + 1);
            Err(CallError::RateLimited)
        });
        assert!(matches!(result, Err(SheetError::RateLimited { attempts: 3 })));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_does_not_repeat_hard_failures() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_with_backoff(&BackoffPolicy::default(), || {
            calls.set(calls.get() + 1);
            Err(CallError::Failed(SheetError::Backup("denied".to_string())))
        });
        assert!(matches!(result, Err(SheetError::Backup(_))));
        assert_eq!(calls.get(), 1);
    }
}
