//! Google Sheets work queue adapter (values REST API).
//!
//! Columns are addressed by header name, never by fixed position: the
//! first row is the header, and both the pending-row scan and the done
//! update go through a header→index map. Rows may be ragged (trailing
//! empty cells are absent from the API response).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{error, warn};

use crate::core::error::{PipelineError, Result};
use crate::core::queue::WorkQueue;
use crate::core::types::{RowHandle, STATUS_PENDING, WorkItem, WorkItemFields, columns};

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_ATTEMPTS: u32 = 3;

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

pub struct SheetsQueue {
    spreadsheet_id: String,
    token: String,
    base_url: String,
    client: Client,
}

impl SheetsQueue {
    pub fn new(spreadsheet_id: String, token: String) -> Self {
        Self {
            spreadsheet_id,
            token,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch a range, retrying transport failures with doubling delay.
    async fn fetch_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url, self.spreadsheet_id, range
        );
        let mut delay = Duration::from_secs(1);
        let mut last_err = String::new();
        for attempt in 1..=FETCH_ATTEMPTS {
            match self
                .client
                .get(&url)
                .timeout(REQUEST_TIMEOUT)
                .bearer_auth(&self.token)
                .send()
                .await
            {
                Ok(res) if res.status().is_success() => {
                    let parsed: ValueRange = res.json().await.map_err(|e| {
                        PipelineError::Queue(format!("sheets response parse failed: {}", e))
                    })?;
                    return Ok(parsed.values);
                }
                Ok(res) => {
                    return Err(PipelineError::Queue(format!(
                        "sheets API error {}: {}",
                        res.status(),
                        res.text().await.unwrap_or_default()
                    )));
                }
                Err(e) => {
                    warn!(
                        "sheets fetch attempt {}/{} failed for '{}': {}",
                        attempt, FETCH_ATTEMPTS, range, e
                    );
                    last_err = e.to_string();
                    if attempt < FETCH_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(PipelineError::Queue(format!(
            "sheets fetch failed after {} attempts: {}",
            FETCH_ATTEMPTS, last_err
        )))
    }

    async fn update_cell(&self, source: &str, row: u32, col: usize, value: &str) -> Result<()> {
        let range = format!("{}!{}{}", source, column_letter(col), row);
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}?valueInputOption=RAW",
            self.base_url, self.spreadsheet_id, range
        );
        let body = serde_json::json!({ "values": [[value]] });
        let res = self
            .client
            .put(&url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Queue(format!("sheets update failed: {}", e)))?;
        if !res.status().is_success() {
            return Err(PipelineError::Queue(format!(
                "sheets update error {} for {}: {}",
                res.status(),
                range,
                res.text().await.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for SheetsQueue {
    async fn next_pending(&self, source: &str) -> Result<Option<WorkItem>> {
        let rows = self.fetch_values(source).await?;
        if rows.len() < 2 {
            return Ok(None);
        }
        let header = header_map(&rows[0]);
        if !header.contains_key(columns::STATUS) {
            error!("sheet '{}' has no '{}' column in its header", source, columns::STATUS);
            return Ok(None);
        }
        Ok(find_pending_row(&rows).map(|(row, fields)| WorkItem {
            handle: RowHandle(row),
            fields,
        }))
    }

    async fn mark_done(
        &self,
        source: &str,
        handle: RowHandle,
        fields: &WorkItemFields,
    ) -> Result<()> {
        let header_rows = self.fetch_values(&format!("{}!1:1", source)).await?;
        let header = header_rows
            .first()
            .map(|row| header_map(row))
            .unwrap_or_default();
        for (name, value) in fields {
            let Some(&col) = header.get(name.trim().to_lowercase().as_str()) else {
                warn!("sheet '{}' has no '{}' column, skipping", source, name);
                continue;
            };
            self.update_cell(source, handle.0, col, value).await?;
        }
        Ok(())
    }
}

/// Lowercased, trimmed header name → 0-based column index.
pub(crate) fn header_map(header: &[String]) -> HashMap<String, usize> {
    header
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_lowercase(), idx))
        .collect()
}

/// First data row (1-based spreadsheet index) whose status cell is
/// `"pending"`, with all cells mapped through the header.
pub(crate) fn find_pending_row(rows: &[Vec<String>]) -> Option<(u32, WorkItemFields)> {
    let header = rows.first()?;
    let header = header_map(header);
    let status_col = *header.get(columns::STATUS)?;

    for (offset, row) in rows[1..].iter().enumerate() {
        let status = row
            .get(status_col)
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default();
        if status != STATUS_PENDING {
            continue;
        }
        let mut fields = WorkItemFields::new();
        for (name, &idx) in &header {
            let value = row.get(idx).map(|s| s.trim().to_string()).unwrap_or_default();
            fields.insert(name.clone(), value);
        }
        return Some(((offset + 2) as u32, fields));
    }
    None
}

/// 0-based column index → A1 letters (0 = A, 26 = AA).
pub(crate) fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).expect("ASCII letters")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rows(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|row| row.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn first_pending_row_wins() {
        let rows = rows(&[
            &["topic", "status", "notes"],
            &["old", "done", ""],
            &["coffee", "pending", ""],
            &["tea", "pending", ""],
        ]);
        let (row, fields) = find_pending_row(&rows).unwrap();
        assert_eq!(row, 3);
        assert_eq!(fields.get("topic").unwrap(), "coffee");

        // Deterministic: a second scan without a write returns the same row.
        let (row_again, _) = find_pending_row(&rows).unwrap();
        assert_eq!(row_again, 3);
    }

    #[test]
    fn unknown_status_values_are_inert() {
        let rows = rows(&[
            &["topic", "status"],
            &["a", "draft"],
            &["b", "DONE"],
            &["c", " Pending "],
        ]);
        let (row, fields) = find_pending_row(&rows).unwrap();
        assert_eq!(row, 4);
        assert_eq!(fields.get("topic").unwrap(), "c");
    }

    #[test]
    fn ragged_rows_are_tolerated() {
        let rows = rows(&[
            &["topic", "status", "notes"],
            &["short"],
            &["coffee", "pending"],
        ]);
        let (row, fields) = find_pending_row(&rows).unwrap();
        assert_eq!(row, 3);
        assert_eq!(fields.get("notes").unwrap(), "");
    }

    #[test]
    fn missing_status_header_yields_nothing() {
        let rows = rows(&[&["topic", "state"], &["coffee", "pending"]]);
        assert!(find_pending_row(&rows).is_none());
    }

    #[test]
    fn column_letters_cover_multi_letter_range() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(5), "F");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[tokio::test]
    async fn next_pending_reads_the_sheet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1/values/VK"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "VK!A1:G4",
                "values": [
                    ["topic", "status", "scheduled_at"],
                    ["published already", "done", "2026-01-01"],
                    ["coffee", "pending", ""]
                ]
            })))
            .mount(&server)
            .await;

        let queue = SheetsQueue::new("sheet-1".to_string(), "token".to_string())
            .with_base_url(server.uri());
        let item = queue.next_pending("VK").await.unwrap().unwrap();
        assert_eq!(item.handle, RowHandle(3));
        assert_eq!(item.topic(), "coffee");
    }

    #[tokio::test]
    async fn next_pending_with_header_only_sheet_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1/values/VK"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [["topic", "status"]]
            })))
            .mount(&server)
            .await;

        let queue = SheetsQueue::new("sheet-1".to_string(), "token".to_string())
            .with_base_url(server.uri());
        assert!(queue.next_pending("VK").await.unwrap().is_none());
    }
}
