//! Spreadsheet row analysis: read rows from a Google Sheet, ask an LLM about
//! each one through a bounded task pool, and write the answers back as a
//! column.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::constants::SHEET_COLUMN_GROWTH;
use crate::error::AdtoonError;
use crate::gemini::GeminiClient;
use crate::openai::OpenAiClient;

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";

#[allow(clippy::expect_used)]
static SPREADSHEET_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("static regex")
});

/// 1-based column number to its letter name: 1 is `A`, 27 is `AA`.
/// Zero has no name and gives an empty string.
pub fn col_num_to_letter(mut n: usize) -> String {
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        n = (n - 1) / 26;
        #[allow(clippy::cast_possible_truncation)]
        letters.push(char::from(b'A' + rem as u8));
    }
    letters.iter().rev().collect()
}

/// Inverse of [col_num_to_letter], case-insensitive.
pub fn letter_to_col_num(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0usize, |acc, c| {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        let digit = (c as usize) - ('A' as usize) + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })
}

/// Pulls the spreadsheet id out of a `docs.google.com/spreadsheets/d/<id>/...`
/// URL.
pub fn spreadsheet_id_from_url(sheet_url: &str) -> Result<String, AdtoonError> {
    SPREADSHEET_ID
        .captures(sheet_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AdtoonError::BadRequest(format!("not a spreadsheet URL: {sheet_url}")))
}

/// `'Sheet name'!B7`, quoting the sheet name the way A1 notation wants.
pub fn a1_cell(sheet_name: &str, column: usize, row: usize) -> String {
    format!(
        "'{}'!{}{row}",
        sheet_name.replace('\'', "''"),
        col_num_to_letter(column)
    )
}

/// A worksheet's cells, header row split off.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SheetTable {
    /// Row 1
    pub headers: Vec<String>,
    /// Rows 2.., each padded to the header width
    pub rows: Vec<Vec<Value>>,
}

fn cell_text(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Numeric-looking text becomes a JSON number so the model sees `31`, not
/// `"31"`. Blank cells stay empty strings.
fn numericise(cell: Value) -> Value {
    let text = match cell {
        Value::String(text) => text,
        Value::Null => return Value::String(String::new()),
        other => return other,
    };
    let trimmed = text.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::String(text), Value::Number)
}

impl SheetTable {
    /// Builds a table from the raw `values` grid, header row first.
    pub fn from_values(values: Vec<Vec<Value>>) -> Self {
        let mut rows = values.into_iter();
        let headers: Vec<String> = rows
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(cell_text)
            .collect();
        let width = headers.len();
        let rows = rows
            .map(|row| {
                let mut row: Vec<Value> = row.into_iter().map(numericise).collect();
                row.resize(width, Value::String(String::new()));
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// One record per data row holding only `columns`, in the order given.
    /// Asking for a column the sheet doesn't have is an error.
    pub fn records(&self, columns: &[String]) -> Result<Vec<RowRecord>, AdtoonError> {
        let positions = columns
            .iter()
            .map(|column| {
                self.headers
                    .iter()
                    .position(|header| header == column)
                    .ok_or_else(|| AdtoonError::BadRequest(format!("no column named '{column}'")))
            })
            .collect::<Result<Vec<usize>, AdtoonError>>()?;

        Ok(self
            .rows
            .iter()
            .enumerate()
            .map(|(offset, row)| RowRecord {
                // header is row 1
                row_index: offset + 2,
                fields: columns
                    .iter()
                    .zip(&positions)
                    .map(|(column, pos)| (column.clone(), row[*pos].clone()))
                    .collect(),
            })
            .collect())
    }
}

/// The selected cells of one spreadsheet row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowRecord {
    /// 1-based spreadsheet row
    pub row_index: usize,
    /// `(column, value)` pairs in the requested column order
    pub fields: Vec<(String, Value)>,
}

impl Serialize for RowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl RowRecord {
    /// Pretty JSON object of the row's fields, used as the LLM user prompt.
    pub fn to_prompt(&self) -> Result<String, AdtoonError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// The LLM's answer for one row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowResult {
    /// 1-based spreadsheet row
    pub row_index: usize,
    /// Reply text
    pub result: String,
}

/// Something that can answer a system + user prompt pair.
#[async_trait]
pub trait RowAnalyst: Send + Sync {
    /// Returns the reply text for one row.
    async fn analyze(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AdtoonError>;
}

#[derive(Debug)]
enum Backend {
    OpenAi(OpenAiClient),
    Gemini(GeminiClient),
}

/// Chat model picked by name: `gemini*` goes to Google, everything else to
/// OpenAI Chat Completions.
#[derive(Debug)]
pub struct ChatAnalyst {
    model: String,
    backend: Backend,
}

impl ChatAnalyst {
    /// Builds the analyst for `model`, requiring the matching API key.
    pub fn for_model(
        model: &str,
        openai_api_key: Option<&str>,
        gemini_api_key: Option<&str>,
    ) -> Result<Self, AdtoonError> {
        let backend = if model.starts_with("gemini") {
            let key = gemini_api_key.ok_or_else(|| {
                AdtoonError::BadRequest(format!("{model} needs GEMINI_API_KEY"))
            })?;
            Backend::Gemini(GeminiClient::new(key)?)
        } else {
            let key = openai_api_key.ok_or_else(|| {
                AdtoonError::BadRequest(format!("{model} needs OPENAI_API_KEY"))
            })?;
            Backend::OpenAi(OpenAiClient::new(key)?)
        };
        Ok(Self {
            model: model.to_string(),
            backend,
        })
    }
}

#[async_trait]
impl RowAnalyst for ChatAnalyst {
    async fn analyze(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AdtoonError> {
        match &self.backend {
            Backend::OpenAi(client) => {
                client
                    .chat_completion(&self.model, system_prompt, user_prompt)
                    .await
            }
            Backend::Gemini(client) => {
                client
                    .generate(&self.model, system_prompt, user_prompt)
                    .await
            }
        }
    }
}

/// Sends every record to `analyst`, at most `concurrency` at a time, and
/// returns the answers sorted by row. Rows that fail are logged and left out.
#[instrument(skip_all, fields(rows = records.len(), concurrency = concurrency))]
pub async fn analyze_rows(
    analyst: &Arc<dyn RowAnalyst>,
    system_prompt: &str,
    records: Vec<RowRecord>,
    concurrency: usize,
) -> Vec<RowResult> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let system_prompt: Arc<str> = Arc::from(system_prompt);
    let mut tasks = JoinSet::new();

    for record in records {
        let permits = permits.clone();
        let analyst = analyst.clone();
        let system_prompt = system_prompt.clone();
        tasks.spawn(async move {
            let row_index = record.row_index;
            let outcome = async {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|err| AdtoonError::InternalServerError(err.to_string()))?;
                let prompt = record.to_prompt()?;
                analyst.analyze(&system_prompt, &prompt).await
            }
            .await;
            (row_index, outcome)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((row_index, Ok(result))) => {
                info!("Row {row_index} analyzed");
                results.push(RowResult { row_index, result });
            }
            Ok((row_index, Err(err))) => error!("Row {row_index} failed: {err}"),
            Err(err) => error!("Row task died: {err}"),
        }
    }
    results.sort_by_key(|result| result.row_index);
    results
}

/// A cell range and its values, as Sheets `values:batchUpdate` expects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValueRange {
    /// A1 range
    pub range: String,
    /// Row-major cell values
    pub values: Vec<Vec<String>>,
}

/// What writing a result column takes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnPlan {
    /// 1-based column the results go in
    pub column: usize,
    /// The column is new and gets a header cell
    pub writes_header: bool,
    /// Grid width to grow to first, if the sheet is too narrow
    pub grow_to: Option<usize>,
    /// Header (if new) then one cell per result
    pub updates: Vec<ValueRange>,
}

/// Works out where `new_column` goes and which cells to write. An existing
/// header of that name is reused; otherwise the column is appended after the
/// last header and the grid grows by a margin when it's too narrow.
pub fn plan_column_update(
    sheet_name: &str,
    headers: &[String],
    grid_columns: usize,
    new_column: &str,
    results: &[RowResult],
) -> ColumnPlan {
    let existing = headers.iter().position(|header| header == new_column);
    let column = existing.map_or(headers.len() + 1, |pos| pos + 1);
    let writes_header = existing.is_none();
    let grow_to = (column > grid_columns).then_some(headers.len() + SHEET_COLUMN_GROWTH);

    let mut updates = Vec::with_capacity(results.len() + 1);
    if writes_header {
        updates.push(ValueRange {
            range: a1_cell(sheet_name, column, 1),
            values: vec![vec![new_column.to_string()]],
        });
    }
    updates.extend(results.iter().map(|result| ValueRange {
        range: a1_cell(sheet_name, column, result.row_index),
        values: vec![vec![result.result.clone()]],
    }));

    ColumnPlan {
        column,
        writes_header,
        grow_to,
        updates,
    }
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

/// The parts of a worksheet's properties we use.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    /// Numeric worksheet id
    pub sheet_id: i64,
    /// Tab name
    pub title: String,
    /// Grid size
    #[serde(default)]
    pub grid_properties: GridProperties,
}

/// Worksheet grid dimensions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridProperties {
    /// Rows in the grid
    #[serde(default)]
    pub row_count: usize,
    /// Columns in the grid
    #[serde(default)]
    pub column_count: usize,
}

/// Google Sheets v4 over REST with an OAuth bearer token.
#[derive(Clone, Debug)]
pub struct SheetsClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl SheetsClient {
    /// A client authenticating with `token`.
    pub fn new(token: &str) -> Result<Self, AdtoonError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            token: token.to_string(),
            base_url: SHEETS_BASE_URL.to_string(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, AdtoonError> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|()| AdtoonError::InternalServerError("base URL can't take a path".to_string()))?
            .push("spreadsheets")
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, AdtoonError> {
        let resp = request.bearer_auth(&self.token).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(AdtoonError::Api(format!(
                "Sheets API error {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        Ok(bytes.to_vec())
    }

    /// Every populated cell of `sheet_name`.
    #[instrument(skip(self))]
    pub async fn fetch_table(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<SheetTable, AdtoonError> {
        let range = format!("'{}'", sheet_name.replace('\'', "''"));
        let url = self.url(&[spreadsheet_id, "values", &range])?;
        let bytes = self.send(self.client.get(url)).await?;
        let parsed: ValuesResponse = serde_json::from_slice(&bytes)?;
        let table = SheetTable::from_values(parsed.values);
        debug!(
            "Fetched {} columns x {} rows",
            table.headers.len(),
            table.rows.len()
        );
        Ok(table)
    }

    /// Properties of the tab named `sheet_name`.
    pub async fn sheet_properties(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<SheetProperties, AdtoonError> {
        let mut url = self.url(&[spreadsheet_id])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties");
        let bytes = self.send(self.client.get(url)).await?;
        let parsed: SpreadsheetResponse = serde_json::from_slice(&bytes)?;
        parsed
            .sheets
            .into_iter()
            .map(|entry| entry.properties)
            .find(|props| props.title == sheet_name)
            .ok_or_else(|| AdtoonError::NotFound(format!("no sheet named '{sheet_name}'")))
    }

    /// Sets the grid's column count.
    pub async fn resize_columns(
        &self,
        spreadsheet_id: &str,
        sheet_id: i64,
        column_count: usize,
    ) -> Result<(), AdtoonError> {
        let url = self.url(&[&format!("{spreadsheet_id}:batchUpdate")])?;
        let body = json!({
            "requests": [{
                "updateSheetProperties": {
                    "properties": {
                        "sheetId": sheet_id,
                        "gridProperties": {"columnCount": column_count}
                    },
                    "fields": "gridProperties.columnCount"
                }
            }]
        });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    /// Writes all `updates` in one call, values taken as-is.
    pub async fn batch_update_values(
        &self,
        spreadsheet_id: &str,
        updates: &[ValueRange],
    ) -> Result<(), AdtoonError> {
        if updates.is_empty() {
            return Ok(());
        }
        let url = self.url(&[spreadsheet_id, "values:batchUpdate"])?;
        let body = json!({"valueInputOption": "RAW", "data": updates});
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }
}

/// One row-analysis run against a sheet.
#[derive(Clone, Debug)]
pub struct SheetJob {
    /// Spreadsheet URL
    pub sheet_url: String,
    /// Tab to read and write
    pub sheet_name: String,
    /// Columns fed to the model
    pub columns: Vec<String>,
    /// System prompt for every row
    pub system_prompt: String,
    /// Header of the result column
    pub new_column: String,
    /// In-flight LLM calls cap
    pub concurrency: usize,
}

impl SheetJob {
    /// Reads the sheet, analyzes each row and writes the result column.
    /// Returns the results that were written.
    #[instrument(skip_all, fields(sheet = %self.sheet_name, column = %self.new_column))]
    pub async fn run(
        &self,
        sheets: &SheetsClient,
        analyst: &Arc<dyn RowAnalyst>,
    ) -> Result<Vec<RowResult>, AdtoonError> {
        let spreadsheet_id = spreadsheet_id_from_url(&self.sheet_url)?;
        let table = sheets.fetch_table(&spreadsheet_id, &self.sheet_name).await?;
        let records = table.records(&self.columns)?;
        info!("Analyzing {} rows", records.len());

        let results = analyze_rows(analyst, &self.system_prompt, records, self.concurrency).await;
        if results.is_empty() {
            warn!("No rows were analyzed, leaving the sheet alone");
            return Ok(results);
        }

        let props = sheets
            .sheet_properties(&spreadsheet_id, &self.sheet_name)
            .await?;
        let plan = plan_column_update(
            &self.sheet_name,
            &table.headers,
            props.grid_properties.column_count,
            &self.new_column,
            &results,
        );
        if let Some(columns) = plan.grow_to {
            info!(
                "Growing grid from {} to {columns} columns",
                props.grid_properties.column_count
            );
            sheets
                .resize_columns(&spreadsheet_id, props.sheet_id, columns)
                .await?;
        }
        info!(
            "Writing {} results to column {}",
            results.len(),
            col_num_to_letter(plan.column)
        );
        sheets
            .batch_update_values(&spreadsheet_id, &plan.updates)
            .await?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn column_letters() {
        for (n, letters) in [(1, "A"), (26, "Z"), (27, "AA"), (52, "AZ"), (53, "BA"), (702, "ZZ"), (703, "AAA")] {
            assert_eq!(col_num_to_letter(n), letters);
            assert_eq!(letter_to_col_num(letters), Some(n));
        }
        assert_eq!(col_num_to_letter(0), "");
        assert_eq!(letter_to_col_num("ab"), Some(28));
        assert_eq!(letter_to_col_num(""), None);
        assert_eq!(letter_to_col_num("A1"), None);
        for n in 1..=2000 {
            assert_eq!(letter_to_col_num(&col_num_to_letter(n)), Some(n));
        }
    }

    #[test]
    fn spreadsheet_ids() {
        assert_eq!(
            spreadsheet_id_from_url(
                "https://docs.google.com/spreadsheets/d/1AbC-d_9/edit#gid=0"
            )
            .expect("id"),
            "1AbC-d_9"
        );
        assert!(matches!(
            spreadsheet_id_from_url("https://example.com/nope"),
            Err(AdtoonError::BadRequest(_))
        ));
    }

    #[test]
    fn a1_cells_quote_sheet_names() {
        assert_eq!(a1_cell("Sheet1", 3, 2), "'Sheet1'!C2");
        assert_eq!(a1_cell("Bob's", 27, 10), "'Bob''s'!AA10");
    }

    fn table() -> SheetTable {
        SheetTable::from_values(vec![
            vec![json!("name"), json!("age"), json!("note")],
            vec![json!("김철수"), json!("31"), json!("first")],
            vec![json!("Lee"), json!("3.5"), Value::Null],
            vec![json!("Park"), json!(" 42 "), json!("007 agent")],
        ])
    }

    #[test]
    fn records_keep_requested_order_and_row_numbers() {
        let records = table()
            .records(&["note".to_string(), "name".to_string()])
            .expect("records");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].row_index, 2);
        assert_eq!(records[2].row_index, 4);
        assert_eq!(
            records[0].fields,
            vec![
                ("note".to_string(), json!("first")),
                ("name".to_string(), json!("김철수"))
            ]
        );
        assert_eq!(records[1].fields[0].1, json!(""));
        let prompt = records[0].to_prompt().expect("json");
        assert_eq!(prompt, "{\n  \"note\": \"first\",\n  \"name\": \"김철수\"\n}");
    }

    #[test]
    fn numeric_text_becomes_numbers_and_missing_columns_fail() {
        let table = table();
        let records = table.records(&["age".to_string()]).expect("records");
        assert_eq!(records[0].fields[0].1, json!(31));
        assert_eq!(records[1].fields[0].1, json!(3.5));
        assert_eq!(records[2].fields[0].1, json!(42));
        assert_eq!(records[0].to_prompt().expect("json"), "{\n  \"age\": 31\n}");
        assert!(matches!(
            table.records(&["salary".to_string()]),
            Err(AdtoonError::BadRequest(_))
        ));
    }

    #[test]
    fn short_rows_are_padded_and_text_is_kept() {
        let table = SheetTable::from_values(vec![
            vec![json!("a"), json!("b"), json!("c")],
            vec![json!("1e3"), json!("007 agent")],
            vec![json!(true)],
        ]);
        assert_eq!(table.rows[0], vec![json!(1000.0), json!("007 agent"), json!("")]);
        assert_eq!(table.rows[1], vec![json!(true), json!(""), json!("")]);
        assert!(SheetTable::from_values(Vec::new()).headers.is_empty());
    }

    fn results(rows: &[usize]) -> Vec<RowResult> {
        rows.iter()
            .map(|row| RowResult {
                row_index: *row,
                result: format!("r{row}"),
            })
            .collect()
    }

    #[test]
    fn new_column_is_appended_with_header() {
        let headers: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let plan = plan_column_update("S", &headers, 2, "out", &results(&[2, 4]));
        assert_eq!(plan.column, 3);
        assert!(plan.writes_header);
        assert_eq!(plan.grow_to, Some(12));
        let ranges: Vec<&str> = plan.updates.iter().map(|u| u.range.as_str()).collect();
        assert_eq!(ranges, vec!["'S'!C1", "'S'!C2", "'S'!C4"]);
        assert_eq!(plan.updates[2].values, vec![vec!["r4".to_string()]]);
    }

    #[test]
    fn wide_grids_are_not_resized() {
        let headers: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let plan = plan_column_update("S", &headers, 26, "out", &results(&[2]));
        assert_eq!(plan.column, 3);
        assert_eq!(plan.grow_to, None);
    }

    #[test]
    fn existing_column_is_reused() {
        let headers: Vec<String> = ["a", "out", "b"].iter().map(|s| s.to_string()).collect();
        let plan = plan_column_update("S", &headers, 3, "out", &results(&[2, 3]));
        assert_eq!(plan.column, 2);
        assert!(!plan.writes_header);
        assert_eq!(plan.grow_to, None);
        assert_eq!(plan.updates.len(), 2);
        assert_eq!(plan.updates[0].range, "'S'!B2");
    }

    /// Sleeps longer for earlier rows so completions come back reversed.
    #[derive(Default)]
    struct SlowAnalyst {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_row: Option<usize>,
    }

    #[async_trait]
    impl RowAnalyst for SlowAnalyst {
        async fn analyze(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AdtoonError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let row: u64 = user_prompt
                .split('"')
                .nth(3)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(1000 - row * 10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_row == Some(usize::try_from(row).unwrap_or(0)) {
                return Err(AdtoonError::Api("model refused".to_string()));
            }
            Ok(format!("{system_prompt}:{row}"))
        }
    }

    fn numbered_records(count: usize) -> Vec<RowRecord> {
        (0..count)
            .map(|offset| RowRecord {
                row_index: offset + 2,
                fields: vec![("row".to_string(), json!((offset + 2).to_string()))],
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_sorted_and_concurrency_is_capped() {
        let analyst = Arc::new(SlowAnalyst::default());
        let dyn_analyst: Arc<dyn RowAnalyst> = analyst.clone();
        let results = analyze_rows(&dyn_analyst, "sys", numbered_records(20), 3).await;
        let rows: Vec<usize> = results.iter().map(|r| r.row_index).collect();
        assert_eq!(rows, (2..22).collect::<Vec<_>>());
        assert_eq!(results[0].result, "sys:2");
        assert_eq!(analyst.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rows_are_skipped() {
        let analyst = Arc::new(SlowAnalyst {
            fail_row: Some(4),
            ..Default::default()
        });
        let analyst: Arc<dyn RowAnalyst> = analyst;
        let results = analyze_rows(&analyst, "sys", numbered_records(4), 8).await;
        let rows: Vec<usize> = results.iter().map(|r| r.row_index).collect();
        assert_eq!(rows, vec![2, 3, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_concurrency_still_makes_progress() {
        let analyst = Arc::new(SlowAnalyst::default());
        let dyn_analyst: Arc<dyn RowAnalyst> = analyst.clone();
        let results = analyze_rows(&dyn_analyst, "s", numbered_records(2), 0).await;
        assert_eq!(results.len(), 2);
        assert_eq!(analyst.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gemini_models_need_a_gemini_key() {
        assert!(matches!(
            ChatAnalyst::for_model("gemini-1.5-flash", Some("sk"), None),
            Err(AdtoonError::BadRequest(_))
        ));
        assert!(matches!(
            ChatAnalyst::for_model("gpt-4o-mini", None, Some("g")),
            Err(AdtoonError::BadRequest(_))
        ));
        assert!(ChatAnalyst::for_model("gpt-4o-mini", Some("sk"), None).is_ok());
    }
}
