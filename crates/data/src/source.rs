use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use tabula_core::domain::row::{cell_is_empty, Row};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("sheet `{0}` does not exist at the data source")]
    UnknownSheet(String),
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    #[error("could not read fixture `{path}`: {source}")]
    ReadFixture { path: PathBuf, source: std::io::Error },
    #[error("could not decode fixture `{path}`: {source}")]
    DecodeFixture { path: PathBuf, source: serde_json::Error },
}

/// Tabular data provider. Rows come back keyed by trimmed header; when
/// `fill_down` names a group column, blank cells inherit the value above
/// within the same group.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn sheet_rows(&self, sheet: &str, fill_down: Option<&str>) -> Result<Vec<Row>, SourceError>;

    /// Physical sheet names the source can serve.
    async fn sheet_names(&self) -> Vec<String>;
}

/// Raw header + cell grid as exported by a spreadsheet.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SheetGrid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum FixtureSheet {
    Grid(SheetGrid),
    Rows(Vec<Row>),
}

/// Converts a grid to header-keyed rows. Entirely blank rows are dropped and
/// blank headers are skipped.
pub fn grid_to_rows(grid: &SheetGrid, fill_down: Option<&str>) -> Vec<Row> {
    let headers = grid.headers.iter().map(|header| header.trim().to_owned()).collect::<Vec<_>>();

    let mut rows = grid
        .rows
        .iter()
        .filter(|cells| !cells.iter().all(cell_is_empty))
        .map(|cells| {
            headers
                .iter()
                .enumerate()
                .filter(|(_, header)| !header.is_empty())
                .map(|(index, header)| {
                    (header.clone(), cells.get(index).cloned().unwrap_or(Value::String(String::new())))
                })
                .collect::<Row>()
        })
        .collect::<Vec<_>>();

    if let Some(group_key) = fill_down {
        fill_down_rows(&mut rows, group_key);
    }
    rows
}

/// Bundled exports only write order-level cells on the first line of each
/// group. A non-empty `group_key` cell starts a new group and resets the
/// carried values; blank cells take the last value seen in the group.
pub fn fill_down_rows(rows: &mut [Row], group_key: &str) {
    let mut carried: Map<String, Value> = Map::new();

    for row in rows.iter_mut() {
        let starts_group = row.get(group_key).is_some_and(|value| !cell_is_empty(value));
        if starts_group {
            carried.clear();
        }

        for (column, value) in row.iter_mut() {
            if cell_is_empty(value) {
                if let Some(previous) = carried.get(column) {
                    *value = previous.clone();
                }
            } else {
                carried.insert(column.clone(), value.clone());
            }
        }

        for (column, value) in &carried {
            if !row.contains_key(column) {
                row.insert(column.clone(), value.clone());
            }
        }
    }
}

/// Sheet store backed by memory; used for fixtures, the demo dataset and tests.
#[derive(Default)]
pub struct InMemoryDataSource {
    sheets: RwLock<HashMap<String, Vec<Row>>>,
    fetches: AtomicUsize,
}

impl InMemoryDataSource {
    pub fn new(sheets: HashMap<String, Vec<Row>>) -> Self {
        Self { sheets: RwLock::new(sheets), fetches: AtomicUsize::new(0) }
    }

    /// Loads `{ "<sheet>": [ {row}, ... ] | { "headers": [...], "rows": [[...]] } }`.
    pub fn from_json_file(path: &Path) -> Result<Self, SourceError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| SourceError::ReadFixture { path: path.to_path_buf(), source })?;
        let parsed: HashMap<String, FixtureSheet> = serde_json::from_str(&raw)
            .map_err(|source| SourceError::DecodeFixture { path: path.to_path_buf(), source })?;

        let sheets = parsed
            .into_iter()
            .map(|(name, sheet)| {
                let rows = match sheet {
                    FixtureSheet::Grid(grid) => grid_to_rows(&grid, None),
                    FixtureSheet::Rows(rows) => rows,
                };
                (name, rows)
            })
            .collect();
        Ok(Self::new(sheets))
    }

    pub async fn insert_sheet(&self, sheet: impl Into<String>, rows: Vec<Row>) {
        let mut sheets = self.sheets.write().await;
        sheets.insert(sheet.into(), rows);
    }

    /// Number of `sheet_rows` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    async fn sheet_rows(&self, sheet: &str, fill_down: Option<&str>) -> Result<Vec<Row>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let sheets = self.sheets.read().await;
        let mut rows = sheets.get(sheet).cloned().ok_or_else(|| SourceError::UnknownSheet(sheet.to_owned()))?;
        if let Some(group_key) = fill_down {
            fill_down_rows(&mut rows, group_key);
        }
        Ok(rows)
    }

    async fn sheet_names(&self) -> Vec<String> {
        let sheets = self.sheets.read().await;
        let mut names = sheets.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}
