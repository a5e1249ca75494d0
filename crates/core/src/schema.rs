//! Static registry of the tabular sheets the assistant can query.
//!
//! The registry is consumed in three places: the optimizer reads foreign keys
//! and default pairings to infer joins, the intent extractor renders it into
//! the LLM prompt, and the data layer reads date columns, fill-down group keys
//! and freshness classes.

use std::fmt::Write as _;

use serde::Serialize;

use crate::domain::query::JoinEdge;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Number,
    Date,
    Boolean,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub description: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references_sheet: &'static str,
    pub references_column: &'static str,
}

/// How quickly a sheet's contents go stale; drives cache TTLs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Volatile,
    Standard,
    Reference,
    Archival,
    Static,
}

impl Freshness {
    pub fn ttl_secs(self) -> u64 {
        match self {
            Self::Volatile => 5 * 60,
            Self::Standard => 10 * 60,
            Self::Reference => 15 * 60,
            Self::Archival => 30 * 60,
            Self::Static => 60 * 60,
        }
    }
}

/// Business dimensions that conversation slots map onto sheet columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Country,
    Platform,
    Artist,
    Product,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SheetSchema {
    /// Logical key used in plans and prompts.
    pub key: &'static str,
    /// Physical sheet name at the data source.
    pub name: &'static str,
    pub description: &'static str,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Option<&'static str>,
    pub foreign_keys: Vec<ForeignKey>,
    pub date_column: Option<&'static str>,
    /// Column whose non-empty cell starts a new group in bundled exports.
    pub group_key: Option<&'static str>,
    pub freshness: Freshness,
    pub dimensions: Vec<(Dimension, &'static str)>,
    pub assistant_accessible: bool,
}

impl SheetSchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|def| def.name == column)
    }

    pub fn column(&self, column: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|def| def.name == column)
    }

    pub fn dimension_column(&self, dimension: Dimension) -> Option<&'static str> {
        self.dimensions.iter().find(|(dim, _)| *dim == dimension).map(|(_, column)| *column)
    }

    pub fn fills_down(&self) -> bool {
        self.group_key.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct SchemaRegistry {
    sheets: Vec<SheetSchema>,
    default_pairings: Vec<JoinEdge>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl SchemaRegistry {
    pub fn new(sheets: Vec<SheetSchema>, default_pairings: Vec<JoinEdge>) -> Self {
        Self { sheets, default_pairings }
    }

    pub fn standard() -> Self {
        Self::new(standard_sheets(), standard_pairings())
    }

    pub fn sheet(&self, key: &str) -> Option<&SheetSchema> {
        self.sheets.iter().find(|sheet| sheet.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sheet(key).is_some()
    }

    pub fn sheets(&self) -> impl Iterator<Item = &SheetSchema> {
        self.sheets.iter()
    }

    pub fn sheet_keys(&self) -> Vec<&'static str> {
        self.sheets.iter().map(|sheet| sheet.key).collect()
    }

    pub fn date_column(&self, key: &str) -> Option<&'static str> {
        self.sheet(key).and_then(|sheet| sheet.date_column)
    }

    pub fn dimension_column(&self, key: &str, dimension: Dimension) -> Option<&'static str> {
        self.sheet(key).and_then(|sheet| sheet.dimension_column(dimension))
    }

    /// Declared foreign key from either side of the pair. The referencing
    /// sheet becomes the left side of the edge.
    pub fn foreign_key_between(&self, first: &str, second: &str) -> Option<JoinEdge> {
        let declared = |from: &str, to: &str| {
            let sheet = self.sheet(from)?;
            sheet.foreign_keys.iter().find(|fk| fk.references_sheet == to).map(|fk| JoinEdge {
                left_sheet: from.to_owned(),
                right_sheet: to.to_owned(),
                left_key: fk.column.to_owned(),
                right_key: fk.references_column.to_owned(),
            })
        };

        declared(first, second).or_else(|| declared(second, first))
    }

    pub fn default_pairing(&self, first: &str, second: &str) -> Option<JoinEdge> {
        self.default_pairings
            .iter()
            .find(|edge| {
                (edge.left_sheet == first && edge.right_sheet == second)
                    || (edge.left_sheet == second && edge.right_sheet == first)
            })
            .cloned()
    }

    /// Compact description of every assistant-accessible sheet for prompts.
    pub fn prompt_summary(&self) -> String {
        let mut summary = String::from("Available sheets:\n");
        for sheet in self.sheets.iter().filter(|sheet| sheet.assistant_accessible) {
            let columns =
                sheet.columns.iter().map(|column| column.name).collect::<Vec<_>>().join(", ");
            let _ = writeln!(summary, "- {} ({}): {}", sheet.key, sheet.description, columns);
            if let Some(date_column) = sheet.date_column {
                let _ = writeln!(summary, "  date column: {date_column}");
            }
            for fk in &sheet.foreign_keys {
                let _ = writeln!(
                    summary,
                    "  join: {}.{} -> {}.{}",
                    sheet.key, fk.column, fk.references_sheet, fk.references_column
                );
            }
        }
        summary
    }

    pub fn detailed_schema(&self, key: &str) -> Option<String> {
        let sheet = self.sheet(key)?;
        let mut detail = format!("Sheet: {} ({})\n{}\n", sheet.key, sheet.name, sheet.description);
        if let Some(primary_key) = sheet.primary_key {
            let _ = writeln!(detail, "Primary key: {primary_key}");
        }
        detail.push_str("Columns:\n");
        for column in &sheet.columns {
            let _ = writeln!(
                detail,
                "- {} [{:?}]: {}",
                column.name, column.column_type, column.description
            );
        }
        if !sheet.foreign_keys.is_empty() {
            detail.push_str("Relations:\n");
            for fk in &sheet.foreign_keys {
                let _ = writeln!(
                    detail,
                    "- {} -> {}.{}",
                    fk.column, fk.references_sheet, fk.references_column
                );
            }
        }
        Some(detail)
    }
}

fn col(name: &'static str, column_type: ColumnType, description: &'static str) -> ColumnDef {
    ColumnDef { name, column_type, description }
}

fn fk(
    column: &'static str,
    references_sheet: &'static str,
    references_column: &'static str,
) -> ForeignKey {
    ForeignKey { column, references_sheet, references_column }
}

pub const ARTIST_COLUMN: &str = "artist_name (kr)";
pub const REVENUE_COLUMN: &str = "Total GMV";
pub const QUANTITY_COLUMN: &str = "구매수량";

fn standard_sheets() -> Vec<SheetSchema> {
    use ColumnType::{Boolean, Date, Number, String as Text};

    let mut sheets = vec![
        SheetSchema {
            key: "order",
            name: "order",
            description: "Order ledger, one row per order",
            columns: vec![
                col("order_code", Text, "Order code (unique)"),
                col("order_created", Date, "Order creation timestamp"),
                col("user_id", Number, "Customer id"),
                col(REVENUE_COLUMN, Number, "Gross merchandise value (USD)"),
                col("platform", Text, "Ordering platform: iOS, Android, Web"),
                col("PG사", Text, "Payment gateway"),
                col("method", Text, "Payment method"),
            ],
            primary_key: Some("order_code"),
            foreign_keys: vec![fk("user_id", "users", "ID")],
            date_column: Some("order_created"),
            group_key: None,
            freshness: Freshness::Volatile,
            dimensions: vec![(Dimension::Platform, "platform")],
            assistant_accessible: true,
        },
        SheetSchema {
            key: "logistics",
            name: "logistics",
            description: "Shipment lines, one row per shipped item, bundled by order",
            columns: vec![
                col("order_code", Text, "Order code"),
                col("order_created", Date, "Order creation date"),
                col("shipment_id", Text, "Shipment id"),
                col("product_id", Text, "Product id"),
                col("product_name", Text, "Product name"),
                col(ARTIST_COLUMN, Text, "Artist name"),
                col("country", Text, "Destination country code"),
                col("logistics", Text, "Logistics status"),
                col("처리상태", Text, "Processing status"),
                col(QUANTITY_COLUMN, Number, "Purchased quantity"),
                col(REVENUE_COLUMN, Number, "Gross merchandise value (USD)"),
                col("user_id", Number, "Customer id"),
                col("국제송장번호", Text, "International tracking number"),
                col("국내송장번호", Text, "Domestic tracking number"),
            ],
            primary_key: Some("shipment_id"),
            foreign_keys: vec![
                fk("order_code", "order", "order_code"),
                fk("user_id", "users", "ID"),
            ],
            date_column: Some("order_created"),
            group_key: Some("order_code"),
            freshness: Freshness::Volatile,
            dimensions: vec![
                (Dimension::Country, "country"),
                (Dimension::Artist, ARTIST_COLUMN),
                (Dimension::Product, "product_name"),
            ],
            assistant_accessible: true,
        },
        SheetSchema {
            key: "users",
            name: "users",
            description: "Customer accounts",
            columns: vec![
                col("ID", Number, "Customer id (unique)"),
                col("NAME", Text, "Customer name"),
                col("EMAIL", Text, "Email address"),
                col("COUNTRY", Text, "Country code"),
                col("CREATED_AT", Date, "Sign-up date"),
            ],
            primary_key: Some("ID"),
            foreign_keys: Vec::new(),
            date_column: Some("CREATED_AT"),
            group_key: None,
            freshness: Freshness::Reference,
            dimensions: vec![(Dimension::Country, "COUNTRY")],
            assistant_accessible: true,
        },
        SheetSchema {
            key: "artists",
            name: "artists",
            description: "Artist roster and live listing counts",
            columns: vec![
                col("(KR)작가명", Text, "Artist name"),
                col("(KR)Live 작품수", Number, "Live listings in KR"),
                col("(Global)Live 작품수", Number, "Live listings globally"),
                col("artist_id", Text, "Artist id"),
                col("email", Text, "Artist email"),
                col("작가 등록일 (Global)", Date, "Global registration date"),
                col("삭제일", Date, "Churn date"),
            ],
            primary_key: None,
            foreign_keys: Vec::new(),
            date_column: None,
            group_key: None,
            freshness: Freshness::Reference,
            dimensions: vec![(Dimension::Artist, "(KR)작가명")],
            assistant_accessible: true,
        },
        SheetSchema {
            key: "review",
            name: "review",
            description: "Customer product reviews",
            columns: vec![
                col("order_code", Text, "Order code"),
                col("user_id", Number, "Customer id"),
                col("product_id", Text, "Product id"),
                col("rating", Number, "Rating 1-5"),
                col("review_text", Text, "Review body"),
                col("review_date", Date, "Review date"),
                col("country", Text, "Reviewer country"),
                col("has_image", Boolean, "Review includes an image"),
            ],
            primary_key: None,
            foreign_keys: vec![
                fk("order_code", "order", "order_code"),
                fk("user_id", "users", "ID"),
            ],
            date_column: Some("review_date"),
            group_key: None,
            freshness: Freshness::Standard,
            dimensions: vec![(Dimension::Country, "country")],
            assistant_accessible: true,
        },
        SheetSchema {
            key: "settlement_records",
            name: "Settlement_records",
            description: "Carrier settlement lines per shipment",
            columns: vec![
                col("period", Text, "Settlement period (YYYY-MM)"),
                col("shipment_id", Text, "Shipment id"),
                col("carrier", Text, "Carrier"),
                col("country", Text, "Destination country"),
                col("weight", Number, "Weight (kg)"),
                col("actual_cost", Number, "Billed cost (KRW)"),
                col("expected_cost", Number, "Expected cost (KRW)"),
                col("difference", Number, "Billed minus expected (KRW)"),
            ],
            primary_key: None,
            foreign_keys: vec![fk("shipment_id", "logistics", "shipment_id")],
            date_column: None,
            group_key: None,
            freshness: Freshness::Archival,
            dimensions: vec![(Dimension::Country, "country")],
            assistant_accessible: true,
        },
        SheetSchema {
            key: "user_locale",
            name: "user_locale",
            description: "Customer locale and timezone",
            columns: vec![
                col("user_id", Number, "Customer id"),
                col("country_code", Text, "Country code"),
                col("region", Text, "Region"),
                col("timezone", Text, "IANA timezone"),
            ],
            primary_key: None,
            foreign_keys: vec![fk("user_id", "users", "ID")],
            date_column: None,
            group_key: None,
            freshness: Freshness::Reference,
            dimensions: vec![(Dimension::Country, "country_code")],
            assistant_accessible: false,
        },
    ];

    for (key, name, description) in [
        ("rate_lotte_global", "Rate_LotteGlobal", "LotteGlobal shipping rate card"),
        ("rate_ems", "Rate_EMS", "EMS shipping rate card"),
        ("rate_kpacket", "Rate_KPacket", "K-Packet shipping rate card"),
    ] {
        sheets.push(SheetSchema {
            key,
            name,
            description,
            columns: vec![
                col("country", Text, "Country code"),
                col("weight_from", Number, "Weight band start (kg)"),
                col("weight_to", Number, "Weight band end (kg)"),
                col("rate", Number, "Rate (KRW)"),
            ],
            primary_key: None,
            foreign_keys: Vec::new(),
            date_column: None,
            group_key: None,
            freshness: Freshness::Static,
            dimensions: vec![(Dimension::Country, "country")],
            assistant_accessible: false,
        });
    }

    sheets
}

fn standard_pairings() -> Vec<JoinEdge> {
    let pair = |left: &str, right: &str, left_key: &str, right_key: &str| JoinEdge {
        left_sheet: left.to_owned(),
        right_sheet: right.to_owned(),
        left_key: left_key.to_owned(),
        right_key: right_key.to_owned(),
    };

    vec![
        pair("order", "logistics", "order_code", "order_code"),
        pair("order", "users", "user_id", "ID"),
        pair("logistics", "artists", ARTIST_COLUMN, "(KR)작가명"),
    ]
}

#[cfg(test)]
mod tests {
    use super::{Dimension, Freshness, SchemaRegistry};

    #[test]
    fn foreign_key_lookup_orients_edge_from_referencing_sheet() {
        let registry = SchemaRegistry::standard();

        let edge = registry.foreign_key_between("users", "order").expect("fk");
        assert_eq!(edge.left_sheet, "order");
        assert_eq!(edge.left_key, "user_id");
        assert_eq!(edge.right_sheet, "users");
        assert_eq!(edge.right_key, "ID");

        assert!(registry.foreign_key_between("artists", "users").is_none());
    }

    #[test]
    fn default_pairing_covers_undeclared_relations() {
        let registry = SchemaRegistry::standard();

        assert!(registry.foreign_key_between("logistics", "artists").is_none());
        let edge = registry.default_pairing("artists", "logistics").expect("pairing");
        assert_eq!(edge.left_sheet, "logistics");
        assert_eq!(edge.right_key, "(KR)작가명");
    }

    #[test]
    fn sheet_metadata_drives_data_layer_behavior() {
        let registry = SchemaRegistry::standard();

        assert_eq!(registry.date_column("users"), Some("CREATED_AT"));
        assert_eq!(registry.date_column("artists"), None);
        assert!(registry.sheet("logistics").expect("logistics").fills_down());
        assert_eq!(registry.dimension_column("logistics", Dimension::Country), Some("country"));
        assert_eq!(registry.dimension_column("order", Dimension::Country), None);
        assert_eq!(
            registry.sheet("settlement_records").expect("settlement").freshness,
            Freshness::Archival
        );
    }

    #[test]
    fn prompt_summary_lists_only_accessible_sheets() {
        let summary = SchemaRegistry::standard().prompt_summary();

        assert!(summary.contains("- order ("));
        assert!(summary.contains("join: order.user_id -> users.ID"));
        assert!(!summary.contains("rate_ems"));
        assert!(!summary.contains("user_locale"));
    }
}
