use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};

use tabula_core::domain::row::Row;
use tabula_core::schema::{ARTIST_COLUMN, QUANTITY_COLUMN, REVENUE_COLUMN};

use crate::source::InMemoryDataSource;

/// Days of order history generated behind `today`.
pub const DEMO_HISTORY_DAYS: i64 = 90;
pub const DEMO_ORDER_COUNT: usize = 150;

struct DemoCustomer {
    id: u32,
    name: &'static str,
    email: &'static str,
    country: &'static str,
    signed_up_days_ago: i64,
}

struct DemoArtist {
    artist_id: &'static str,
    name: &'static str,
    kr_live: u32,
    global_live: u32,
    registered_days_ago: i64,
}

struct DemoProduct {
    product_id: &'static str,
    name: &'static str,
    artist: usize,
    unit_price: f64,
}

const CUSTOMERS: &[DemoCustomer] = &[
    DemoCustomer { id: 1001, name: "Aiko Tanaka", email: "aiko@example.jp", country: "JP", signed_up_days_ago: 720 },
    DemoCustomer { id: 1002, name: "Ben Carter", email: "ben@example.com", country: "US", signed_up_days_ago: 400 },
    DemoCustomer { id: 1003, name: "Mei Lin", email: "mei@example.tw", country: "TW", signed_up_days_ago: 310 },
    DemoCustomer { id: 1004, name: "Haruto Sato", email: "haruto@example.jp", country: "JP", signed_up_days_ago: 200 },
    DemoCustomer { id: 1005, name: "Chloe Ng", email: "chloe@example.sg", country: "SG", signed_up_days_ago: 150 },
    DemoCustomer { id: 1006, name: "Emma Wilson", email: "emma@example.com", country: "US", signed_up_days_ago: 95 },
    DemoCustomer { id: 1007, name: "Kenji Mori", email: "kenji@example.jp", country: "JP", signed_up_days_ago: 40 },
    DemoCustomer { id: 1008, name: "Grace Wong", email: "grace@example.hk", country: "HK", signed_up_days_ago: 12 },
];

const ARTISTS: &[DemoArtist] = &[
    DemoArtist { artist_id: "A-01", name: "달빛공방", kr_live: 42, global_live: 35, registered_days_ago: 900 },
    DemoArtist { artist_id: "A-02", name: "소소한도자기", kr_live: 28, global_live: 19, registered_days_ago: 610 },
    DemoArtist { artist_id: "A-03", name: "푸른실타래", kr_live: 55, global_live: 48, registered_days_ago: 480 },
    DemoArtist { artist_id: "A-04", name: "나무향기", kr_live: 17, global_live: 9, registered_days_ago: 260 },
    DemoArtist { artist_id: "A-05", name: "은하수주얼리", kr_live: 63, global_live: 51, registered_days_ago: 120 },
];

const PRODUCTS: &[DemoProduct] = &[
    DemoProduct { product_id: "P-101", name: "Moonlight Candle", artist: 0, unit_price: 24.0 },
    DemoProduct { product_id: "P-102", name: "Linen Pouch", artist: 0, unit_price: 18.5 },
    DemoProduct { product_id: "P-201", name: "Celadon Mug", artist: 1, unit_price: 32.0 },
    DemoProduct { product_id: "P-301", name: "Knitted Scarf", artist: 2, unit_price: 45.0 },
    DemoProduct { product_id: "P-302", name: "Embroidered Patch", artist: 2, unit_price: 9.5 },
    DemoProduct { product_id: "P-401", name: "Walnut Tray", artist: 3, unit_price: 38.0 },
    DemoProduct { product_id: "P-501", name: "Starlight Ring", artist: 4, unit_price: 65.0 },
    DemoProduct { product_id: "P-502", name: "Galaxy Earrings", artist: 4, unit_price: 52.0 },
];

const PLATFORMS: [&str; 3] = ["iOS", "Android", "Web"];
const GATEWAYS: [(&str, &str); 3] = [("Stripe", "card"), ("PayPal", "paypal"), ("Eximbay", "card")];

/// Deterministic demo dataset anchored at `today`: orders over the last
/// [`DEMO_HISTORY_DAYS`] days, their bundled shipment lines, customers,
/// artists and reviews. Shipment lines are exported bundled, so only the
/// first line of each order carries the order-level cells.
pub fn demo_dataset(today: NaiveDate) -> HashMap<String, Vec<Row>> {
    let mut orders = Vec::with_capacity(DEMO_ORDER_COUNT);
    let mut logistics = Vec::new();
    let mut reviews = Vec::new();

    for index in 0..DEMO_ORDER_COUNT {
        let days_ago = (index as i64 * 7 + index as i64 / 5) % DEMO_HISTORY_DAYS;
        let created = today - Duration::days(days_ago);
        let timestamp = format!("{} {:02}:{:02}:00", created.format("%Y-%m-%d"), 8 + index % 14, (index * 13) % 60);
        let customer = &CUSTOMERS[(index * 5 + 3) % CUSTOMERS.len()];
        let order_code = format!("O-{:05}", 10_000 + index);

        let line_count = if index % 4 == 0 { 2 } else { 1 };
        let mut order_total = 0.0;
        for line in 0..line_count {
            let product = &PRODUCTS[(index * 3 + line * 5) % PRODUCTS.len()];
            // one bulk order gives the analyzer an outlier to find
            let quantity = if index == 17 { 40 } else { 1 + (index + line) % 3 };
            let line_total = product.unit_price * quantity as f64;
            order_total += line_total;

            let first_line = line == 0;
            let delivered = days_ago > 7;
            logistics.push(row(json!({
                "order_code": if first_line { order_code.clone() } else { String::new() },
                "order_created": if first_line { timestamp.clone() } else { String::new() },
                "shipment_id": format!("S-{:05}-{}", 10_000 + index, line + 1),
                "product_id": product.product_id,
                "product_name": product.name,
                ARTIST_COLUMN: ARTISTS[product.artist].name,
                "country": if first_line { customer.country } else { "" },
                "logistics": if delivered { "delivered" } else { "in_transit" },
                "처리상태": if delivered { "배송완료" } else { "배송중" },
                QUANTITY_COLUMN: quantity.to_string(),
                REVENUE_COLUMN: money(line_total),
                "user_id": if first_line { customer.id.to_string() } else { String::new() },
                "국제송장번호": if delivered { format!("INT{:08}", 40_000_000 + index) } else { String::new() },
                "국내송장번호": format!("KR{:08}", 70_000_000 + index),
            })));
        }

        orders.push(row(json!({
            "order_code": order_code,
            "order_created": timestamp,
            "user_id": customer.id.to_string(),
            REVENUE_COLUMN: money(order_total),
            "platform": PLATFORMS[index % PLATFORMS.len()],
            "PG사": GATEWAYS[index % GATEWAYS.len()].0,
            "method": GATEWAYS[index % GATEWAYS.len()].1,
        })));

        let reviewed = created + Duration::days(5);
        if index % 3 == 0 && reviewed <= today {
            let rating = 3 + index % 3;
            reviews.push(row(json!({
                "order_code": order_code,
                "user_id": customer.id.to_string(),
                "product_id": PRODUCTS[(index * 3) % PRODUCTS.len()].product_id,
                "rating": rating.to_string(),
                "review_text": review_text(rating),
                "review_date": reviewed.format("%Y-%m-%d").to_string(),
                "country": customer.country,
                "has_image": if index % 2 == 0 { "TRUE" } else { "FALSE" },
            })));
        }
    }

    let users = CUSTOMERS
        .iter()
        .map(|customer| {
            row(json!({
                "ID": customer.id.to_string(),
                "NAME": customer.name,
                "EMAIL": customer.email,
                "COUNTRY": customer.country,
                "CREATED_AT": (today - Duration::days(customer.signed_up_days_ago)).format("%Y-%m-%d").to_string(),
            }))
        })
        .collect();

    let artists = ARTISTS
        .iter()
        .map(|artist| {
            row(json!({
                "(KR)작가명": artist.name,
                "(KR)Live 작품수": artist.kr_live.to_string(),
                "(Global)Live 작품수": artist.global_live.to_string(),
                "artist_id": artist.artist_id,
                "email": format!("{}@artists.example", artist.artist_id.to_ascii_lowercase()),
                "작가 등록일 (Global)": (today - Duration::days(artist.registered_days_ago)).format("%Y-%m-%d").to_string(),
                "삭제일": "",
            }))
        })
        .collect();

    HashMap::from([
        ("order".to_owned(), orders),
        ("logistics".to_owned(), logistics),
        ("users".to_owned(), users),
        ("artists".to_owned(), artists),
        ("review".to_owned(), reviews),
    ])
}

pub fn demo_source(today: NaiveDate) -> InMemoryDataSource {
    InMemoryDataSource::new(demo_dataset(today))
}

fn review_text(rating: usize) -> &'static str {
    match rating {
        5 => "Beautiful work, arrived safely and faster than expected.",
        4 => "Lovely piece, packaging could be sturdier.",
        _ => "Nice item but shipping took a long time.",
    }
}

fn money(value: f64) -> String {
    format!("{value:.2}")
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{demo_dataset, demo_source, DEMO_ORDER_COUNT};
    use crate::source::DataSource;
    use tabula_core::domain::row::{cell_as_date, cell_is_empty};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 20).expect("date")
    }

    #[test]
    fn dataset_is_deterministic_and_anchored_at_today() {
        let first = demo_dataset(today());
        let second = demo_dataset(today());
        assert_eq!(first, second);

        let orders = &first["order"];
        assert_eq!(orders.len(), DEMO_ORDER_COUNT);
        let dates = orders.iter().filter_map(|order| order.get("order_created").and_then(cell_as_date));
        assert!(dates.clone().all(|date| date <= today()));
        assert!(dates.clone().any(|date| date == today()));
    }

    #[test]
    fn reviews_never_postdate_today() {
        let dataset = demo_dataset(today());
        assert!(!dataset["review"].is_empty());
        assert!(dataset["review"]
            .iter()
            .all(|review| review.get("review_date").and_then(cell_as_date).is_some_and(|date| date <= today())));
    }

    #[tokio::test]
    async fn bundled_shipment_lines_fill_down() -> Result<(), String> {
        let source = demo_source(today());
        let raw = demo_dataset(today());
        assert!(raw["logistics"].iter().any(|line| line.get("order_code").is_some_and(cell_is_empty)));

        let lines = source.sheet_rows("logistics", Some("order_code")).await.map_err(|err| err.to_string())?;
        assert!(lines.iter().all(|line| line.get("order_code").is_some_and(|code| !cell_is_empty(code))));
        assert!(lines.iter().all(|line| line.get("country").is_some_and(|country| !cell_is_empty(country))));
        Ok(())
    }
}
