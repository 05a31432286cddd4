//! Transformations against a real database.
//!
//! Requires `TEST_DATABASE_URL`; run with `cargo test -- --ignored`.

mod common;

use axum::http::StatusCode;
use common::{cardex, create_contact, create_crop, decimal, get, post, purchase, spawn_router};
use rust_decimal_macros::dec;
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[ignore]
#[serial]
async fn milling_allocates_cost_by_ratio() {
    let router = spawn_router().await;
    let paddy = create_crop(&router, "Paddy").await;
    let rice = create_crop(&router, "Milled rice").await;
    let husk = create_crop(&router, "Husk").await;
    let supplier = create_contact(&router, "Paddy grower", false, true).await;
    purchase(&router, paddy, supplier, "2026-06-01", "100", "2").await;

    let (status, body) = post(
        &router,
        "/transformations",
        json!({
            "source_crop_id": paddy,
            "source_quantity_kg": "100",
            "processing_cost": "50",
            "transformation_date": "2026-06-02",
            "outputs": [
                { "output_crop_id": rice, "output_quantity_kg": "60", "cost_allocation_ratio": "0.7" },
                { "output_crop_id": husk, "output_quantity_kg": "40", "cost_allocation_ratio": "0.3", "is_waste": true }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(decimal(&body["source_cost"]), dec!(200.00));
    assert_eq!(decimal(&body["total_cost"]), dec!(250.00));

    let outputs = body["outputs"].as_array().unwrap();
    assert_eq!(decimal(&outputs[0]["allocated_cost"]), dec!(175.00));
    assert_eq!(decimal(&outputs[0]["unit_cost"]), dec!(2.916667));
    assert_eq!(decimal(&outputs[1]["allocated_cost"]), dec!(75.00));
    assert_eq!(decimal(&outputs[1]["unit_cost"]), dec!(1.875));

    // One issue from the source, one receipt per output.
    let source = cardex(&router, paddy).await;
    let out = &source["movements"][1];
    assert_eq!(out["type"], "TRANSFORM_OUT");
    assert_eq!(decimal(&out["quantity_kg"]), dec!(100));
    assert_eq!(decimal(&source["current_balance"]), dec!(0));

    let rice_card = cardex(&router, rice).await;
    assert_eq!(rice_card["movements"][0]["type"], "TRANSFORM_IN");
    assert_eq!(decimal(&rice_card["current_balance"]), dec!(60));

    let husk_card = cardex(&router, husk).await;
    assert_eq!(husk_card["movements"][0]["type"], "TRANSFORM_IN");
    assert_eq!(husk_card["movements"][0]["is_waste"], true);

    // Waste keeps its cost in stock value but none of it is saleable.
    let (_, stock) = get(&router, "/inventory").await;
    let row = |crop: uuid::Uuid| {
        stock
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["crop_id"] == crop.to_string())
            .cloned()
            .unwrap()
    };
    let husk_row = row(husk);
    assert_eq!(decimal(&husk_row["stock_value"]), dec!(75.00));
    assert_eq!(decimal(&husk_row["waste_kg"]), dec!(40));
    assert_eq!(decimal(&husk_row["available_for_sale_kg"]), dec!(0));
    assert_eq!(decimal(&husk_row["saleable_value"]), dec!(0));
    let rice_row = row(rice);
    assert_eq!(decimal(&rice_row["saleable_value"]), dec!(175.00));

    let id = body["transformation_id"].as_str().unwrap();
    let (status, fetched) = get(&router, &format!("/transformations/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["outputs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
#[ignore]
#[serial]
async fn transformation_beyond_stock_is_refused() {
    let router = spawn_router().await;
    let cotton = create_crop(&router, "Seed cotton").await;
    let lint = create_crop(&router, "Lint").await;
    let supplier = create_contact(&router, "Ginnery supplier", false, true).await;
    purchase(&router, cotton, supplier, "2026-06-01", "30", "1").await;

    let (status, body) = post(
        &router,
        "/transformations",
        json!({
            "source_crop_id": cotton,
            "source_quantity_kg": "31",
            "transformation_date": "2026-06-03",
            "outputs": [
                { "output_crop_id": lint, "output_quantity_kg": "10", "cost_allocation_ratio": "1" }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
    assert_eq!(decimal(&body["available_kg"]), dec!(30));

    let card = cardex(&router, lint).await;
    assert!(card["movements"].as_array().unwrap().is_empty());
}
