//! Cardex, trade documents and adjustments against a real database.
//!
//! Requires `TEST_DATABASE_URL`; run with `cargo test -- --ignored`.

mod common;

use axum::http::StatusCode;
use common::{
    cardex, create_contact, create_crop, decimal, delete, get, post, purchase, spawn_router,
    INVENTORY, INVENTORY_LOSS,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use serial_test::serial;

async fn balance(router: &axum::Router, account_id: &str) -> Decimal {
    let (_, body) = get(router, &format!("/accounts/{}/balance", account_id)).await;
    decimal(&body["balance"])
}

/// Every snapshot equals the running sum of the movements before it.
fn assert_replayable(cardex: &Value) {
    let mut running = Decimal::ZERO;
    for m in cardex["movements"].as_array().unwrap() {
        let qty = decimal(&m["quantity_kg"]);
        match m["direction"].as_str().unwrap() {
            "IN" => running += qty,
            _ => running -= qty,
        }
        assert_eq!(decimal(&m["balance_kg"]), running, "snapshot mismatch: {}", m);
    }
    assert_eq!(decimal(&cardex["current_balance"]), running);
}

#[tokio::test]
#[ignore]
#[serial]
async fn purchase_in_sacks_is_stored_in_kg() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Maize").await;
    let supplier = create_contact(&router, "Farmer", false, true).await;

    let (status, body) = post(
        &router,
        "/purchases",
        json!({
            "crop_id": crop,
            "supplier_id": supplier,
            "purchase_date": "2026-03-01",
            "quantity": "2",
            "unit": "sack",
            "unit_price": "90",
            "amount_paid": "100"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(decimal(&body["quantity_kg"]), dec!(100));
    assert_eq!(decimal(&body["total_amount"]), dec!(180));

    let card = cardex(&router, crop).await;
    let line = &card["movements"][0];
    assert_eq!(line["type"], "PURCHASE");
    assert_eq!(line["direction"], "IN");
    assert_eq!(decimal(&line["unit_cost"]), dec!(1.8));
    assert_eq!(line["reference_type"], "purchase");
    assert_eq!(line["reference_id"], body["purchase_id"]);
}

#[tokio::test]
#[ignore]
#[serial]
async fn customers_only_buy_and_suppliers_only_sell() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Sorghum").await;
    let customer = create_contact(&router, "Miller", true, false).await;

    let (status, body) = post(
        &router,
        "/purchases",
        json!({
            "crop_id": crop,
            "supplier_id": customer,
            "purchase_date": "2026-03-01",
            "quantity": "10",
            "unit": "kg",
            "unit_price": "1"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
}

#[tokio::test]
#[ignore]
#[serial]
async fn spoilage_moves_stock_out_whatever_the_sign() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Beans").await;
    let supplier = create_contact(&router, "Grower", false, true).await;
    purchase(&router, crop, supplier, "2026-03-01", "50", "2").await;

    let (status, movement) = post(
        &router,
        "/inventory/adjustments",
        json!({
            "crop_id": crop,
            "adjustment_date": "2026-03-02",
            "adjustment_type": "SPOILAGE",
            "quantity_kg": "-10",
            "notes": "Weevils"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", movement);
    assert_eq!(movement["direction"], "OUT");
    assert_eq!(movement["adjustment_type"], "SPOILAGE");
    assert_eq!(decimal(&movement["quantity_kg"]), dec!(10));
    assert_eq!(decimal(&movement["balance_kg"]), dec!(40));
    assert_eq!(decimal(&movement["total_value"]), dec!(20.00));
}

#[tokio::test]
#[ignore]
#[serial]
async fn deleting_an_adjustment_restores_stock_and_accounts() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Millet").await;
    let supplier = create_contact(&router, "Co-op", false, true).await;
    purchase(&router, crop, supplier, "2026-03-01", "50", "2").await;

    let inventory_before = balance(&router, INVENTORY).await;
    let loss_before = balance(&router, INVENTORY_LOSS).await;

    let (_, movement) = post(
        &router,
        "/inventory/adjustments",
        json!({
            "crop_id": crop,
            "adjustment_date": "2026-03-02",
            "adjustment_type": "SHORTAGE",
            "quantity_kg": "5"
        }),
    )
    .await;
    assert_eq!(balance(&router, INVENTORY).await, inventory_before - dec!(10.00));
    assert_eq!(balance(&router, INVENTORY_LOSS).await, loss_before + dec!(10.00));

    let movement_id = movement["movement_id"].as_str().unwrap();
    let (status, removal) = delete(
        &router,
        &format!("/inventory/adjustments/{}", movement_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", removal);
    assert!(removal["reversal_entry_id"].is_string());
    assert_eq!(decimal(&removal["balance_kg"]), dec!(50));

    assert_eq!(balance(&router, INVENTORY).await, inventory_before);
    assert_eq!(balance(&router, INVENTORY_LOSS).await, loss_before);
    assert_eq!(decimal(&cardex(&router, crop).await["current_balance"]), dec!(50));
}

#[tokio::test]
#[ignore]
#[serial]
async fn back_dated_purchase_rewrites_later_snapshots() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Rice").await;
    let supplier = create_contact(&router, "Paddy farmer", false, true).await;

    purchase(&router, crop, supplier, "2026-03-01", "50", "2").await;
    purchase(&router, crop, supplier, "2026-03-05", "10", "2").await;
    purchase(&router, crop, supplier, "2026-03-02", "5", "2").await;

    let card = cardex(&router, crop).await;
    let snapshots: Vec<Decimal> = card["movements"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| decimal(&m["balance_kg"]))
        .collect();
    assert_eq!(snapshots, vec![dec!(50), dec!(55), dec!(65)]);
    assert_replayable(&card);

    let (_, window) = get(
        &router,
        &format!("/inventory/{}/cardex?start_date=2026-03-02&end_date=2026-03-04", crop),
    )
    .await;
    assert_eq!(decimal(&window["opening_balance"]), dec!(50));
    assert_eq!(window["movements"].as_array().unwrap().len(), 1);
    assert_eq!(decimal(&window["current_balance"]), dec!(55));
}

#[tokio::test]
#[ignore]
#[serial]
async fn sales_cost_at_weighted_average_and_never_overdraw() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Wheat").await;
    let supplier = create_contact(&router, "Estate", false, true).await;
    let customer = create_contact(&router, "Bakery", true, false).await;

    purchase(&router, crop, supplier, "2026-03-01", "50", "2").await;
    purchase(&router, crop, supplier, "2026-03-02", "50", "3").await;

    let sale = |quantity: &str| {
        json!({
            "crop_id": crop,
            "customer_id": customer,
            "sale_date": "2026-03-03",
            "quantity": quantity,
            "unit": "kg",
            "unit_price": "4",
            "amount_received": "40"
        })
    };

    let (status, body) = post(&router, "/sales", sale("20")).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(decimal(&body["cost_of_goods"]), dec!(50.00));

    let (status, body) = post(&router, "/sales", sale("81")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
    assert_eq!(decimal(&body["available_kg"]), dec!(80));
    assert_eq!(decimal(&body["requested_kg"]), dec!(81));

    let (_, stock) = get(&router, "/inventory").await;
    let row = stock
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["crop_id"] == crop.to_string())
        .cloned()
        .unwrap();
    assert_eq!(decimal(&row["balance_kg"]), dec!(80));
    assert_eq!(decimal(&row["stock_value"]), dec!(200.00));
    assert_eq!(decimal(&row["saleable_value"]), dec!(200.00));
}

#[tokio::test]
#[ignore]
#[serial]
async fn adjustment_deletion_that_would_overdraw_is_refused() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Barley").await;
    let supplier = create_contact(&router, "Malt farm", false, true).await;
    let customer = create_contact(&router, "Brewery", true, false).await;

    purchase(&router, crop, supplier, "2026-03-01", "10", "2").await;
    let (_, surplus) = post(
        &router,
        "/inventory/adjustments",
        json!({
            "crop_id": crop,
            "adjustment_date": "2026-03-02",
            "adjustment_type": "SURPLUS",
            "quantity_kg": "5"
        }),
    )
    .await;
    let (status, _) = post(
        &router,
        "/sales",
        json!({
            "crop_id": crop,
            "customer_id": customer,
            "sale_date": "2026-03-03",
            "quantity": "15",
            "unit": "kg",
            "unit_price": "3"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = delete(
        &router,
        &format!("/inventory/adjustments/{}", surplus["movement_id"].as_str().unwrap()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);

    // Nothing changed.
    let card = cardex(&router, crop).await;
    assert_eq!(card["movements"].as_array().unwrap().len(), 3);
    assert_replayable(&card);
}
