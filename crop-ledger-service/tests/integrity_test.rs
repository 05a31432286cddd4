//! Guarded deletion of crops and contacts against a real database.
//!
//! Requires `TEST_DATABASE_URL`; run with `cargo test -- --ignored`.

mod common;

use axum::http::StatusCode;
use crop_ledger_service::services::get_metrics;
use common::{
    cardex, create_contact, create_crop, decimal, delete, get, post, purchase, spawn_router,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use serial_test::serial;
use std::collections::HashMap;
use uuid::Uuid;

async fn surplus(router: &axum::Router, crop: Uuid, date: &str) {
    let (status, body) = post(
        router,
        "/inventory/adjustments",
        json!({
            "crop_id": crop,
            "adjustment_date": date,
            "adjustment_type": "SURPLUS",
            "quantity_kg": "1"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "surplus: {}", body);
}

async fn price(router: &axum::Router, crop: Uuid, date: &str, amount: &str) {
    let (status, body) = post(
        router,
        &format!("/crops/{}/prices", crop),
        json!({ "price_date": date, "unit": "kg", "price": amount }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "price: {}", body);
}

/// Cached balance of every active account.
async fn account_balances(router: &axum::Router) -> HashMap<String, Decimal> {
    let (status, accounts) = get(router, "/accounts").await;
    assert_eq!(status, StatusCode::OK);
    accounts
        .as_array()
        .unwrap()
        .iter()
        .map(|a| {
            (
                a["account_id"].as_str().unwrap().to_string(),
                decimal(&a["current_balance"]),
            )
        })
        .collect()
}

fn assert_balances_restored(before: &HashMap<String, Decimal>, after: &HashMap<String, Decimal>) {
    for (account, balance) in after {
        let expected = before.get(account).copied().unwrap_or(Decimal::ZERO);
        assert_eq!(*balance, expected, "account {} not restored", account);
    }
}

async fn sale(router: &axum::Router, crop: Uuid, customer: Uuid, date: &str, quantity_kg: &str) -> Value {
    let (status, body) = post(
        router,
        "/sales",
        json!({
            "crop_id": crop,
            "customer_id": customer,
            "sale_date": date,
            "quantity": quantity_kg,
            "unit": "kg",
            "unit_price": "3",
            "amount_received": "15"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "sale: {}", body);
    body
}

async fn transform(router: &axum::Router, source: Uuid, output: Uuid, date: &str, quantity_kg: &str) {
    let (status, body) = post(
        router,
        "/transformations",
        json!({
            "source_crop_id": source,
            "source_quantity_kg": quantity_kg,
            "processing_cost": "10",
            "transformation_date": date,
            "outputs": [
                { "output_crop_id": output, "output_quantity_kg": quantity_kg, "cost_allocation_ratio": "1" }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "transformation: {}", body);
}

/// Ask for the conflict report and return its token.
async fn conflict_token(router: &axum::Router, uri: &str) -> (Value, String) {
    let (status, report) = delete(router, uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", report);
    let token = report["force_delete_token"].as_str().unwrap().to_string();
    (report, token)
}

#[tokio::test]
#[ignore]
#[serial]
async fn crop_with_dependents_reports_them_and_force_delete_needs_a_fresh_token() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Cassava").await;
    surplus(&router, crop, "2026-07-01").await;
    surplus(&router, crop, "2026-07-02").await;
    surplus(&router, crop, "2026-07-03").await;
    price(&router, crop, "2026-07-01", "0.40").await;
    price(&router, crop, "2026-07-02", "0.45").await;

    let (status, report) = delete(&router, &format!("/crops/{}", crop), None).await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", report);
    assert_eq!(
        report["conflicts"],
        json!({ "inventory_movements": 3, "daily_prices": 2 })
    );
    let token = report["force_delete_token"].as_str().unwrap().to_string();

    // A new dependent invalidates the token.
    price(&router, crop, "2026-07-03", "0.50").await;
    let (status, stale) = delete(
        &router,
        &format!("/crops/{}/force", crop),
        Some(json!({ "confirmation_token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", stale);
    assert_eq!(stale["conflicts"]["daily_prices"], 3);
    let fresh = stale["force_delete_token"].as_str().unwrap().to_string();
    assert_ne!(fresh, token);

    let (status, outcome) = delete(
        &router,
        &format!("/crops/{}/force", crop),
        Some(json!({ "confirmation_token": fresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["state"], "FORCE_DELETED");
    assert_eq!(outcome["affected"]["inventory_movements"], 3);

    let (status, _) = get(&router, &format!("/crops/{}", crop)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
#[serial]
async fn unused_crop_deletes_outright() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Teff").await;

    let (status, _) = delete(&router, &format!("/crops/{}", crop), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = get(&router, &format!("/crops/{}", crop)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
#[serial]
async fn crop_migration_merges_the_cardex_into_the_target() {
    let router = spawn_router().await;
    let source = create_crop(&router, "Yellow maize").await;
    let target = create_crop(&router, "Maize grain").await;
    let supplier = create_contact(&router, "Aggregator", false, true).await;

    purchase(&router, source, supplier, "2026-07-01", "10", "2").await;
    purchase(&router, target, supplier, "2026-07-02", "5", "2").await;
    price(&router, source, "2026-07-05", "2.10").await;
    price(&router, target, "2026-07-05", "2.20").await;

    let (status, outcome) = post(
        &router,
        &format!("/crops/{}/migrate-and-delete", source),
        json!({ "target_crop_id": target }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["state"], "MIGRATED_AND_DELETED");
    assert_eq!(outcome["migrated_to"], target.to_string());

    let card = cardex(&router, target).await;
    let balances: Vec<_> = card["movements"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| decimal(&m["balance_kg"]))
        .collect();
    assert_eq!(balances, vec![dec!(10), dec!(15)]);

    // The target's own price wins on a collision.
    let (_, prices) = get(&router, &format!("/crops/{}/prices", target)).await;
    let prices = prices.as_array().unwrap();
    assert_eq!(prices.len(), 1);
    assert_eq!(decimal(&prices[0]["price"]), dec!(2.20));

    let (status, _) = get(&router, &format!("/crops/{}", source)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
#[serial]
async fn contact_migration_carries_roles_and_documents() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Groundnut").await;
    let source = create_contact(&router, "Old supplier", false, true).await;
    let target = create_contact(&router, "Merged buyer", true, false).await;
    purchase(&router, crop, source, "2026-07-01", "8", "3").await;

    let (status, outcome) = post(
        &router,
        &format!("/contacts/{}/migrate-and-delete", source),
        json!({ "target_contact_id": target }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["affected"]["purchases"], 1);

    let (_, merged) = get(&router, &format!("/contacts/{}", target)).await;
    assert_eq!(merged["is_customer"], true);
    assert_eq!(merged["is_supplier"], true);

    let (status, _) = get(&router, &format!("/contacts/{}", source)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The purchase now blocks the target instead.
    let (status, report) = delete(&router, &format!("/contacts/{}", target), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(report["conflicts"]["purchases"], 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn migrating_onto_itself_is_rejected() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Oats").await;

    let (status, body) = post(
        &router,
        &format!("/crops/{}/migrate-and-delete", crop),
        json!({ "target_id": crop }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);

    let (status, _) = get(&router, &format!("/crops/{}", crop)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
#[ignore]
#[serial]
async fn migrating_onto_a_missing_target_is_rejected() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Rye").await;
    let contact = create_contact(&router, "Rye buyer", true, false).await;

    let (status, body) = post(
        &router,
        &format!("/crops/{}/migrate-and-delete", crop),
        json!({ "target_crop_id": Uuid::new_v4() }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);

    let (status, body) = post(
        &router,
        &format!("/contacts/{}/migrate-and-delete", contact),
        json!({ "target_contact_id": Uuid::new_v4() }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);

    let (status, _) = get(&router, &format!("/crops/{}", crop)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(&router, &format!("/contacts/{}", contact)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
#[ignore]
#[serial]
async fn force_deleting_a_traded_crop_reverses_every_posting() {
    let router = spawn_router().await;
    let maize = create_crop(&router, "Shelled maize").await;
    let meal = create_crop(&router, "Maize meal").await;
    let supplier = create_contact(&router, "Maize farmer", false, true).await;
    let customer = create_contact(&router, "Feed store", true, false).await;

    let before = account_balances(&router).await;

    purchase(&router, maize, supplier, "2026-08-01", "100", "2").await;
    sale(&router, maize, customer, "2026-08-02", "10").await;
    transform(&router, maize, meal, "2026-08-03", "50").await;
    assert_ne!(account_balances(&router).await, before);

    let (report, token) = conflict_token(&router, &format!("/crops/{}", maize)).await;
    assert_eq!(report["conflicts"]["purchases"], 1);
    assert_eq!(report["conflicts"]["sales"], 1);
    assert_eq!(report["conflicts"]["transformations"], 1);

    let (status, outcome) = delete(
        &router,
        &format!("/crops/{}/force", maize),
        Some(json!({ "confirmation_token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["state"], "FORCE_DELETED");

    assert_balances_restored(&before, &account_balances(&router).await);

    // The output crop loses the receipt the transformation gave it.
    let card = cardex(&router, meal).await;
    assert!(card["movements"].as_array().unwrap().is_empty());
    assert_eq!(decimal(&card["current_balance"]), dec!(0));

    let (status, trial) = get(&router, "/reports/trial-balance").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trial["is_balanced"], true);

    let (status, _) = get(&router, &format!("/crops/{}", maize)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
#[serial]
async fn force_deleting_a_supplier_removes_its_purchases() {
    let router = spawn_router().await;
    let crop = create_crop(&router, "Sesame").await;
    let kept = create_contact(&router, "Sesame co-op", false, true).await;
    let dropped = create_contact(&router, "Sesame trader", false, true).await;

    purchase(&router, crop, kept, "2026-08-01", "10", "2").await;
    let before = account_balances(&router).await;
    purchase(&router, crop, dropped, "2026-08-02", "20", "2").await;

    let (report, token) = conflict_token(&router, &format!("/contacts/{}", dropped)).await;
    assert_eq!(report["conflicts"]["purchases"], 1);

    let (status, outcome) = delete(
        &router,
        &format!("/contacts/{}/force", dropped),
        Some(json!({ "confirmation_token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["state"], "FORCE_DELETED");
    assert_eq!(outcome["affected"]["purchases"], 1);

    let (status, _) = get(&router, &format!("/contacts/{}", dropped)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let card = cardex(&router, crop).await;
    assert_eq!(card["movements"].as_array().unwrap().len(), 1);
    assert_eq!(decimal(&card["current_balance"]), dec!(10));
    assert_balances_restored(&before, &account_balances(&router).await);
}

#[tokio::test]
#[ignore]
#[serial]
async fn force_delete_and_stock_writes_on_shared_crops_both_complete() {
    let router = spawn_router().await;
    let groundnut = create_crop(&router, "Groundnut pods").await;
    let soy = create_crop(&router, "Soybean").await;
    let other = create_contact(&router, "Steady supplier", false, true).await;

    for round in 0..3 {
        let leaving = create_contact(&router, "Leaving supplier", false, true).await;
        purchase(&router, groundnut, leaving, "2026-08-01", "5", "2").await;
        purchase(&router, soy, leaving, "2026-08-01", "5", "2").await;
        let (_, token) = conflict_token(&router, &format!("/contacts/{}", leaving)).await;

        let force_uri = format!("/contacts/{}/force", leaving);
        let restock = |crop: Uuid| {
            json!({
                "crop_id": crop,
                "supplier_id": other,
                "purchase_date": "2026-08-02",
                "quantity": "1",
                "unit": "kg",
                "unit_price": "2"
            })
        };
        let (forced, soy_restock, groundnut_restock) = tokio::join!(
            delete(&router, &force_uri, Some(json!({ "confirmation_token": token }))),
            post(&router, "/purchases", restock(soy)),
            post(&router, "/purchases", restock(groundnut)),
        );

        assert_eq!(forced.0, StatusCode::OK, "round {}: {}", round, forced.1);
        assert_eq!(soy_restock.0, StatusCode::CREATED, "round {}: {}", round, soy_restock.1);
        assert_eq!(
            groundnut_restock.0,
            StatusCode::CREATED,
            "round {}: {}",
            round,
            groundnut_restock.1
        );
    }

    let (status, trial) = get(&router, "/reports/trial-balance").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trial["is_balanced"], true);
}

#[tokio::test]
#[ignore]
#[serial]
async fn force_delete_that_would_overdraw_an_output_crop_is_cancelled() {
    let router = spawn_router().await;
    let paddy = create_crop(&router, "Upland paddy").await;
    let rice = create_crop(&router, "Upland rice").await;
    let supplier = create_contact(&router, "Upland grower", false, true).await;
    let customer = create_contact(&router, "Rice retailer", true, false).await;

    purchase(&router, paddy, supplier, "2026-08-01", "40", "2").await;
    transform(&router, paddy, rice, "2026-08-02", "40").await;
    sale(&router, rice, customer, "2026-08-03", "40").await;

    let (_, token) = conflict_token(&router, &format!("/crops/{}", paddy)).await;
    let (status, body) = delete(
        &router,
        &format!("/crops/{}/force", paddy),
        Some(json!({ "confirmation_token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
    assert_eq!(body["crop_id"], rice.to_string());

    // Rolled back: both crops and the rice cardex are as they were.
    let (status, _) = get(&router, &format!("/crops/{}", paddy)).await;
    assert_eq!(status, StatusCode::OK);
    let card = cardex(&router, rice).await;
    assert_eq!(card["movements"].as_array().unwrap().len(), 2);
    assert_eq!(decimal(&card["current_balance"]), dec!(0));

    let metrics = get_metrics();
    assert!(metrics.contains(r#"entity_type="crop",outcome="cancelled""#), "{}", metrics);
}
