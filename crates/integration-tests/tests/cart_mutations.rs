//! Mutation engine flows: merge-on-duplicate adds, idempotent removes,
//! quantity validation, analytics side effects, and the serialization
//! discipline that prevents lost updates from rapid repeated clicks.

use rust_decimal::Decimal;
use zocalo_cart::CartError;
use zocalo_cart::metrics::CART_ADDS;
use zocalo_core::{CartItemId, ProductId};

use zocalo_integration_tests::TestCart;

#[tokio::test]
async fn repeated_adds_merge_into_one_row() {
    let cart = TestCart::new();
    let product = ProductId::new("p-drum");

    cart.state.add_item(&product, 1).await.expect("first add");
    let items = cart.state.add_item(&product, 1).await.expect("second add");

    assert_eq!(items.len(), 1);
    let entry = items.first().expect("one row");
    assert_eq!(entry.item.quantity, 2);
}

#[tokio::test]
async fn add_quantities_accumulate_across_calls() {
    let cart = TestCart::new();
    let product = ProductId::new("p-mask");

    for quantity in [1_u32, 2, 4] {
        cart.state.add_item(&product, quantity).await.expect("add");
    }

    let items = cart.state.current_items().await.expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items.first().expect("row").item.quantity, 7);
}

#[tokio::test]
async fn interleaved_adds_do_not_lose_updates() {
    let cart = TestCart::new();
    let product = ProductId::new("p-rug");

    // Issued back-to-back without awaiting the first; the in-process
    // queue serializes the read-modify-write pairs.
    let (first, second) = tokio::join!(
        cart.state.add_item(&product, 1),
        cart.state.add_item(&product, 1),
    );
    first.expect("first add");
    second.expect("second add");

    let items = cart.state.current_items().await.expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items.first().expect("row").item.quantity, 2);
}

#[tokio::test]
async fn removing_a_missing_item_is_a_noop() {
    let cart = TestCart::new();

    cart.state
        .remove_item(&CartItemId::new("never-existed"))
        .await
        .expect("remove of absent item");
}

#[tokio::test]
async fn removing_twice_does_not_error() {
    let cart = TestCart::new();
    let product = ProductId::new("p-lamp");

    let items = cart.state.add_item(&product, 1).await.expect("add");
    let item_id = items.first().expect("row").item.id.clone();

    cart.state
        .remove_item(&item_id)
        .await
        .expect("first remove");
    cart.state
        .remove_item(&item_id)
        .await
        .expect("second remove");

    assert!(cart.state.current_items().await.expect("items").is_empty());
}

#[tokio::test]
async fn set_quantity_overwrites() {
    let cart = TestCart::new();
    let product = ProductId::new("p-vase");

    let items = cart.state.add_item(&product, 2).await.expect("add");
    let item_id = items.first().expect("row").item.id.clone();

    cart.state
        .set_quantity(&item_id, 9)
        .await
        .expect("set quantity");

    let items = cart.state.current_items().await.expect("items");
    assert_eq!(items.first().expect("row").item.quantity, 9);
}

#[tokio::test]
async fn zero_quantity_is_rejected_and_leaves_row_unchanged() {
    let cart = TestCart::new();
    let product = ProductId::new("p-scarf");

    let items = cart.state.add_item(&product, 3).await.expect("add");
    let item_id = items.first().expect("row").item.id.clone();

    let err = cart
        .state
        .set_quantity(&item_id, 0)
        .await
        .expect_err("zero quantity");
    assert!(matches!(err, CartError::InvalidQuantity(0)));

    let items = cart.state.current_items().await.expect("items");
    assert_eq!(items.first().expect("row").item.quantity, 3);
}

#[tokio::test]
async fn zero_quantity_add_is_rejected_before_any_write() {
    let cart = TestCart::new();

    let err = cart
        .state
        .add_item(&ProductId::new("p-hat"), 0)
        .await
        .expect_err("zero quantity add");
    assert!(matches!(err, CartError::InvalidQuantity(0)));
    assert_eq!(cart.memory.cart_count().await, 0);
}

#[tokio::test]
async fn successful_adds_bump_the_cart_adds_counter() {
    let cart = TestCart::new();
    let product = ProductId::new("p-print");

    cart.state.add_item(&product, 1).await.expect("add");
    cart.state.add_item(&product, 2).await.expect("add");

    assert_eq!(cart.memory.metric(&product, CART_ADDS).await, 2);
}

#[tokio::test]
async fn metric_failure_does_not_fail_the_add() {
    let (cart, flaky) = TestCart::flaky();
    let product = ProductId::new("p-bowl");

    flaky
        .fail_metrics
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let items = cart.state.add_item(&product, 1).await.expect("add");
    assert_eq!(items.first().expect("row").item.quantity, 1);
    assert_eq!(cart.memory.metric(&product, CART_ADDS).await, 0);
}

#[tokio::test]
async fn projections_join_live_prices_and_skip_unpriced_items() {
    let cart = TestCart::new();
    cart.seed_product("p-priced", 10).await;

    cart.state
        .add_item(&ProductId::new("p-priced"), 2)
        .await
        .expect("add priced");
    cart.state
        .add_item(&ProductId::new("p-unknown"), 1)
        .await
        .expect("add unknown");

    assert_eq!(cart.state.item_count().await.expect("count"), 3);
    assert_eq!(
        cart.state.cart_total().await.expect("total"),
        Decimal::from(20)
    );
}
