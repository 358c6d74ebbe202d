//! REST backend for the hosted row store.
//!
//! The hosted service fronts every table with a uniform row API:
//! equality filters in the query string, JSON arrays in and out, HTTP 409
//! for unique-constraint conflicts, and named RPC endpoints for the few
//! server-side functions (atomic metric increments). Cart and item rows
//! are never cached - they are mutable state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use zocalo_core::{CartId, CartItemId, CurrencyCode, Price, ProductId, UserId};

use crate::config::BackendConfig;
use crate::identity::GuestToken;
use crate::models::{Cart, CartItem, CartOwner, Product};
use crate::store::{CartBackend, StoreError};

/// Network timeout for every row store request. The engine imposes no
/// further deadline of its own.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies are truncated to this many characters in errors/logs.
const BODY_SNIPPET_LEN: usize = 200;

/// Client for the hosted row store's REST surface.
#[derive(Clone)]
pub struct RestBackend {
    inner: Arc<RestBackendInner>,
}

struct RestBackendInner {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    /// Create a new row store client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &BackendConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let base_url = format!(
            "{}/rest/{}",
            config.base_url.trim_end_matches('/'),
            config.api_version
        );

        Ok(Self {
            inner: Arc::new(RestBackendInner {
                client,
                base_url,
                api_key: config.api_key.expose_secret().to_string(),
            }),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.inner.base_url)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rpc/{function}", self.inner.base_url)
    }

    /// Attach the store's auth headers to a request.
    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.inner.api_key)
            .header("Authorization", format!("Bearer {}", self.inner.api_key))
    }

    /// Read a JSON response body, mapping non-success statuses.
    async fn read_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, StoreError> {
        let status = resp.status();
        let body = resp.text().await?;

        check_status(status, &body)?;

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %snippet(&body),
                "failed to parse row store response"
            );
            StoreError::Parse(e)
        })
    }

    /// Consume a write response, mapping non-success statuses.
    async fn read_ok(resp: reqwest::Response) -> Result<(), StoreError> {
        let status = resp.status();
        let body = resp.text().await?;
        check_status(status, &body)
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

fn check_status(status: StatusCode, body: &str) -> Result<(), StoreError> {
    if status == StatusCode::CONFLICT {
        return Err(StoreError::Conflict(snippet(body)));
    }
    if !status.is_success() {
        tracing::error!(
            status = %status,
            body = %snippet(body),
            "row store returned non-success status"
        );
        return Err(StoreError::Status {
            status: status.as_u16(),
            body: snippet(body),
        });
    }
    Ok(())
}

// =============================================================================
// Row DTOs
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CartRow {
    id: String,
    owner_kind: String,
    owner_key: String,
    created_at: DateTime<Utc>,
}

impl From<&Cart> for CartRow {
    fn from(cart: &Cart) -> Self {
        Self {
            id: cart.id.as_str().to_owned(),
            owner_kind: cart.owner.kind().as_str().to_owned(),
            owner_key: cart.owner.key().to_owned(),
            created_at: cart.created_at,
        }
    }
}

impl TryFrom<CartRow> for Cart {
    type Error = StoreError;

    fn try_from(row: CartRow) -> Result<Self, StoreError> {
        let owner = match row.owner_kind.as_str() {
            "guest" => CartOwner::Guest(GuestToken::new(row.owner_key)),
            "user" => CartOwner::User(UserId::new(row.owner_key)),
            other => {
                return Err(StoreError::Decode(format!(
                    "unknown cart owner_kind: {other}"
                )));
            }
        };
        Ok(Self {
            id: CartId::new(row.id),
            owner,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CartItemRow {
    id: String,
    cart_id: String,
    product_id: String,
    quantity: i64,
    created_at: DateTime<Utc>,
}

impl From<&CartItem> for CartItemRow {
    fn from(item: &CartItem) -> Self {
        Self {
            id: item.id.as_str().to_owned(),
            cart_id: item.cart_id.as_str().to_owned(),
            product_id: item.product_id.as_str().to_owned(),
            quantity: i64::from(item.quantity),
            created_at: item.created_at,
        }
    }
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = StoreError;

    fn try_from(row: CartItemRow) -> Result<Self, StoreError> {
        let quantity = u32::try_from(row.quantity)
            .map_err(|_| StoreError::Decode(format!("invalid item quantity: {}", row.quantity)))?;
        Ok(Self {
            id: CartItemId::new(row.id),
            cart_id: CartId::new(row.cart_id),
            product_id: ProductId::new(row.product_id),
            quantity,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProductRow {
    id: String,
    name: String,
    /// The catalog stores prices as numeric or string depending on the
    /// authoring surface; both are accepted, anything else is "no price".
    price: Option<serde_json::Value>,
    currency: Option<String>,
    image_url: Option<String>,
    stock: Option<i64>,
    available: Option<bool>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        let price = parse_price(row.price.as_ref(), row.currency.as_deref());
        Self {
            id: ProductId::new(row.id),
            name: row.name,
            price,
            image_url: row.image_url,
            stock: row.stock,
            available: row.available.unwrap_or(true),
        }
    }
}

/// Parse a catalog price cell. Unparseable or absent values yield `None`
/// rather than an error; such items contribute zero to cart totals.
fn parse_price(value: Option<&serde_json::Value>, currency: Option<&str>) -> Option<Price> {
    let amount = match value? {
        serde_json::Value::Number(n) => n.to_string().parse::<Decimal>().ok()?,
        serde_json::Value::String(s) => s.parse::<Decimal>().ok()?,
        _ => return None,
    };
    let code = currency.and_then(CurrencyCode::parse).unwrap_or_default();
    Some(Price::new(amount, code))
}

// =============================================================================
// CartBackend implementation
// =============================================================================

#[async_trait]
impl CartBackend for RestBackend {
    #[instrument(skip(self), fields(owner_kind = %owner.kind()))]
    async fn find_cart_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>, StoreError> {
        let resp = self
            .authed(self.inner.client.get(self.table_url("carts")))
            .query(&[
                ("owner_kind", format!("eq.{}", owner.kind())),
                ("owner_key", format!("eq.{}", owner.key())),
                ("limit", "1".to_owned()),
            ])
            .send()
            .await?;

        let rows: Vec<CartRow> = Self::read_json(resp).await?;
        rows.into_iter().next().map(Cart::try_from).transpose()
    }

    #[instrument(skip(self, cart), fields(cart_id = %cart.id))]
    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        let resp = self
            .authed(self.inner.client.post(self.table_url("carts")))
            .header("Prefer", "return=minimal")
            .json(&CartRow::from(cart))
            .send()
            .await?;
        Self::read_ok(resp).await
    }

    #[instrument(skip(self), fields(cart_id = %cart_id))]
    async fn list_items(&self, cart_id: &CartId) -> Result<Vec<CartItem>, StoreError> {
        let resp = self
            .authed(self.inner.client.get(self.table_url("cart_items")))
            .query(&[
                ("cart_id", format!("eq.{cart_id}")),
                ("order", "created_at.asc".to_owned()),
            ])
            .send()
            .await?;

        let rows: Vec<CartItemRow> = Self::read_json(resp).await?;
        rows.into_iter().map(CartItem::try_from).collect()
    }

    #[instrument(skip(self), fields(cart_id = %cart_id, product_id = %product_id))]
    async fn find_item_by_product(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
    ) -> Result<Option<CartItem>, StoreError> {
        let resp = self
            .authed(self.inner.client.get(self.table_url("cart_items")))
            .query(&[
                ("cart_id", format!("eq.{cart_id}")),
                ("product_id", format!("eq.{product_id}")),
                ("limit", "1".to_owned()),
            ])
            .send()
            .await?;

        let rows: Vec<CartItemRow> = Self::read_json(resp).await?;
        rows.into_iter().next().map(CartItem::try_from).transpose()
    }

    #[instrument(skip(self, item), fields(cart_id = %item.cart_id, product_id = %item.product_id))]
    async fn insert_item(&self, item: &CartItem) -> Result<(), StoreError> {
        let resp = self
            .authed(self.inner.client.post(self.table_url("cart_items")))
            .header("Prefer", "return=minimal")
            .json(&CartItemRow::from(item))
            .send()
            .await?;
        Self::read_ok(resp).await
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn update_item_quantity(
        &self,
        item_id: &CartItemId,
        quantity: u32,
    ) -> Result<(), StoreError> {
        let resp = self
            .authed(self.inner.client.patch(self.table_url("cart_items")))
            .query(&[("id", format!("eq.{item_id}"))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "quantity": quantity }))
            .send()
            .await?;
        Self::read_ok(resp).await
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn delete_item(&self, item_id: &CartItemId) -> Result<(), StoreError> {
        let resp = self
            .authed(self.inner.client.delete(self.table_url("cart_items")))
            .query(&[("id", format!("eq.{item_id}"))])
            .send()
            .await?;
        Self::read_ok(resp).await
    }

    #[instrument(skip(self), fields(cart_id = %cart_id))]
    async fn delete_items_by_cart(&self, cart_id: &CartId) -> Result<(), StoreError> {
        let resp = self
            .authed(self.inner.client.delete(self.table_url("cart_items")))
            .query(&[("cart_id", format!("eq.{cart_id}"))])
            .send()
            .await?;
        Self::read_ok(resp).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn fetch_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let id_list = ids
            .iter()
            .map(ProductId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let resp = self
            .authed(self.inner.client.get(self.table_url("products")))
            .query(&[("id", format!("in.({id_list})"))])
            .send()
            .await?;

        let rows: Vec<ProductRow> = Self::read_json(resp).await?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    #[instrument(skip(self), fields(product_id = %product_id, metric = %metric))]
    async fn increment_metric(
        &self,
        product_id: &ProductId,
        metric: &str,
    ) -> Result<(), StoreError> {
        let resp = self
            .authed(
                self.inner
                    .client
                    .post(self.rpc_url("increment_product_metric")),
            )
            .json(&json!({
                "product_id": product_id.as_str(),
                "metric": metric,
            }))
            .send()
            .await?;
        Self::read_ok(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_number_and_string() {
        let number = json!(12.5);
        let string = json!("7.25");
        assert_eq!(
            parse_price(Some(&number), Some("USD")).map(|p| p.amount),
            Some(Decimal::new(125, 1))
        );
        assert_eq!(
            parse_price(Some(&string), Some("EUR")).map(|p| p.currency_code),
            Some(CurrencyCode::EUR)
        );
    }

    #[test]
    fn test_parse_price_garbage_is_none() {
        assert_eq!(parse_price(None, None), None);
        assert_eq!(parse_price(Some(&json!("not a number")), None), None);
        assert_eq!(parse_price(Some(&json!(true)), None), None);
        assert_eq!(parse_price(Some(&json!(null)), Some("USD")), None);
    }

    #[test]
    fn test_parse_price_unknown_currency_defaults() {
        let price = parse_price(Some(&json!("3.00")), Some("XYZ")).expect("price");
        assert_eq!(price.currency_code, CurrencyCode::default());
    }

    #[test]
    fn test_cart_row_round_trip() {
        let cart = Cart::new(CartOwner::Guest(GuestToken::new("tok-abc")));
        let row = CartRow::from(&cart);
        assert_eq!(row.owner_kind, "guest");
        assert_eq!(row.owner_key, "tok-abc");

        let back = Cart::try_from(row).expect("decode");
        assert_eq!(back, cart);
    }

    #[test]
    fn test_cart_row_unknown_owner_kind_fails() {
        let row = CartRow {
            id: "c-1".to_owned(),
            owner_kind: "robot".to_owned(),
            owner_key: "r2".to_owned(),
            created_at: Utc::now(),
        };
        assert!(matches!(Cart::try_from(row), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_item_row_negative_quantity_fails() {
        let row = CartItemRow {
            id: "i-1".to_owned(),
            cart_id: "c-1".to_owned(),
            product_id: "p-1".to_owned(),
            quantity: -3,
            created_at: Utc::now(),
        };
        assert!(matches!(
            CartItem::try_from(row),
            Err(StoreError::Decode(_))
        ));
    }
}
