use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::cart::{AddCartItemRequest, CartCleared, CartItemDto, CartView, UpdateCartItemRequest},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::product_service,
    state::AppState,
};

#[derive(FromRow)]
struct CartLineRow {
    item_id: Uuid,
    quantity: i32,
    product_id: Uuid,
    sku: String,
    name: String,
    description: Option<String>,
    price: i64,
    stock: i32,
    active: bool,
    category_id: Uuid,
    product_created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct CartItemRow {
    id: Uuid,
    quantity: i32,
}

/// Get-or-create. Two concurrent first requests race on the unique index over
/// carts.user_id; the loser's insert is a no-op and both read the same row.
async fn get_or_create_cart(pool: &DbPool, user_id: Uuid) -> AppResult<Uuid> {
    sqlx::query("INSERT INTO carts (id, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING")
        .bind(Uuid::new_v4())
        .bind(user_id)
        .execute(pool)
        .await?;

    let (cart_id,): (Uuid,) = sqlx::query_as("SELECT id FROM carts WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(cart_id)
}

pub async fn get_cart(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<CartView>> {
    let cart_id = get_or_create_cart(&state.pool, user.user_id).await?;
    let (page, limit, offset) = pagination.normalize();

    let rows = sqlx::query_as::<_, CartLineRow>(
        r#"
        SELECT ci.id AS item_id, ci.quantity,
               p.id AS product_id, p.sku, p.name, p.description, p.price, p.stock,
               p.active, p.category_id, p.created_at AS product_created_at
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = $1
        ORDER BY ci.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(cart_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cart_items WHERE cart_id = $1")
        .bind(cart_id)
        .fetch_one(&state.pool)
        .await?;

    let items = rows
        .into_iter()
        .map(|row| CartItemDto {
            id: row.item_id,
            product: Product {
                id: row.product_id,
                sku: row.sku,
                name: row.name,
                description: row.description,
                price: row.price,
                stock: row.stock,
                active: row.active,
                category_id: row.category_id,
                created_at: row.product_created_at,
            },
            quantity: row.quantity,
        })
        .collect();

    let meta = Meta::new(page, limit, total.0);
    let data = CartView {
        id: cart_id,
        items,
    };
    Ok(ApiResponse::success("OK", data, Some(meta)))
}

/// Adds one unit of the product to the cart: an existing line is incremented
/// by 1, otherwise a new line is created at quantity 1.
pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: AddCartItemRequest,
) -> AppResult<ApiResponse<CartItemDto>> {
    let cart_id = get_or_create_cart(&state.pool, user.user_id).await?;
    let product = product_service::validate_purchasable(&state.orm, payload.product_id).await?;

    let row = sqlx::query_as::<_, CartItemRow>(
        r#"
        INSERT INTO cart_items (id, cart_id, product_id, quantity)
        VALUES ($1, $2, $3, 1)
        ON CONFLICT (cart_id, product_id)
        DO UPDATE SET quantity = cart_items.quantity + 1
        RETURNING id, quantity
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(cart_id)
    .bind(payload.product_id)
    .fetch_one(&state.pool)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": row.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let item = CartItemDto {
        id: row.id,
        product: product_service::product_from_entity(product),
        quantity: row.quantity,
    };
    Ok(ApiResponse::success("OK", item, None))
}

/// Upserts the line to the exact quantity. A quantity of zero or less removes
/// the line instead, without touching the product.
pub async fn update_item(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<Option<CartItemDto>>> {
    let cart_id = get_or_create_cart(&state.pool, user.user_id).await?;

    if payload.quantity <= 0 {
        delete_line(state, user, cart_id, product_id).await?;
        return Ok(ApiResponse::success(
            "Removed from cart",
            None,
            Some(Meta::empty()),
        ));
    }

    let product = product_service::validate_purchasable(&state.orm, product_id).await?;

    let row = sqlx::query_as::<_, CartItemRow>(
        r#"
        INSERT INTO cart_items (id, cart_id, product_id, quantity)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (cart_id, product_id)
        DO UPDATE SET quantity = EXCLUDED.quantity
        RETURNING id, quantity
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(cart_id)
    .bind(product_id)
    .bind(payload.quantity)
    .fetch_one(&state.pool)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id, "quantity": row.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let item = CartItemDto {
        id: row.id,
        product: product_service::product_from_entity(product),
        quantity: row.quantity,
    };
    Ok(ApiResponse::success("OK", Some(item), None))
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let cart_id = get_or_create_cart(&state.pool, user.user_id).await?;
    delete_line(state, user, cart_id, product_id).await?;

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

async fn delete_line(
    state: &AppState,
    user: &AuthUser,
    cart_id: Uuid,
    product_id: Uuid,
) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2")
        .bind(cart_id)
        .bind(product_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("cart item".into()));
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(())
}

/// Empties the cart, keeping the cart row itself. Idempotent.
pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<CartCleared>> {
    let cart_id = get_or_create_cart(&state.pool, user.user_id).await?;

    let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
        .bind(cart_id)
        .execute(&state.pool)
        .await?;
    let removed = result.rows_affected();

    if removed > 0 {
        if let Err(err) = log_audit(
            &state.pool,
            Some(user.user_id),
            "cart_clear",
            Some("cart_items"),
            Some(serde_json::json!({ "removed": removed })),
        )
        .await
        {
            tracing::warn!(error = %err, "audit log failed");
        }
    }

    Ok(ApiResponse::success(
        "Cart cleared",
        CartCleared { removed },
        Some(Meta::empty()),
    ))
}
