use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
};
use uuid::Uuid;

use crate::{
    dto::cart::{AddCartItemRequest, CartCleared, CartItemDto, CartView, UpdateCartItemRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::Pagination,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/items/{product_id}", put(update_item))
        .route("/items/{product_id}", delete(remove_item))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20, max 50")
    ),
    responses(
        (status = 200, description = "Current user's cart", body = ApiResponse<CartView>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let resp = cart_service::get_cart(&state, &user, pagination).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart/items",
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Add one unit of a product", body = ApiResponse<CartItemDto>),
        (status = 404, description = "Product not found"),
        (status = 422, description = "Product not purchasable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddCartItemRequest>,
) -> AppResult<Json<ApiResponse<CartItemDto>>> {
    let resp = cart_service::add_item(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/cart/items/{product_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Set line quantity; zero or less removes the line", body = ApiResponse<CartItemDto>),
        (status = 404, description = "Product or cart line not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> AppResult<Json<ApiResponse<Option<CartItemDto>>>> {
    let resp = cart_service::update_item(&state, &user, product_id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart/items/{product_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "OK", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Cart line not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = cart_service::remove_item(&state, &user, product_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart",
    responses(
        (status = 200, description = "Cart emptied", body = ApiResponse<CartCleared>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CartCleared>>> {
    let resp = cart_service::clear_cart(&state, &user).await?;
    Ok(Json(resp))
}
