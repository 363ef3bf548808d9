use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::dto::products::{CreateProductRequest, ProductList, UpdateProductRequest};
use crate::{
    audit::log_audit,
    entity::{
        categories::Entity as Categories,
        products::{ActiveModel, Column, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

/// One (product, quantity) pairing to check or apply against stock.
#[derive(Debug, Clone, Copy)]
pub struct StockLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all();

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern)),
        );
    }

    if let Some(category_id) = query.category_id {
        condition = condition.add(Column::CategoryId.eq(category_id));
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    let data = ProductList { items };
    Ok(ApiResponse::success("Products", data, Some(meta)))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let result = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(product_from_entity);
    let result = match result {
        Some(p) => p,
        None => return Err(AppError::NotFound("product".into())),
    };
    Ok(ApiResponse::success("Product", result, None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;

    if Categories::find_by_id(payload.category_id)
        .one(&state.orm)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("category".into()));
    }

    let duplicate = Products::find()
        .filter(Column::Sku.eq(payload.sku.clone()))
        .one(&state.orm)
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict(format!(
            "sku {} already exists",
            payload.sku
        )));
    }

    let id = Uuid::new_v4();
    let active = ActiveModel {
        id: Set(id),
        sku: Set(payload.sku),
        name: Set(payload.name),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        active: Set(true),
        category_id: Set(payload.category_id),
        created_at: NotSet,
    };
    let product = active.insert(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_create",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product created",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound("product".into())),
    };

    if let Some(stock) = payload.stock {
        if stock < 0 {
            return Err(AppError::InvalidState("stock cannot be negative".into()));
        }
    }

    if let Some(sku) = payload.sku.as_ref().filter(|s| **s != existing.sku) {
        let duplicate = Products::find()
            .filter(Column::Sku.eq(sku.clone()))
            .one(&state.orm)
            .await?;
        if duplicate.is_some() {
            return Err(AppError::Conflict(format!("sku {} already exists", sku)));
        }
    }

    if let Some(category_id) = payload.category_id {
        if Categories::find_by_id(category_id)
            .one(&state.orm)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound("category".into()));
        }
    }

    let mut active: ActiveModel = existing.into();
    if let Some(sku) = payload.sku {
        active.sku = Set(sku);
    }
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(stock);
    }
    if let Some(active_flag) = payload.active {
        active.active = Set(active_flag);
    }
    if let Some(category_id) = payload.category_id {
        active.category_id = Set(category_id);
    }

    let product = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_update",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Products::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound("product".into()));
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_delete",
        Some("products"),
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Marks products as inactive once their stock is depleted. Invoked from the
/// stock-decrement path for every product that may have reached zero, and from
/// `validate_purchasable` when it observes an already-depleted product.
pub async fn deactivate_depleted<C: ConnectionTrait>(
    conn: &C,
    product_ids: &[Uuid],
) -> AppResult<u64> {
    if product_ids.is_empty() {
        return Ok(0);
    }
    let result = Products::update_many()
        .col_expr(Column::Active, Expr::value(false))
        .filter(
            Condition::all()
                .add(Column::Id.is_in(product_ids.iter().copied()))
                .add(Column::Stock.lte(0))
                .add(Column::Active.eq(true)),
        )
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Fetches a product and checks it can be added to a cart. An inactive product
/// is rejected; a product with zero stock is deactivated and then rejected.
pub async fn validate_purchasable<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> AppResult<ProductModel> {
    let product = Products::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("product".into()))?;

    if !product.active {
        return Err(AppError::InvalidState(format!(
            "product {} is disabled",
            product.sku
        )));
    }

    if product.stock == 0 {
        deactivate_depleted(conn, &[product.id]).await?;
        return Err(AppError::InvalidState(format!(
            "product {} is disabled",
            product.sku
        )));
    }

    Ok(product)
}

/// Authoritative pre-order check. Re-reads every product under a row lock and
/// verifies existence, active flag, and stock sufficiency for every line
/// before any stock is mutated. Returns the locked products in line order.
pub async fn validate_products_for_order<C: ConnectionTrait>(
    conn: &C,
    lines: &[StockLine],
) -> AppResult<Vec<ProductModel>> {
    let mut products = Vec::with_capacity(lines.len());
    for line in lines {
        let product = Products::find_by_id(line.product_id)
            .lock(LockType::Update)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("product".into()))?;

        if !product.active {
            return Err(AppError::InvalidState(format!(
                "product {} is disabled",
                product.sku
            )));
        }

        if line.quantity > product.stock {
            return Err(AppError::InvalidState(format!(
                "insufficient stock for product {}",
                product.sku
            )));
        }

        products.push(product);
    }
    Ok(products)
}

/// Subtracts each line's quantity from its product's stock in one batch.
/// Sufficiency must already have been checked by `validate_products_for_order`.
pub async fn decrease_stock_for_order_items<C: ConnectionTrait>(
    conn: &C,
    lines: &[StockLine],
) -> AppResult<()> {
    for line in lines {
        Products::update_many()
            .col_expr(Column::Stock, Expr::col(Column::Stock).sub(line.quantity))
            .filter(Column::Id.eq(line.product_id))
            .exec(conn)
            .await?;
    }

    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    deactivate_depleted(conn, &ids).await?;
    Ok(())
}

/// Adds each line's quantity back to its product's stock. Cancellation only.
pub async fn increase_stock_for_order_items<C: ConnectionTrait>(
    conn: &C,
    lines: &[StockLine],
) -> AppResult<()> {
    for line in lines {
        Products::update_many()
            .col_expr(Column::Stock, Expr::col(Column::Stock).add(line.quantity))
            .filter(Column::Id.eq(line.product_id))
            .exec(conn)
            .await?;
    }
    Ok(())
}

pub(crate) fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        sku: model.sku,
        name: model.name,
        description: model.description,
        price: model.price,
        stock: model.stock,
        active: model.active,
        category_id: model.category_id,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
