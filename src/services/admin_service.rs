use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::OrderList,
    entity::{
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
        products::{
            ActiveModel as ProductActive, Column as ProdCol, Entity as Products,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderStatus, Product},
    response::{ApiResponse, Meta},
    routes::admin::{InventoryAdjustRequest, LowStockQuery, ProductList, UpdateOrderStatusRequest},
    routes::params::{OrderListQuery, SortOrder},
    services::{order_service, product_service},
    state::AppState,
};

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = OrderStatus::parse(status)
            .ok_or_else(|| AppError::InvalidState(format!("invalid order status {}", status)))?;
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let mut finder = Orders::find().filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_service::order_from_entity)
        .collect::<AppResult<Vec<Order>>>()?;

    let meta = Meta::new(page, limit, total);

    Ok(ApiResponse::success(
        "Orders",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Admin status transition. The same-status check runs before the cancel
/// redirect, so cancelling an already-cancelled order reports "already" rather
/// than "not pending".
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let new_status = OrderStatus::parse(&payload.status).ok_or_else(|| {
        AppError::InvalidState(format!("invalid order status {}", payload.status))
    })?;

    let existing = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("order".into()))?;

    let current = OrderStatus::parse(&existing.status)
        .ok_or_else(|| anyhow::anyhow!("unknown order status {:?}", existing.status))?;

    if new_status == current {
        return Err(AppError::InvalidState(format!(
            "order is already {}",
            current
        )));
    }

    if new_status == OrderStatus::Cancelled {
        let (order, _items) = order_service::do_cancel(state, user, id).await?;
        return Ok(ApiResponse::success(
            "Order cancelled",
            order,
            Some(Meta::empty()),
        ));
    }

    if !current.can_transition_to(new_status) {
        return Err(AppError::InvalidState(format!(
            "invalid status transition from {} to {}",
            current, new_status
        )));
    }

    let mut active: OrderActive = existing.into();
    active.status = Set(new_status.as_str().to_owned());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "status": order.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        order_service::order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(5);
    let (page, limit, offset) = query.pagination.normalize();

    let mut finder = Products::find().filter(ProdCol::Stock.lte(threshold));
    finder = finder
        .order_by_asc(ProdCol::Stock)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_service::product_from_entity)
        .collect();

    let data = ProductList { items };
    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Low stock", data, Some(meta)))
}

pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::InvalidState("delta must not be 0".into()));
    }

    let txn = state.orm.begin().await?;
    let product = Products::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("product".into()))?;

    let new_stock = product.stock + payload.delta;
    if new_stock < 0 {
        return Err(AppError::InvalidState("stock cannot be negative".into()));
    }

    let mut active: ProductActive = product.into();
    active.stock = Set(new_stock);
    let updated = active.update(&txn).await?;

    let depleted = new_stock == 0;
    if depleted {
        product_service::deactivate_depleted(&txn, &[updated.id]).await?;
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "inventory_adjust",
        Some("products"),
        Some(serde_json::json!({ "product_id": updated.id, "delta": payload.delta })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let mut product = product_service::product_from_entity(updated);
    if depleted {
        product.active = false;
    }

    Ok(ApiResponse::success(
        "Inventory updated",
        product,
        Some(Meta::empty()),
    ))
}
