use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{CreateOrderRequest, OrderList, OrderWithItems},
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems},
        carts::{Column as CartCol, Entity as Carts},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, Role},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::product_service::{
        StockLine, decrease_stock_for_order_items, increase_stock_for_order_items,
        validate_products_for_order,
    },
    state::AppState,
};

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = OrderStatus::parse(status)
            .ok_or_else(|| AppError::InvalidState(format!("invalid order status {}", status)))?;
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
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
        .map(order_from_entity)
        .collect::<AppResult<Vec<Order>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Converts the caller's cart into a pending order. The cart read, product
/// validation, order snapshot, stock decrement, and cart clear all commit in
/// one transaction, or not at all.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("no items in cart".into()))?;

    let lines = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .all(&txn)
        .await?;
    if lines.is_empty() {
        return Err(AppError::NotFound("no items in cart".into()));
    }

    let stock_lines: Vec<StockLine> = lines
        .iter()
        .map(|line| StockLine {
            product_id: line.product_id,
            quantity: line.quantity,
        })
        .collect();

    // Fresh, locked reads; prices are snapshotted from these rows, not the cart.
    let products = validate_products_for_order(&txn, &stock_lines).await?;

    let total_amount: i64 = products
        .iter()
        .zip(&stock_lines)
        .map(|(product, line)| product.price * line.quantity as i64)
        .sum();

    let order_id = Uuid::new_v4();
    let order_number = build_order_number(order_id);

    let order = OrderActive {
        id: Set(order_id),
        order_number: Set(order_number),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::Pending.as_str().to_owned()),
        total_amount: Set(total_amount),
        shipping_address: Set(payload.shipping_address),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::with_capacity(lines.len());
    for (product, line) in products.iter().zip(&stock_lines) {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(product.price),
            total_price: Set(product.price * line.quantity as i64),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;

        order_items.push(order_item_from_entity(item));
    }

    decrease_stock_for_order_items(&txn, &stock_lines).await?;

    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_create",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "order_number": order.order_number })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order_from_entity(order)?,
            items: order_items,
        },
        Some(Meta::empty()),
    ))
}

/// A customer may read only their own order; an admin may read any.
pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("order".into()))?;

    if user.role != Role::Admin && order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let (order, items) = do_cancel(state, user, id).await?;
    Ok(ApiResponse::success(
        "Order cancelled",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

/// Cancellation core, shared with the admin status endpoint. Only a pending
/// order can be cancelled; stock restoration, the status flip, and the total
/// reset commit together.
pub(crate) async fn do_cancel(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<(Order, Vec<OrderItem>)> {
    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("order".into()))?;

    if user.role != Role::Admin && order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let status = OrderStatus::parse(&order.status)
        .ok_or_else(|| anyhow::anyhow!("unknown order status {:?}", order.status))?;
    if status != OrderStatus::Pending {
        return Err(AppError::InvalidState("order is not pending".into()));
    }

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?;
    if items.is_empty() {
        return Err(AppError::NotFound("order items".into()));
    }

    let lines: Vec<StockLine> = items
        .iter()
        .map(|item| StockLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    increase_stock_for_order_items(&txn, &lines).await?;

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled.as_str().to_owned());
    active.total_amount = Set(0);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let items = items.into_iter().map(order_item_from_entity).collect();
    Ok((order_from_entity(order)?, items))
}

pub(crate) fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let status = OrderStatus::parse(&model.status)
        .ok_or_else(|| anyhow::anyhow!("unknown order status {:?}", model.status))?;
    Ok(Order {
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        status,
        total_amount: model.total_amount,
        shipping_address: model.shipping_address,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
        total_price: model.total_price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

pub(crate) fn build_order_number(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.to_string();
    let short = &suffix[..8];
    format!("ORD-{}-{}", date, short)
}
