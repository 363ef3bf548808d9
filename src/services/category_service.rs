use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
    entity::categories::{ActiveModel, Column, Entity as Categories, Model as CategoryModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Category,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

pub async fn list_categories(
    state: &AppState,
    pagination: Pagination,
) -> AppResult<ApiResponse<CategoryList>> {
    let (page, limit, offset) = pagination.normalize();

    let finder = Categories::find().order_by_asc(Column::Name);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(category_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Categories",
        CategoryList { items },
        Some(meta),
    ))
}

pub async fn get_category(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Category>> {
    let category = Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("category".into()))?;
    Ok(ApiResponse::success(
        "Category",
        category_from_entity(category),
        None,
    ))
}

pub async fn create_category(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;

    let duplicate = Categories::find()
        .filter(Column::Name.eq(payload.name.clone()))
        .one(&state.orm)
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict(format!(
            "category {} already exists",
            payload.name
        )));
    }

    if let Some(parent_id) = payload.parent_id {
        if Categories::find_by_id(parent_id)
            .one(&state.orm)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound("parent category".into()));
        }
    }

    let active = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name),
        parent_id: Set(payload.parent_id),
        created_at: NotSet,
    };
    let category = active.insert(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "category_create",
        Some("categories"),
        Some(serde_json::json!({ "category_id": category.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Category created",
        category_from_entity(category),
        Some(Meta::empty()),
    ))
}

pub async fn update_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;
    let existing = Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::NotFound("category".into()))?;

    if let Some(parent_id) = payload.parent_id {
        if parent_id == id {
            return Err(AppError::InvalidState(
                "category cannot be its own parent".into(),
            ));
        }
        if Categories::find_by_id(parent_id)
            .one(&state.orm)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound("parent category".into()));
        }
    }

    if let Some(name) = payload.name.as_ref().filter(|n| **n != existing.name) {
        let duplicate = Categories::find()
            .filter(Column::Name.eq(name.clone()))
            .one(&state.orm)
            .await?;
        if duplicate.is_some() {
            return Err(AppError::Conflict(format!(
                "category {} already exists",
                name
            )));
        }
    }

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(parent_id) = payload.parent_id {
        active.parent_id = Set(Some(parent_id));
    }
    let category = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "category_update",
        Some("categories"),
        Some(serde_json::json!({ "category_id": category.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        category_from_entity(category),
        Some(Meta::empty()),
    ))
}

pub async fn delete_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Categories::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound("category".into()));
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "category_delete",
        Some("categories"),
        Some(serde_json::json!({ "category_id": id })),
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

fn category_from_entity(model: CategoryModel) -> Category {
    Category {
        id: model.id,
        name: model.name,
        parent_id: model.parent_id,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
