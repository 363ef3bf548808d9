use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemDto {
    pub id: Uuid,
    pub product: Product,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub items: Vec<CartItemDto>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartCleared {
    pub removed: u64,
}
