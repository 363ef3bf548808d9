use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{CartCleared, CartItemDto, CartView},
        categories::CategoryList,
        orders::{CreateOrderRequest, OrderList, OrderWithItems},
        products,
    },
    models::{Category, Order, OrderItem, OrderStatus, Product, Role, User},
    response::{ApiResponse, Meta},
    routes::{admin, auth, cart, categories, health, orders, params, products as product_routes},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        categories::list_categories,
        categories::get_category,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        product_routes::list_products,
        product_routes::get_product,
        product_routes::create_product,
        product_routes::update_product,
        product_routes::delete_product,
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        cart::clear_cart,
        orders::list_orders,
        orders::create_order,
        orders::get_order,
        orders::cancel_order,
        admin::list_all_orders,
        admin::update_order_status,
        admin::list_low_stock,
        admin::adjust_inventory
    ),
    components(
        schemas(
            User,
            Role,
            Category,
            Product,
            Order,
            OrderItem,
            OrderStatus,
            CategoryList,
            CartView,
            CartItemDto,
            CartCleared,
            CreateOrderRequest,
            OrderList,
            OrderWithItems,
            admin::ProductList,
            admin::UpdateOrderStatusRequest,
            admin::InventoryAdjustRequest,
            admin::LowStockQuery,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            products::ProductList,
            Meta,
            ApiResponse<Product>,
            ApiResponse<products::ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<admin::ProductList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Products", description = "Product endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
