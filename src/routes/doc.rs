use utoipa::{
    Modify, OpenApi,
    openapi::{
        self, OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        admin::{AdminStats, CategoryStat, DailyStat, StatsSummary},
        cart::{CartList, UpdateQuantityRequest},
        coupons::{
            CouponList, CreateCouponRequest, RegisterUsageRequest, UpdateCouponRequest,
            UsageRecorded,
        },
        orders::{OrderList, OrderWithItems, UpdateOrderStatusRequest},
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
        users::{AdminCheck, UpsertUserRequest, UserList},
    },
    models::{
        Coupon, DiscountType, LineItem, Order, OrderDraft, OrderItem, OrderStatus, PaymentMethod,
        PriceBreakdown, Product, ShippingAddress, User,
    },
    response::{ApiResponse, Created, Meta},
    routes::{admin, cart, coupons, health, orders, params, products, users},
    storefront::remote::AccountCartRecord,
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
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        cart::list_cart,
        cart::add_to_cart,
        cart::update_quantity,
        cart::remove_from_cart,
        cart::clear_cart,
        coupons::get_coupon,
        coupons::register_usage,
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        users::upsert_user,
        users::check_admin,
        admin::dashboard_stats,
        admin::list_coupons,
        admin::create_coupon,
        admin::update_coupon,
        admin::delete_coupon,
        admin::list_all_orders,
        admin::update_order_status,
        admin::list_users,
        admin::promote_user
    ),
    components(
        schemas(
            User,
            Product,
            LineItem,
            AccountCartRecord,
            Coupon,
            DiscountType,
            PriceBreakdown,
            ShippingAddress,
            PaymentMethod,
            OrderDraft,
            Order,
            OrderItem,
            OrderStatus,
            Created,
            CartList,
            UpdateQuantityRequest,
            CouponList,
            CreateCouponRequest,
            UpdateCouponRequest,
            RegisterUsageRequest,
            UsageRecorded,
            OrderList,
            OrderWithItems,
            UpdateOrderStatusRequest,
            ProductList,
            CreateProductRequest,
            UpdateProductRequest,
            UpsertUserRequest,
            AdminCheck,
            UserList,
            AdminStats,
            StatsSummary,
            CategoryStat,
            DailyStat,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartList>,
            ApiResponse<Coupon>,
            ApiResponse<Created>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<AdminStats>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Cart", description = "Account cart endpoints"),
        (name = "Coupons", description = "Coupon lookup and redemption"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Users", description = "User registration and roles"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
