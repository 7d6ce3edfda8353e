use chrono::{Duration, Utc};
use storefront::{
    config::AppConfig,
    db::{DbPool, create_pool},
    models::DiscountType,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_user(&pool, "admin@example.com", "Store Admin", "admin").await?;
    let user_id = ensure_user(&pool, "shopper@example.com", "Test Shopper", "user").await?;
    seed_products(&pool).await?;
    seed_coupons(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(pool: &DbPool, email: &str, name: &str, role: &str) -> anyhow::Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, name, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(name)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(id)
}

async fn seed_products(pool: &DbPool) -> anyhow::Result<()> {
    let products = [
        ("Cotton Panjabi", "Eid collection panjabi", "men", 2450, &["M", "L", "XL"][..], 40),
        ("Printed Kurti", "Everyday printed kurti", "women", 1350, &["S", "M", "L"][..], 60),
        ("Leather Wallet", "Hand-stitched leather wallet", "accessories", 950, &[][..], 120),
        ("Kids T-Shirt", "Soft cotton tee", "kids", 450, &["2Y", "4Y", "6Y"][..], 80),
    ];

    for (name, desc, category, price, sizes, stock) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, category, price, sizes, stock)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(category)
        .bind(price as i64)
        .bind(serde_json::json!(sizes))
        .bind(stock)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}

async fn seed_coupons(pool: &DbPool) -> anyhow::Result<()> {
    let expiry = Utc::now() + Duration::days(90);
    let coupons = [
        ("SAVE10", DiscountType::Percentage, 10_i64, 0_i64, 100),
        ("FLAT200", DiscountType::Fixed, 200, 1000, 50),
        ("WELCOME", DiscountType::Fixed, 100, 0, 1000),
    ];

    for (code, discount_type, value, min_purchase, usage_limit) in coupons {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, discount_type, discount_value, min_purchase, usage_limit, expiry_date, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'seed')
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(discount_type.as_str())
        .bind(value)
        .bind(min_purchase)
        .bind(usage_limit)
        .bind(expiry)
        .execute(pool)
        .await?;
    }

    println!("Seeded coupons");
    Ok(())
}
