use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum_storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let pool = create_pool(&config.database_url).await?;

    let admin_id = ensure_user(&pool, "admin", "admin@example.com", "admin123", "admin").await?;
    let user_id = ensure_user(&pool, "user", "user@example.com", "user123", "customer").await?;
    let category_id = ensure_category(&pool, "Merch").await?;
    seed_products(&pool, category_id).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    username: &str,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, username, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_optional(pool)
    .await?;

    // If user already exists, fetch id
    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {username} (role={role})");
    Ok(user_id)
}

async fn ensure_category(pool: &sqlx::PgPool, name: &str) -> anyhow::Result<Uuid> {
    sqlx::query(
        r#"
        INSERT INTO categories (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .execute(pool)
    .await?;

    let existing: (Uuid,) = sqlx::query_as("SELECT id FROM categories WHERE name = $1")
        .bind(name)
        .fetch_one(pool)
        .await?;

    println!("Ensured category {name}");
    Ok(existing.0)
}

async fn seed_products(pool: &sqlx::PgPool, category_id: Uuid) -> anyhow::Result<()> {
    let products = vec![
        ("HOODIE-AXM", "Axum Hoodie", "Warm hoodie for Rustaceans", 550000, 50),
        ("MUG-FERRIS", "Ferris Mug", "Coffee tastes better with Ferris", 120000, 100),
        ("STICKER-RS", "Rust Sticker Pack", "Decorate your laptop", 50000, 200),
        ("EBOOK-ASYNC", "E-book: Async Rust", "Learn async Rust patterns", 250000, 75),
    ];

    for (sku, name, desc, price, stock) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, description, price, stock, category_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (sku) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sku)
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(stock)
        .bind(category_id)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
