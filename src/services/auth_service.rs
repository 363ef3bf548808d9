use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use password_hash::rand_core::OsRng;
use sqlx::FromRow;
use uuid::Uuid;

use crate::dto::auth::{Claims, LoginRequest, LoginResponse, RegisterRequest};
use crate::{
    audit::log_audit,
    db::DbPool,
    error::{AppError, AppResult},
    models::{Role, User},
    response::{ApiResponse, Meta},
};

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_model(self) -> AppResult<User> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| anyhow::anyhow!("unknown role {:?}", self.role))?;
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            role,
            created_at: self.created_at,
        })
    }
}

pub async fn register_user(
    pool: &DbPool,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    let RegisterRequest {
        username,
        email,
        password,
    } = payload;

    let exist: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM users WHERE username = $1 OR email = $2")
            .bind(username.as_str())
            .bind(email.as_str())
            .fetch_optional(pool)
            .await?;

    if exist.is_some() {
        return Err(AppError::Conflict(
            "username or email is already taken".to_string(),
        ));
    }

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();

    let id = Uuid::new_v4();

    // Registration always produces a customer; admin accounts come from seeding.
    let user: UserRow = sqlx::query_as(
        "INSERT INTO users (id, username, email, password_hash, role) VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(id)
    .bind(username.as_str())
    .bind(email.as_str())
    .bind(password_hash)
    .bind(Role::Customer.as_str())
    .fetch_one(pool)
    .await?;

    let user = user.into_model()?;

    if let Err(err) = log_audit(
        pool,
        Some(user.id),
        "user_register",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
    Ok(ApiResponse::success("User created", user, None))
}

pub async fn login_user(
    pool: &DbPool,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest { username, password } = payload;
    let user: Option<UserRow> =
        sqlx::query_as("SELECT * FROM users WHERE username = $1 OR email = $1")
            .bind(username.as_str())
            .fetch_optional(pool)
            .await?;

    let user = match user {
        Some(u) => u,
        None => {
            return Err(AppError::Unauthenticated(
                "Invalid username or password".into(),
            ));
        }
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    let argon2 = Argon2::default();
    if argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(AppError::Unauthenticated(
            "Invalid username or password".into(),
        ));
    }

    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| AppError::Internal(anyhow::anyhow!("JWT_SECRET is not set")))?;

    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.id.to_string(),
        username: user.username.clone(),
        role: user.role.clone(),
        exp: expiration.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    let resp = LoginResponse {
        token: format!("Bearer {}", token),
    };

    if let Err(err) = log_audit(
        pool,
        Some(user.id),
        "user_login",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("Logged in", resp, Some(Meta::empty())))
}
