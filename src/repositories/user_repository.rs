use crate::models::User;
use sqlx::{PgPool, Result as SqlxResult};
use uuid::Uuid;

/// Repository for user data access
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new UserRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new user
    pub async fn create(&self, email: &str, display_name: Option<&str>) -> SqlxResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, display_name)
            VALUES ($1, $2)
            RETURNING id, email, display_name, created_at
            "#,
        )
        .bind(email)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await
    }

    /// Find a user by UUID
    pub async fn find_by_id(&self, id: Uuid) -> SqlxResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, display_name, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Find a user by email
    pub async fn find_by_email(&self, email: &str) -> SqlxResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, display_name, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    /// Find or create a user by email (upsert pattern)
    /// Returns the user whether it was created or already existed
    pub async fn find_or_create_by_email(&self, email: &str) -> SqlxResult<User> {
        // Try to find existing user first
        if let Some(user) = self.find_by_email(email).await? {
            return Ok(user);
        }

        // Create new user if not found; a concurrent creator wins the unique
        // constraint race, so converge on the stored row
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email)
            VALUES ($1)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id, email, display_name, created_at
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
    }
}
