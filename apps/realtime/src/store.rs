use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{AlertKind, AlertSeverity, ChatMessage, GeoPoint};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct LocationRecord {
    pub user_id: Uuid,
    pub circle_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub address: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub user_id: Uuid,
    pub circle_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
}

/// User and circle-membership lookups. Membership is re-queried on every
/// event that needs it; there is no cache, so revocations take effect on the
/// next event.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<UserRecord>>;
    async fn circle_of(&self, user_id: Uuid) -> anyhow::Result<Option<Uuid>>;
    async fn is_circle_member(&self, user_id: Uuid, circle_id: Uuid) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait LocationHistoryStore: Send + Sync {
    async fn append(&self, record: &LocationRecord) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SafetyAlertStore: Send + Sync {
    /// Returns the id of the stored row.
    async fn insert(&self, record: &AlertRecord) -> anyhow::Result<String>;
}

#[async_trait]
pub trait ChatMessageStore: Send + Sync {
    async fn insert(&self, message: &ChatMessage) -> anyhow::Result<()>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for PgStore {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, email, first_name, last_name, is_active FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let first = r.get::<Option<String>, _>("first_name").unwrap_or_default();
            let last = r.get::<Option<String>, _>("last_name").unwrap_or_default();
            UserRecord {
                id: r.get("id"),
                email: r.get("email"),
                display_name: format!("{first} {last}").trim().to_string(),
                is_active: r.get("is_active"),
            }
        }))
    }

    async fn circle_of(&self, user_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        let row = sqlx::query("SELECT circle_id FROM circle_members WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("circle_id")))
    }

    async fn is_circle_member(&self, user_id: Uuid, circle_id: Uuid) -> anyhow::Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM circle_members WHERE user_id = $1 AND circle_id = $2",
        )
        .bind(user_id)
        .bind(circle_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl LocationHistoryStore for PgStore {
    async fn append(&self, record: &LocationRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO location_history(user_id, circle_id, latitude, longitude, accuracy, address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.user_id)
        .bind(record.circle_id)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.accuracy)
        .bind(&record.address)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SafetyAlertStore for PgStore {
    async fn insert(&self, record: &AlertRecord) -> anyhow::Result<String> {
        let location = record
            .location
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let row = sqlx::query(
            r#"
            INSERT INTO safety_alerts(user_id, circle_id, alert_type, severity, message, location, is_resolved, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, false, $7, $7)
            RETURNING id::text
            "#,
        )
        .bind(record.user_id)
        .bind(record.circle_id)
        .bind(record.kind.as_str())
        .bind(record.severity.as_str())
        .bind(&record.message)
        .bind(location)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<String, _>("id"))
    }
}

#[async_trait]
impl ChatMessageStore for PgStore {
    async fn insert(&self, message: &ChatMessage) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages(id, room_id, sender_id, content, message_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(&message.room_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
