use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::courier::{Courier, CourierStatus, NewCourier};
use crate::models::delivery::Delivery;
use crate::storage::{CourierRepository, RepositoryError};

const COURIER_COLUMNS: &str =
    "c.id, c.name, c.phone, c.status, c.transport_type, c.created_at, c.updated_at";

#[derive(FromRow)]
struct CourierRow {
    id: Uuid,
    name: String,
    phone: String,
    status: String,
    transport_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CourierRow> for Courier {
    type Error = RepositoryError;

    fn try_from(row: CourierRow) -> Result<Self, Self::Error> {
        Ok(Courier {
            id: row.id,
            name: row.name,
            phone: row.phone,
            status: row.status.parse().map_err(RepositoryError::UnknownStatus)?,
            transport_type: row
                .transport_type
                .parse()
                .map_err(RepositoryError::UnknownTransport)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct DeliveryRow {
    id: Uuid,
    courier_id: Uuid,
    order_id: String,
    assigned_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Delivery {
            id: row.id,
            courier_id: row.courier_id,
            order_id: row.order_id,
            assigned_at: row.assigned_at,
            deadline: row.deadline,
        }
    }
}

/// Postgres-backed repository. Row locks come from `SELECT .. FOR UPDATE`
/// inside the caller's transaction.
#[derive(Debug, Clone)]
pub struct PgCourierRepository {
    pool: PgPool,
}

impl PgCourierRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and brings the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|err| RepositoryError::Database(err.into()))?;
        Ok(Self::new(pool))
    }
}

fn map_insert_error(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::DuplicateOrder,
        _ => RepositoryError::Database(err),
    }
}

#[async_trait]
impl CourierRepository for PgCourierRepository {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), RepositoryError> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), RepositoryError> {
        Ok(tx.rollback().await?)
    }

    async fn find_available_courier_for_update(
        &self,
        tx: &mut Self::Tx,
    ) -> Result<Option<Courier>, RepositoryError> {
        let query = format!(
            r#"
            SELECT {COURIER_COLUMNS}
            FROM couriers c
            WHERE c.status = 'available'
            ORDER BY (SELECT COUNT(*) FROM delivery d WHERE d.courier_id = c.id) ASC, c.id ASC
            LIMIT 1
            FOR UPDATE OF c
            "#
        );
        let row = sqlx::query_as::<_, CourierRow>(&query)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(Courier::try_from).transpose()
    }

    async fn get_courier_for_update(
        &self,
        tx: &mut Self::Tx,
        courier_id: Uuid,
    ) -> Result<Option<Courier>, RepositoryError> {
        let query = format!("SELECT {COURIER_COLUMNS} FROM couriers c WHERE c.id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, CourierRow>(&query)
            .bind(courier_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(Courier::try_from).transpose()
    }

    async fn update_courier_status(
        &self,
        tx: &mut Self::Tx,
        courier_id: Uuid,
        status: CourierStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE couriers
            SET status = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(courier_id)
        .bind(status.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::CourierNotFound);
        }
        Ok(())
    }

    async fn insert_delivery(
        &self,
        tx: &mut Self::Tx,
        delivery: &Delivery,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO delivery (id, courier_id, order_id, assigned_at, deadline)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.courier_id)
        .bind(&delivery.order_id)
        .bind(delivery.assigned_at)
        .bind(delivery.deadline)
        .execute(&mut **tx)
        .await
        .map_err(map_insert_error)?;
        Ok(())
    }

    async fn get_delivery_by_order_id(
        &self,
        tx: &mut Self::Tx,
        order_id: &str,
    ) -> Result<Option<Delivery>, RepositoryError> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, courier_id, order_id, assigned_at, deadline
            FROM delivery
            WHERE order_id = $1
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(Delivery::from))
    }

    async fn delete_delivery_by_order_id(
        &self,
        tx: &mut Self::Tx,
        order_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM delivery WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn has_unexpired_delivery(
        &self,
        tx: &mut Self::Tx,
        courier_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM delivery
                WHERE courier_id = $1 AND deadline >= $2
            )
            "#,
        )
        .bind(courier_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;
        Ok(exists)
    }

    async fn release_expired_couriers(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE couriers c
            SET status = 'available', updated_at = $1
            WHERE c.status = 'busy'
              AND EXISTS (
                  SELECT 1 FROM delivery d
                  WHERE d.courier_id = c.id AND d.deadline < $1
              )
              AND NOT EXISTS (
                  SELECT 1 FROM delivery d
                  WHERE d.courier_id = c.id AND d.deadline >= $1
              )
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn create_courier(
        &self,
        courier: NewCourier,
        now: DateTime<Utc>,
    ) -> Result<Courier, RepositoryError> {
        let query = format!(
            r#"
            INSERT INTO couriers AS c (id, name, phone, status, transport_type, created_at, updated_at)
            VALUES ($1, $2, $3, 'available', $4, $5, $5)
            RETURNING {COURIER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, CourierRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&courier.name)
            .bind(&courier.phone)
            .bind(courier.transport_type.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Courier::try_from(row)
    }

    async fn list_couriers(&self) -> Result<Vec<Courier>, RepositoryError> {
        let query = format!("SELECT {COURIER_COLUMNS} FROM couriers c ORDER BY c.created_at, c.id");
        sqlx::query_as::<_, CourierRow>(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Courier::try_from)
            .collect()
    }

    async fn get_courier(&self, courier_id: Uuid) -> Result<Option<Courier>, RepositoryError> {
        let query = format!("SELECT {COURIER_COLUMNS} FROM couriers c WHERE c.id = $1");
        let row = sqlx::query_as::<_, CourierRow>(&query)
            .bind(courier_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Courier::try_from).transpose()
    }

    async fn set_courier_status(
        &self,
        courier_id: Uuid,
        status: CourierStatus,
        now: DateTime<Utc>,
    ) -> Result<Courier, RepositoryError> {
        let query = format!(
            r#"
            UPDATE couriers AS c
            SET status = $2, updated_at = $3
            WHERE c.id = $1 AND c.status <> 'busy'
            RETURNING {COURIER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, CourierRow>(&query)
            .bind(courier_id)
            .bind(status.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Courier::try_from(row),
            None => match self.get_courier(courier_id).await? {
                Some(_) => Err(RepositoryError::CourierBusy),
                None => Err(RepositoryError::CourierNotFound),
            },
        }
    }

    async fn list_deliveries(&self) -> Result<Vec<Delivery>, RepositoryError> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, courier_id, order_id, assigned_at, deadline
            FROM delivery
            ORDER BY assigned_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Delivery::from).collect())
    }
}
