use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use super::{DriverStore, OtpStore, ResetTokenStore, RideStore, UserStore};
use crate::{
    auth::repo_types::{
        NewUser, OtpCheck, OtpToken, PasswordResetToken, Redemption, User, UserRow,
    },
    drivers::repo_types::{Driver, NewDriver},
    rides::repo_types::{NewRide, Ride, RideChange, RideRow, RideStatus, Transition},
};

const USER_COLUMNS: &str = "id, email, password_hash, name, phone, role";
const DRIVER_COLUMNS: &str = "id, name, phone, available";
const INSERT_USER: &str = r#"
    INSERT INTO users (email, password_hash, name, phone, role)
    VALUES ($1, $2, $3, $4, $5)
    RETURNING id, email, password_hash, name, phone, role
"#;
const INSERT_DRIVER: &str = r#"
    INSERT INTO drivers (name, phone, available)
    VALUES ($1, $2, FALSE)
    RETURNING id, name, phone, available
"#;
const RIDE_COLUMNS: &str = "id, rider_id, driver_id, status, pickup_location, dropoff_location, \
     estimated_fare, distance, duration, booked_at, started_at, completed_at, rating, comment";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_user(&self, column: &str, value: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("find user by {column}"))?;
        row.map(User::try_from).transpose()
    }

    async fn fetch_rides(&self, sql: &str, bind: Option<i64>) -> anyhow::Result<Vec<Ride>> {
        let mut query = sqlx::query_as::<_, RideRow>(sql);
        if let Some(v) = bind {
            query = query.bind(v);
        }
        let rows = query.fetch_all(&self.db).await.context("list rides")?;
        rows.into_iter().map(Ride::try_from).collect()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.fetch_user("email", email).await
    }

    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<User>> {
        self.fetch_user("phone", phone).await
    }

    async fn insert(&self, user: NewUser) -> anyhow::Result<Option<User>> {
        let res = sqlx::query_as::<_, UserRow>(INSERT_USER)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(&user.phone)
            .bind(user.role.as_str())
            .fetch_one(&self.db)
            .await;
        match res {
            Ok(row) => Ok(Some(User::try_from(row)?)),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e).context("insert user"),
        }
    }

    async fn insert_with_driver(
        &self,
        user: NewUser,
        driver: NewDriver,
    ) -> anyhow::Result<Option<(User, Driver)>> {
        // dropping `tx` without commit rolls the user row back
        let mut tx = self.db.begin().await.context("begin register")?;
        let res = sqlx::query_as::<_, UserRow>(INSERT_USER)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(&user.phone)
            .bind(user.role.as_str())
            .fetch_one(&mut *tx)
            .await;
        let user = match res {
            Ok(row) => User::try_from(row)?,
            Err(e) if is_unique_violation(&e) => return Ok(None),
            Err(e) => return Err(e).context("insert user"),
        };
        let driver = sqlx::query_as::<_, Driver>(INSERT_DRIVER)
            .bind(&driver.name)
            .bind(&driver.phone)
            .fetch_one(&mut *tx)
            .await
            .context("insert driver")?;
        tx.commit().await.context("commit register")?;
        Ok(Some((user, driver)))
    }

}

#[async_trait]
impl DriverStore for PgStore {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Driver>> {
        let sql = format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE id = $1");
        sqlx::query_as::<_, Driver>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find driver by id")
    }

    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<Driver>> {
        let sql = format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE phone = $1 LIMIT 1");
        sqlx::query_as::<_, Driver>(&sql)
            .bind(phone)
            .fetch_optional(&self.db)
            .await
            .context("find driver by phone")
    }

    async fn insert(&self, driver: NewDriver) -> anyhow::Result<Driver> {
        sqlx::query_as::<_, Driver>(INSERT_DRIVER)
            .bind(&driver.name)
            .bind(&driver.phone)
            .fetch_one(&self.db)
            .await
            .context("insert driver")
    }

    async fn set_available(&self, id: i64, available: bool) -> anyhow::Result<Option<Driver>> {
        let sql = format!(
            r#"
            UPDATE drivers SET available = $2, resume_available = FALSE
             WHERE id = $1
            RETURNING {DRIVER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Driver>(&sql)
            .bind(id)
            .bind(available)
            .fetch_optional(&self.db)
            .await
            .context("set driver availability")
    }

    async fn occupy(&self, id: i64) -> anyhow::Result<Option<Driver>> {
        let sql = format!(
            r#"
            UPDATE drivers
               SET resume_available = resume_available OR available,
                   available = FALSE
             WHERE id = $1
            RETURNING {DRIVER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Driver>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("occupy driver")
    }

    async fn release(&self, id: i64) -> anyhow::Result<Option<Driver>> {
        let sql = format!(
            r#"
            UPDATE drivers
               SET available = available OR resume_available,
                   resume_available = FALSE
             WHERE id = $1
               AND NOT EXISTS (
                   SELECT 1 FROM rides
                    WHERE driver_id = $1 AND status IN ('ACCEPTED', 'STARTED'))
            RETURNING {DRIVER_COLUMNS}
            "#
        );
        let released = sqlx::query_as::<_, Driver>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("release driver")?;
        match released {
            Some(driver) => Ok(Some(driver)),
            None => DriverStore::find_by_id(self, id).await,
        }
    }

    async fn list_available(&self) -> anyhow::Result<Vec<Driver>> {
        let sql = format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE available ORDER BY id");
        sqlx::query_as::<_, Driver>(&sql)
            .fetch_all(&self.db)
            .await
            .context("list available drivers")
    }
}

#[async_trait]
impl RideStore for PgStore {
    async fn insert(&self, ride: NewRide) -> anyhow::Result<Ride> {
        let sql = format!(
            r#"
            INSERT INTO rides (rider_id, status, pickup_location, dropoff_location,
                               estimated_fare, distance, duration, booked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {RIDE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RideRow>(&sql)
            .bind(ride.rider_id)
            .bind(ride.status.as_str())
            .bind(&ride.pickup_location)
            .bind(&ride.dropoff_location)
            .bind(ride.estimated_fare)
            .bind(ride.distance)
            .bind(ride.duration)
            .bind(ride.booked_at)
            .fetch_one(&self.db)
            .await
            .context("insert ride")?;
        Ride::try_from(row)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Ride>> {
        let sql = format!("SELECT {RIDE_COLUMNS} FROM rides WHERE id = $1");
        let row = sqlx::query_as::<_, RideRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find ride by id")?;
        row.map(Ride::try_from).transpose()
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Ride>> {
        let sql = format!("SELECT {RIDE_COLUMNS} FROM rides ORDER BY id");
        self.fetch_rides(&sql, None).await
    }

    async fn find_by_rider(&self, rider_id: i64) -> anyhow::Result<Vec<Ride>> {
        let sql = format!("SELECT {RIDE_COLUMNS} FROM rides WHERE rider_id = $1 ORDER BY id");
        self.fetch_rides(&sql, Some(rider_id)).await
    }

    async fn find_by_driver(&self, driver_id: i64) -> anyhow::Result<Vec<Ride>> {
        let sql = format!("SELECT {RIDE_COLUMNS} FROM rides WHERE driver_id = $1 ORDER BY id");
        self.fetch_rides(&sql, Some(driver_id)).await
    }

    async fn find_by_status(&self, status: RideStatus) -> anyhow::Result<Vec<Ride>> {
        let sql = format!("SELECT {RIDE_COLUMNS} FROM rides WHERE status = $1 ORDER BY id");
        let rows = sqlx::query_as::<_, RideRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.db)
            .await
            .context("find rides by status")?;
        rows.into_iter().map(Ride::try_from).collect()
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Ride>> {
        let sql = format!(
            r#"
            SELECT {RIDE_COLUMNS}
              FROM rides
             WHERE strpos(lower(pickup_location), lower($1)) > 0
                OR strpos(lower(dropoff_location), lower($1)) > 0
             ORDER BY id
            "#
        );
        let rows = sqlx::query_as::<_, RideRow>(&sql)
            .bind(query)
            .fetch_all(&self.db)
            .await
            .context("search rides")?;
        rows.into_iter().map(Ride::try_from).collect()
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM rides WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete ride")?;
        Ok(res.rows_affected() > 0)
    }

    async fn transition(&self, id: i64, change: RideChange) -> anyhow::Result<Transition> {
        let allowed: Vec<String> = change
            .allowed_from()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let (driver_id, started_at, completed_at) = match change {
            RideChange::Accept { driver_id } => (Some(driver_id), None, None),
            RideChange::Start { at } => (None, Some(at), None),
            RideChange::Complete { at } => (None, None, Some(at)),
            RideChange::Cancel => (None, None, None),
        };
        // Single conditional UPDATE: the status guard is the compare half of the swap.
        let sql = format!(
            r#"
            UPDATE rides
               SET status = $2,
                   driver_id = COALESCE($3, driver_id),
                   started_at = COALESCE($4, started_at),
                   completed_at = COALESCE($5, completed_at)
             WHERE id = $1 AND status = ANY($6)
            RETURNING {RIDE_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, RideRow>(&sql)
            .bind(id)
            .bind(change.target().as_str())
            .bind(driver_id)
            .bind(started_at)
            .bind(completed_at)
            .bind(allowed)
            .fetch_optional(&self.db)
            .await
            .context("transition ride")?;

        if let Some(row) = updated {
            return Ok(Transition::Applied(Ride::try_from(row)?));
        }
        match RideStore::find_by_id(self, id).await? {
            Some(current) => Ok(Transition::Rejected(current.status)),
            None => Ok(Transition::Missing),
        }
    }

    async fn set_rating(
        &self,
        id: i64,
        rating: i32,
        comment: Option<String>,
    ) -> anyhow::Result<Option<Ride>> {
        let sql = format!(
            "UPDATE rides SET rating = $2, comment = $3 WHERE id = $1 RETURNING {RIDE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RideRow>(&sql)
            .bind(id)
            .bind(rating)
            .bind(comment)
            .fetch_optional(&self.db)
            .await
            .context("rate ride")?;
        row.map(Ride::try_from).transpose()
    }
}

#[async_trait]
impl OtpStore for PgStore {
    async fn upsert(&self, token: OtpToken) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO otp_tokens (user_email, code, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_email)
            DO UPDATE SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&token.user_email)
        .bind(&token.code)
        .bind(token.expires_at)
        .execute(&self.db)
        .await
        .context("upsert otp token")?;
        Ok(())
    }

    async fn find(&self, user_email: &str) -> anyhow::Result<Option<OtpToken>> {
        sqlx::query_as::<_, OtpToken>(
            "SELECT user_email, code, expires_at FROM otp_tokens WHERE user_email = $1",
        )
        .bind(user_email)
        .fetch_optional(&self.db)
        .await
        .context("find otp token")
    }

    async fn consume(
        &self,
        user_email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<OtpCheck> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM otp_tokens
             WHERE user_email = $1 AND code = $2 AND expires_at > $3
            "#,
        )
        .bind(user_email)
        .bind(code)
        .bind(now)
        .execute(&self.db)
        .await
        .context("consume otp token")?;

        if deleted.rows_affected() > 0 {
            return Ok(OtpCheck::Accepted);
        }
        Ok(match OtpStore::find(self, user_email).await? {
            Some(_) => OtpCheck::Rejected,
            None => OtpCheck::Missing,
        })
    }
}

#[async_trait]
impl ResetTokenStore for PgStore {
    async fn upsert(&self, token: PasswordResetToken) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (user_id, token, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .execute(&self.db)
        .await
        .context("upsert reset token")?;
        Ok(())
    }

    async fn redeem(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> anyhow::Result<Redemption> {
        let mut tx = self.db.begin().await.context("begin reset")?;
        let taken = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            DELETE FROM password_reset_tokens
             WHERE token = $1
            RETURNING token, user_id, expires_at
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await
        .context("take reset token")?;
        let Some(taken) = taken else {
            return Ok(Redemption::Missing);
        };
        let user_id = taken.user_id;
        if now >= taken.expires_at {
            tx.commit().await.context("drop expired reset token")?;
            return Ok(Redemption::Expired { user_id });
        }
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&mut *tx)
            .await
            .context("update password")?;
        tx.commit().await.context("commit reset")?;
        Ok(Redemption::Applied { user_id })
    }
}
