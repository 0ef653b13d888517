use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Account role. Stored as upper-case text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[serde(alias = "rider", alias = "Rider")]
    Rider,
    #[serde(alias = "driver", alias = "Driver")]
    Driver,
    #[serde(alias = "admin", alias = "Admin")]
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Rider => "RIDER",
            Role::Driver => "DRIVER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RIDER" => Ok(Role::Rider),
            "DRIVER" => Ok(Role::Driver),
            "ADMIN" => Ok(Role::Admin),
            other => anyhow::bail!("unknown role {other:?}"),
        }
    }
}

/// User record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub name: String,
    pub phone: String,
    pub role: Role,
}

/// Row shape as stored in Postgres (`role` is plain text).
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: String,
    pub role: String,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            name: r.name,
            phone: r.phone,
            role: r.role.parse()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: String,
    pub role: Role,
}

/// The single live one-time passcode of a user, keyed by email.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OtpToken {
    pub user_email: String,
    pub code: String,
    pub expires_at: OffsetDateTime,
}

/// Outcome of an attempt to consume an OTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    Accepted,
    Missing,
    Rejected,
}

/// Single-use password reset token, one per user.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PasswordResetToken {
    pub token: String,
    pub user_id: i64,
    pub expires_at: OffsetDateTime,
}

/// Outcome of redeeming a reset token. The token is gone afterwards unless `Missing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    Applied { user_id: i64 },
    Expired { user_id: i64 },
    Missing,
}
