use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    auth::{
        repo_types::{Role, User},
        services::{Authenticated, Profile, Registration},
    },
    drivers::repo_types::Driver,
};

/// Request body for user registration. `role` defaults to RIDER.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
    pub phone: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Password accepted; an OTP has been sent.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub requires_two_factor: bool,
    pub message: &'static str,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub phone: String,
    pub role: Role,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            phone: u.phone,
            role: u.role,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: PublicUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<Driver>,
}

impl From<Profile> for ProfileResponse {
    fn from(p: Profile) -> Self {
        Self {
            user: p.user.into(),
            driver: p.driver,
        }
    }
}

impl From<Registration> for ProfileResponse {
    fn from(r: Registration) -> Self {
        Self {
            user: r.user.into(),
            driver: r.driver,
        }
    }
}

/// Response returned after a successful second factor.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(flatten)]
    pub profile: ProfileResponse,
}

impl From<Authenticated> for AuthResponse {
    fn from(a: Authenticated) -> Self {
        Self {
            token: a.token,
            expires_at: a.expires_at,
            profile: a.profile.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
