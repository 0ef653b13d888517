use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        otp::OtpIssuer,
        password::CredentialHasher,
        repo_types::{NewUser, OtpCheck, OtpToken, PasswordResetToken, Redemption, Role, User},
        session::SessionStore,
    },
    clock::Clock,
    config::AuthConfig,
    drivers::repo_types::{Driver, NewDriver},
    error::{AppError, AppResult},
    notify::{dispatch, Notifier},
    store::Store,
};

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accepts `Bearer <token>` (any case) or a bare token.
fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Some(token),
        (Some(scheme), None, None) if scheme.eq_ignore_ascii_case("bearer") => None,
        (Some(token), None, None) => Some(token),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub driver: Option<Driver>,
}

/// An authenticated caller: the user and, for drivers, the linked driver record.
#[derive(Debug, Clone)]
pub struct Profile {
    pub user: User,
    pub driver: Option<Driver>,
}

#[derive(Debug, Clone)]
pub struct Authenticated {
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub profile: Profile,
}

/// Password + OTP login, bearer sessions and password reset.
#[derive(Clone)]
pub struct AuthSessionManager {
    store: Store,
    hasher: Arc<dyn CredentialHasher>,
    /// Verified against when the email is unknown, so both login failures cost one hash check.
    dummy_hash: Arc<OnceCell<String>>,
    otp: OtpIssuer,
    sessions: SessionStore,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl AuthSessionManager {
    pub fn new(
        store: Store,
        hasher: Arc<dyn CredentialHasher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        let sessions = SessionStore::new(
            clock.clone(),
            Duration::minutes(config.session_ttl_minutes),
        );
        Self {
            store,
            hasher,
            dummy_hash: Arc::new(OnceCell::new()),
            otp: OtpIssuer::new(notifier.clone()),
            sessions,
            notifier,
            clock,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    async fn profile_of(&self, user: User) -> AppResult<Profile> {
        let driver = match user.role {
            Role::Driver => self.store.drivers.find_by_phone(&user.phone).await?,
            _ => None,
        };
        Ok(Profile { user, driver })
    }

    #[instrument(skip(self, input), fields(email = %input.email, role = %input.role))]
    pub async fn register(&self, input: RegisterInput) -> AppResult<Registration> {
        let email = normalize_email(&input.email);
        let phone = input.phone.trim().to_string();
        if !is_valid_email(&email) {
            return Err(AppError::Validation("Invalid email".into()));
        }
        if input.password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation("Password too short".into()));
        }
        if phone.is_empty() {
            return Err(AppError::Validation("Phone is required".into()));
        }

        if self.store.users.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AppError::Conflict("Email already registered".into()));
        }
        if self.store.users.find_by_phone(&phone).await?.is_some() {
            warn!(phone = %phone, "phone already registered");
            return Err(AppError::Conflict("Phone number already registered".into()));
        }

        let password_hash = self.hasher.hash(&input.password)?;
        let name = input.name.trim().to_string();
        let new_user = NewUser {
            email,
            password_hash,
            name: name.clone(),
            phone: phone.clone(),
            role: input.role,
        };
        let created = match input.role {
            Role::Driver => self
                .store
                .users
                .insert_with_driver(new_user, NewDriver { name, phone })
                .await?
                .map(|(user, driver)| (user, Some(driver))),
            _ => self.store.users.insert(new_user).await?.map(|user| (user, None)),
        };
        // lost a race with a concurrent registration
        let (user, driver) = created
            .ok_or_else(|| AppError::Conflict("Email or phone already registered".into()))?;

        info!(user_id = user.id, driver_id = ?driver.as_ref().map(|d| d.id), "user registered");
        Ok(Registration { user, driver })
    }

    /// First factor. On success an OTP is issued and the caller must verify it.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> AppResult<()> {
        let email = normalize_email(email);
        let Some(user) = self.store.users.find_by_email(&email).await? else {
            let dummy = self
                .dummy_hash
                .get_or_try_init(|| async { self.hasher.hash("not-a-real-password") })
                .await?;
            self.hasher.verify(password, dummy)?;
            warn!(email = %email, "login unknown email");
            return Err(AppError::InvalidCredentials);
        };
        if !self.hasher.verify(password, &user.password_hash)? {
            warn!(email = %email, user_id = user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        let code = self.otp.generate();
        let expires_at = self.clock.now() + Duration::minutes(self.config.otp_ttl_minutes);
        self.store
            .otps
            .upsert(OtpToken {
                user_email: user.email.clone(),
                code: code.clone(),
                expires_at,
            })
            .await?;
        self.otp.send(&user.email, &code);

        info!(user_id = user.id, "otp issued");
        Ok(())
    }

    /// Second factor. Consumes the OTP and opens a session.
    #[instrument(skip(self, code))]
    pub async fn verify_otp(&self, email: &str, code: &str) -> AppResult<Authenticated> {
        let email = normalize_email(email);
        match self
            .store
            .otps
            .consume(&email, code.trim(), self.clock.now())
            .await?
        {
            OtpCheck::Accepted => {}
            OtpCheck::Missing => return Err(AppError::OtpNotFound),
            OtpCheck::Rejected => {
                warn!(email = %email, "invalid or expired otp");
                return Err(AppError::InvalidOtp);
            }
        }

        let user = self
            .store
            .users
            .find_by_email(&email)
            .await?
            .ok_or(AppError::Unauthorized)?;
        let (token, session) = self.sessions.create(&user.email).await;
        info!(user_id = user.id, "session opened");

        Ok(Authenticated {
            token,
            expires_at: session.expires_at,
            profile: self.profile_of(user).await?,
        })
    }

    pub async fn current_user(&self, authorization: &str) -> AppResult<Profile> {
        let token = bearer_token(authorization).ok_or(AppError::Unauthorized)?;
        let session = self
            .sessions
            .resolve(token)
            .await
            .ok_or(AppError::Unauthorized)?;
        let user = self
            .store
            .users
            .find_by_email(&session.email)
            .await?
            .ok_or(AppError::Unauthorized)?;
        self.profile_of(user).await
    }

    pub async fn logout(&self, authorization: &str) -> AppResult<()> {
        let token = bearer_token(authorization).ok_or(AppError::Unauthorized)?;
        if !self.sessions.revoke(token).await {
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email);
        let user = self
            .store
            .users
            .find_by_email(&email)
            .await?
            .ok_or(AppError::NotFound("user"))?;

        let token = Uuid::new_v4().to_string();
        let expires_at = self.clock.now() + Duration::minutes(self.config.reset_token_ttl_minutes);
        self.store
            .reset_tokens
            .upsert(PasswordResetToken {
                token: token.clone(),
                user_id: user.id,
                expires_at,
            })
            .await?;

        let link = format!("{}?token={}", self.config.reset_link_base, token);
        dispatch(self.notifier.clone(), user.email, "Password Reset", link);
        info!(user_id = user.id, "password reset issued");
        Ok(())
    }

    #[instrument(skip(self, token, new_password))]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation("Password too short".into()));
        }
        let hash = self.hasher.hash(new_password)?;
        match self
            .store
            .reset_tokens
            .redeem(token.trim(), self.clock.now(), &hash)
            .await?
        {
            Redemption::Applied { user_id } => {
                info!(user_id, "password reset");
                Ok(())
            }
            Redemption::Expired { user_id } => {
                warn!(user_id, "expired reset token used");
                Err(AppError::ResetTokenExpired)
            }
            Redemption::Missing => Err(AppError::NotFound("reset token")),
        }
    }

    /// Driver record of the user registered under `email`.
    pub async fn driver_profile(&self, email: &str) -> AppResult<Driver> {
        let user = self
            .store
            .users
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or(AppError::NotFound("user"))?;
        if user.role != Role::Driver {
            return Err(AppError::Validation("User is not a driver".into()));
        }
        self.store
            .drivers
            .find_by_phone(&user.phone)
            .await?
            .ok_or(AppError::NotFound("driver"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::testing::{PlainHasher, TestEnv};

    #[derive(Default)]
    struct CountingHasher {
        verified: AtomicUsize,
    }

    impl CredentialHasher for CountingHasher {
        fn hash(&self, plain: &str) -> anyhow::Result<String> {
            PlainHasher.hash(plain)
        }

        fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
            self.verified.fetch_add(1, Ordering::SeqCst);
            PlainHasher.verify(plain, hash)
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
            anyhow::bail!("smtp down")
        }
    }

    fn input(email: &str, phone: &str, role: Role) -> RegisterInput {
        RegisterInput {
            email: email.into(),
            password: "password123".into(),
            name: "Jean".into(),
            phone: phone.into(),
            role,
        }
    }

    async fn issued_code(env: &TestEnv, email: &str) -> String {
        env.store
            .otps
            .find(email)
            .await
            .unwrap()
            .expect("otp issued")
            .code
    }

    #[test]
    fn bearer_prefix_is_optional_and_case_insensitive() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("  Bearer   abc  "), Some("abc"));
        assert_eq!(bearer_token("Bearer abc def"), None);
        assert_eq!(bearer_token(""), None);
    }

    #[tokio::test]
    async fn register_driver_creates_driver_record() {
        let env = TestEnv::new();
        let reg = env
            .auth
            .register(input(" Driver@X.com ", "+250788000001", Role::Driver))
            .await
            .unwrap();
        assert_eq!(reg.user.email, "driver@x.com");
        let driver = reg.driver.expect("driver created");
        assert_eq!(driver.phone, "+250788000001");
        assert!(!driver.available);

        let rider = env
            .auth
            .register(input("rider@x.com", "+250788000002", Role::Rider))
            .await
            .unwrap();
        assert!(rider.driver.is_none());
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_bad_input() {
        let env = TestEnv::new();
        env.auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();

        let dup_email = env.auth.register(input("A@x.com", "1002", Role::Rider)).await;
        assert!(matches!(dup_email, Err(AppError::Conflict(_))));
        let dup_phone = env.auth.register(input("b@x.com", "1001", Role::Rider)).await;
        assert!(matches!(dup_phone, Err(AppError::Conflict(_))));

        let bad_email = env.auth.register(input("not-an-email", "1003", Role::Rider)).await;
        assert!(matches!(bad_email, Err(AppError::Validation(_))));
        let mut short = input("c@x.com", "1004", Role::Rider);
        short.password = "short".into();
        assert!(matches!(env.auth.register(short).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let env = TestEnv::new();
        env.auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();

        let wrong_password = env.auth.login("a@x.com", "wrong").await.unwrap_err();
        let unknown_email = env.auth.login("ghost@x.com", "anything").await.unwrap_err();
        assert!(matches!(wrong_password, AppError::InvalidCredentials));
        assert!(matches!(unknown_email, AppError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(wrong_password.status(), unknown_email.status());
        assert!(env.store.otps.find("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_email_still_checks_a_hash() {
        let env = TestEnv::new();
        let hasher = Arc::new(CountingHasher::default());
        let auth = AuthSessionManager::new(
            env.store.clone(),
            hasher.clone(),
            env.notifier.clone(),
            env.clock.clone(),
            AuthConfig::default(),
        );
        env.rider("a@x.com", "1001").await;

        let err = auth.login("ghost@x.com", "password123").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        assert_eq!(hasher.verified.load(Ordering::SeqCst), 1);

        let err = auth.login("a@x.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        assert_eq!(hasher.verified.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn login_survives_a_failing_mailer() {
        let env = TestEnv::new();
        let auth = AuthSessionManager::new(
            env.store.clone(),
            Arc::new(PlainHasher),
            Arc::new(FailingNotifier),
            env.clock.clone(),
            AuthConfig::default(),
        );
        env.rider("a@x.com", "1001").await;

        auth.login("a@x.com", "password123").await.unwrap();
        let code = issued_code(&env, "a@x.com").await;
        let session = auth.verify_otp("a@x.com", &code).await.unwrap();
        assert_eq!(session.profile.user.email, "a@x.com");
        auth.forgot_password("a@x.com").await.unwrap();
    }

    #[tokio::test]
    async fn failed_driver_record_rolls_back_registration() {
        let env = TestEnv::new();
        env.memory.fail_driver_inserts(true);
        let err = env
            .auth
            .register(input("d@x.com", "2001", Role::Driver))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(env.store.users.find_by_email("d@x.com").await.unwrap().is_none());
        assert!(env.store.drivers.find_by_phone("2001").await.unwrap().is_none());

        env.memory.fail_driver_inserts(false);
        let reg = env
            .auth
            .register(input("d@x.com", "2001", Role::Driver))
            .await
            .unwrap();
        assert_eq!(reg.driver.map(|d| d.phone), Some("2001".to_string()));
    }

    #[tokio::test]
    async fn otp_valid_until_expiry() {
        let env = TestEnv::new();
        env.auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();

        env.auth.login("a@x.com", "password123").await.unwrap();
        let code = issued_code(&env, "a@x.com").await;
        env.clock.advance(Duration::minutes(4) + Duration::seconds(59));
        let auth = env.auth.verify_otp("a@x.com", &code).await.unwrap();
        assert_eq!(auth.profile.user.email, "a@x.com");

        env.auth.login("a@x.com", "password123").await.unwrap();
        let code = issued_code(&env, "a@x.com").await;
        env.clock.advance(Duration::minutes(5) + Duration::seconds(1));
        let err = env.auth.verify_otp("a@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOtp));
    }

    #[tokio::test]
    async fn otp_and_reset_link_are_mailed() {
        let env = TestEnv::new();
        env.auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();
        env.auth.login("a@x.com", "password123").await.unwrap();
        env.auth.forgot_password("a@x.com").await.unwrap();

        for _ in 0..100 {
            if env.notifier.sent.lock().unwrap().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let sent = env.notifier.sent.lock().unwrap().clone();
        let code = issued_code(&env, "a@x.com").await;
        assert!(sent
            .iter()
            .any(|m| m.subject == "Your OTP Code" && m.body == format!("Your OTP code is: {code}")));
        assert!(sent.iter().any(|m| m.to == "a@x.com"
            && m.subject == "Password Reset"
            && m.body.starts_with("http://localhost:3000/reset-password?token=")));
    }

    #[tokio::test]
    async fn otp_errors() {
        let env = TestEnv::new();
        env.auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();

        let err = env.auth.verify_otp("a@x.com", "123456").await.unwrap_err();
        assert!(matches!(err, AppError::OtpNotFound));

        env.auth.login("a@x.com", "password123").await.unwrap();
        let code = issued_code(&env, "a@x.com").await;
        let wrong = if code == "111111" { "222222" } else { "111111" };
        let err = env.auth.verify_otp("a@x.com", wrong).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOtp));

        // the code is single use
        env.auth.verify_otp("a@x.com", &code).await.unwrap();
        let err = env.auth.verify_otp("a@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AppError::OtpNotFound));
    }

    #[tokio::test]
    async fn relogin_overwrites_previous_code() {
        let env = TestEnv::new();
        env.auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();

        env.auth.login("a@x.com", "password123").await.unwrap();
        let first = env.store.otps.find("a@x.com").await.unwrap().unwrap();
        env.clock.advance(Duration::minutes(3));
        env.auth.login("a@x.com", "password123").await.unwrap();
        let second = env.store.otps.find("a@x.com").await.unwrap().unwrap();
        assert_eq!(second.expires_at, first.expires_at + Duration::minutes(3));
    }

    #[tokio::test]
    async fn session_resolves_driver_profile() {
        let env = TestEnv::new();
        env.auth
            .register(input("d@x.com", "2001", Role::Driver))
            .await
            .unwrap();
        let auth = env.login("d@x.com", "password123").await;
        assert_eq!(auth.profile.driver.as_ref().map(|d| d.phone.as_str()), Some("2001"));

        let me = env
            .auth
            .current_user(&format!("Bearer {}", auth.token))
            .await
            .unwrap();
        assert_eq!(me.user.email, "d@x.com");
        assert!(me.driver.is_some());

        let err = env.auth.current_user("Bearer not-a-token").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));

        env.auth.logout(&format!("Bearer {}", auth.token)).await.unwrap();
        let err = env
            .auth
            .current_user(&format!("Bearer {}", auth.token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn session_expires_after_ttl() {
        let env = TestEnv::new();
        env.auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();
        let auth = env.login("a@x.com", "password123").await;
        env.clock
            .advance(Duration::minutes(env.config.auth.session_ttl_minutes) + Duration::seconds(1));
        let err = env.auth.current_user(&auth.token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn password_reset_is_single_use() {
        let env = TestEnv::new();
        let reg = env
            .auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();
        env.auth.forgot_password("a@x.com").await.unwrap();
        let token = env.reset_token_of(reg.user.id).await;

        env.auth.reset_password(&token, "brand-new-pass").await.unwrap();
        let err = env.auth.login("a@x.com", "password123").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        env.auth.login("a@x.com", "brand-new-pass").await.unwrap();

        let err = env
            .auth
            .reset_password(&token, "another-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_reset_token_leaves_password_alone() {
        let env = TestEnv::new();
        let reg = env
            .auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();
        env.auth.forgot_password("a@x.com").await.unwrap();
        let token = env.reset_token_of(reg.user.id).await;

        env.clock.advance(Duration::hours(1) + Duration::seconds(1));
        let err = env
            .auth
            .reset_password(&token, "brand-new-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ResetTokenExpired));
        env.auth.login("a@x.com", "password123").await.unwrap();
    }

    #[tokio::test]
    async fn short_new_password_keeps_the_reset_token() {
        let env = TestEnv::new();
        let reg = env
            .auth
            .register(input("a@x.com", "1001", Role::Rider))
            .await
            .unwrap();
        env.auth.forgot_password("a@x.com").await.unwrap();
        let token = env.reset_token_of(reg.user.id).await;

        let err = env.auth.reset_password(&token, "short").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        env.auth.reset_password(&token, "brand-new-pass").await.unwrap();
        env.auth.login("a@x.com", "brand-new-pass").await.unwrap();
    }

    #[tokio::test]
    async fn forgot_password_for_unknown_email() {
        let env = TestEnv::new();
        let err = env.auth.forgot_password("ghost@x.com").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("user")));
    }

    #[tokio::test]
    async fn driver_profile_requires_driver_role() {
        let env = TestEnv::new();
        env.auth
            .register(input("r@x.com", "1001", Role::Rider))
            .await
            .unwrap();
        env.auth
            .register(input("d@x.com", "1002", Role::Driver))
            .await
            .unwrap();

        assert!(matches!(
            env.auth.driver_profile("r@x.com").await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(env.auth.driver_profile("d@x.com").await.unwrap().phone, "1002");
        assert!(matches!(
            env.auth.driver_profile("ghost@x.com").await,
            Err(AppError::NotFound(_))
        ));
    }
}
