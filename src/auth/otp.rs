use std::sync::Arc;

use rand::{rngs::OsRng, Rng};
use tracing::debug;

use crate::notify::{dispatch, Notifier};

/// Generates one-time passcodes and hands them to the notifier.
#[derive(Clone)]
pub struct OtpIssuer {
    notifier: Arc<dyn Notifier>,
}

impl OtpIssuer {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Uniform 6-digit code in [100000, 999999] from the OS CSPRNG.
    pub fn generate(&self) -> String {
        OsRng.gen_range(100_000..=999_999u32).to_string()
    }

    pub fn send(&self, email: &str, code: &str) {
        debug!(email, "dispatching otp");
        dispatch(
            self.notifier.clone(),
            email.to_string(),
            "Your OTP Code",
            format!("Your OTP code is: {code}"),
        );
    }
}
