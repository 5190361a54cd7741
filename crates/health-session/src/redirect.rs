use tracing::warn;

/// Environment effect that moves the application to its sign-in entry point.
/// Fire-and-forget: it must not block and cannot fail.
pub trait SignInRedirect: Send + Sync {
    fn redirect_to_sign_in(&self);
}

impl<F> SignInRedirect for F
where
    F: Fn() + Send + Sync,
{
    fn redirect_to_sign_in(&self) {
        self()
    }
}

/// Redirect for headless hosts: records the sign-in location in the log.
#[derive(Debug, Clone)]
pub struct LogRedirect {
    pub sign_in_path: String,
}

impl SignInRedirect for LogRedirect {
    fn redirect_to_sign_in(&self) {
        warn!("[session] signed out; redirecting to {}", self.sign_in_path);
    }
}
