use tokio::sync::watch;

/// Authenticated shopper as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    token: String,
}

impl Identity {
    pub fn new(email: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            token: token.into(),
        }
    }

    pub fn bearer_token(&self) -> &str {
        &self.token
    }

    pub fn same_account(&self, other: &Identity) -> bool {
        self.email.eq_ignore_ascii_case(&other.email)
    }
}

/// In-process handle on the identity provider's auth state.
///
/// The provider integration calls [`sign_in`](Self::sign_in) and
/// [`sign_out`](Self::sign_out); consumers read [`current_user`](Self::current_user)
/// or follow changes through [`on_auth_state_change`](Self::on_auth_state_change).
#[derive(Debug)]
pub struct IdentityProvider {
    tx: watch::Sender<Option<Identity>>,
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    pub fn on_auth_state_change(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }

    pub fn sign_in(&self, identity: Identity) {
        tracing::info!(email = %identity.email, "signed in");
        self.tx.send_replace(Some(identity));
    }

    pub fn sign_out(&self) {
        if self.tx.send_replace(None).is_some() {
            tracing::info!("signed out");
        }
    }
}
