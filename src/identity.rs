use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;
use crate::types::{AuthSession, AuthSnapshot, Credentials};

/// Consumer-provided identity provider.
///
/// The provider owns the authentication state. The application only
/// observes it through [`subscribe`](IdentityProvider::subscribe) and asks
/// for changes through `sign_in_with_credentials` / `sign_out`.
///
/// # Example
///
/// ```rust,ignore
/// impl IdentityProvider for HostedAuth {
///     fn subscribe(&self) -> Result<Subscription, BoxError> {
///         let (publisher, subscription) = identity::channel();
///         self.listeners.lock()?.push(publisher);
///         Ok(subscription)
///     }
///
///     async fn sign_out(&self) -> Result<(), BoxError> {
///         self.api.revoke(&self.token()).await?;
///         self.broadcast(AuthSnapshot::SignedOut);
///         Ok(())
///     }
///     // ...
/// }
/// ```
pub trait IdentityProvider: Send + Sync + 'static {
    /// Open a notification stream.
    ///
    /// Notifications arrive in the order the provider publishes them. Once the
    /// provider knows the current state it publishes it, so the first
    /// notification resolves an `Unknown` snapshot.
    fn subscribe(&self) -> Result<Subscription, BoxError>;

    /// Current state as the provider sees it right now. `Unknown` until the
    /// provider has finished restoring any persisted session.
    fn current(&self) -> AuthSnapshot;

    fn sign_out(&self) -> impl Future<Output = Result<(), BoxError>> + Send;

    fn sign_in_with_credentials(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<AuthSession, BoxError>> + Send;
}

/// Create a connected publisher / subscription pair.
#[must_use]
pub fn channel() -> (Publisher, Subscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    (
        Publisher {
            tx,
            token: token.clone(),
        },
        Subscription { rx, token },
    )
}

/// Provider-side end of a [`Subscription`].
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<AuthSnapshot>,
    token: CancellationToken,
}

impl Publisher {
    /// Deliver a notification. Returns `false` once the subscriber has gone,
    /// so providers can prune dead listeners.
    pub fn publish(&self, snapshot: AuthSnapshot) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx.send(snapshot).is_ok()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.tx.is_closed()
    }
}

/// Ordered stream of [`AuthSnapshot`] notifications for one subscriber.
///
/// Dropping the subscription unsubscribes. After teardown, notifications
/// that were already buffered are discarded rather than delivered.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<AuthSnapshot>,
    token: CancellationToken,
}

impl Subscription {
    /// Wait for the next notification. `None` after teardown or when the
    /// provider drops its publisher.
    pub async fn next(&mut self) -> Option<AuthSnapshot> {
        let token = self.token.clone();
        if token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = token.cancelled() => None,
            snapshot = self.rx.recv() => snapshot.filter(|_| !token.is_cancelled()),
        }
    }

    /// Take an already-delivered notification without waiting.
    pub fn try_next(&mut self) -> Option<AuthSnapshot> {
        if self.token.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Handle that tears this subscription down from elsewhere, e.g. when
    /// the owning view unmounts while [`SessionGuard::watch`](crate::SessionGuard::watch)
    /// holds the subscription.
    #[must_use]
    pub fn handle(&self) -> Unsubscribe {
        Unsubscribe {
            token: self.token.clone(),
        }
    }

    pub fn unsubscribe(&mut self) {
        self.token.cancel();
        self.rx.close();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug, Clone)]
pub struct Unsubscribe {
    token: CancellationToken,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_unsubscribed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// In-process identity provider for tests, demos and offline development.
///
/// Publishes the current state to each new subscriber as soon as the
/// provider is resolved, like hosted providers do.
#[derive(Debug)]
pub struct MemoryIdentity {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    resolved: bool,
    current: Option<AuthSession>,
    accounts: HashMap<String, (String, AuthSession)>,
    subscribers: Vec<Publisher>,
    sign_out_calls: usize,
    fail_sign_out: bool,
    fail_subscribe: bool,
}

impl Inner {
    fn broadcast(&mut self, snapshot: &AuthSnapshot) {
        self.subscribers
            .retain(|publisher| publisher.publish(snapshot.clone()));
    }

    fn snapshot(&self) -> AuthSnapshot {
        if self.resolved {
            AuthSnapshot::from(self.current.clone())
        } else {
            AuthSnapshot::Unknown
        }
    }
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentity {
    /// A resolved provider with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                resolved: true,
                ..Inner::default()
            }),
        }
    }

    /// A provider that has not yet restored its state; subscribers receive
    /// nothing until [`set_session`](Self::set_session) is called.
    #[must_use]
    pub fn unresolved() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A resolved provider with `session` already signed in.
    #[must_use]
    pub fn signed_in(session: AuthSession) -> Self {
        let provider = Self::new();
        provider.lock().current = Some(session);
        provider
    }

    /// Register credentials that `sign_in_with_credentials` accepts.
    #[must_use]
    pub fn with_account(
        self,
        identifier: impl Into<String>,
        secret: impl Into<String>,
        session: AuthSession,
    ) -> Self {
        self.lock()
            .accounts
            .insert(identifier.into(), (secret.into(), session));
        self
    }

    /// Replace the current state and notify every subscriber.
    pub fn set_session(&self, session: Option<AuthSession>) {
        let mut inner = self.lock();
        inner.resolved = true;
        inner.current = session;
        let snapshot = inner.snapshot();
        inner.broadcast(&snapshot);
    }

    /// Make subsequent `sign_out` calls fail.
    pub fn fail_sign_out(&self, fail: bool) {
        self.lock().fail_sign_out = fail;
    }

    /// Make subsequent `subscribe` calls fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    /// Number of sign-out requests received, successful or not.
    #[must_use]
    pub fn sign_out_calls(&self) -> usize {
        self.lock().sign_out_calls
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(Publisher::is_active);
        inner.subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sign_out_now(&self) -> Result<(), BoxError> {
        let mut inner = self.lock();
        inner.sign_out_calls += 1;
        if inner.fail_sign_out {
            return Err("identity provider unreachable".into());
        }
        inner.resolved = true;
        inner.current = None;
        inner.broadcast(&AuthSnapshot::SignedOut);
        Ok(())
    }

    fn sign_in_now(&self, credentials: &Credentials) -> Result<AuthSession, BoxError> {
        let mut inner = self.lock();
        let session = match inner.accounts.get(&credentials.identifier) {
            Some((secret, session)) if *secret == credentials.secret => session.clone(),
            _ => return Err("invalid email or password".into()),
        };
        inner.resolved = true;
        inner.current = Some(session.clone());
        inner.broadcast(&AuthSnapshot::SignedIn(session.clone()));
        Ok(session)
    }
}

impl IdentityProvider for MemoryIdentity {
    fn subscribe(&self) -> Result<Subscription, BoxError> {
        let mut inner = self.lock();
        if inner.fail_subscribe {
            return Err("identity provider unreachable".into());
        }
        let (publisher, subscription) = channel();
        if inner.resolved {
            publisher.publish(inner.snapshot());
        }
        inner.subscribers.push(publisher);
        Ok(subscription)
    }

    fn current(&self) -> AuthSnapshot {
        self.lock().snapshot()
    }

    async fn sign_out(&self) -> Result<(), BoxError> {
        self.sign_out_now()
    }

    async fn sign_in_with_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthSession, BoxError> {
        self.sign_in_now(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notifications_arrive_in_order() {
        let (publisher, mut subscription) = channel();
        publisher.publish(AuthSnapshot::SignedIn(AuthSession::new("u1")));
        publisher.publish(AuthSnapshot::SignedOut);
        publisher.publish(AuthSnapshot::SignedIn(AuthSession::new("u2")));

        assert!(subscription.next().await.unwrap().is_present());
        assert_eq!(subscription.next().await, Some(AuthSnapshot::SignedOut));
        let last = subscription.next().await.unwrap();
        assert_eq!(last.session().unwrap().user_id.0, "u2");
    }

    #[tokio::test]
    async fn buffered_notifications_dropped_after_unsubscribe() {
        let (publisher, mut subscription) = channel();
        assert!(publisher.publish(AuthSnapshot::SignedOut));

        subscription.unsubscribe();

        assert_eq!(subscription.next().await, None);
        assert_eq!(subscription.try_next(), None);
        assert!(!publisher.publish(AuthSnapshot::SignedOut));
        assert!(!publisher.is_active());
    }

    #[tokio::test]
    async fn handle_tears_down_from_outside() {
        let (publisher, mut subscription) = channel();
        let handle = subscription.handle();
        publisher.publish(AuthSnapshot::SignedOut);

        handle.unsubscribe();

        assert!(handle.is_unsubscribed());
        assert!(!subscription.is_active());
        assert_eq!(subscription.next().await, None);
    }

    #[test]
    fn dropping_subscription_deactivates_publisher() {
        let (publisher, subscription) = channel();
        drop(subscription);
        assert!(!publisher.is_active());
        assert!(!publisher.publish(AuthSnapshot::SignedOut));
    }

    #[tokio::test]
    async fn memory_identity_publishes_current_state_on_subscribe() {
        let provider = MemoryIdentity::signed_in(AuthSession::new("u1"));
        let mut subscription = provider.subscribe().unwrap();
        assert!(subscription.try_next().unwrap().is_present());
    }

    #[tokio::test]
    async fn unresolved_identity_stays_silent_until_set() {
        let provider = MemoryIdentity::unresolved();
        assert_eq!(provider.current(), AuthSnapshot::Unknown);

        let mut subscription = provider.subscribe().unwrap();
        assert_eq!(subscription.try_next(), None);

        provider.set_session(None);
        assert_eq!(subscription.try_next(), Some(AuthSnapshot::SignedOut));
    }

    #[tokio::test]
    async fn memory_identity_sign_in_and_out() {
        let session = AuthSession::new("u1").with_email_verified(true);
        let provider =
            MemoryIdentity::new().with_account("ada@example.com", "pw", session.clone());
        let mut subscription = provider.subscribe().unwrap();
        assert_eq!(subscription.try_next(), Some(AuthSnapshot::SignedOut));

        let bad = Credentials::new("ada@example.com", "nope");
        assert!(provider.sign_in_with_credentials(&bad).await.is_err());

        let good = Credentials::new("ada@example.com", "pw");
        assert_eq!(provider.sign_in_with_credentials(&good).await.unwrap(), session);
        assert!(subscription.try_next().unwrap().is_present());

        provider.sign_out().await.unwrap();
        assert_eq!(subscription.try_next(), Some(AuthSnapshot::SignedOut));
        assert_eq!(provider.sign_out_calls(), 1);
        assert_eq!(provider.current(), AuthSnapshot::SignedOut);
    }

    #[tokio::test]
    async fn failing_sign_out_keeps_session() {
        let provider = MemoryIdentity::signed_in(AuthSession::new("u1"));
        provider.fail_sign_out(true);

        assert!(provider.sign_out().await.is_err());
        assert!(provider.current().is_present());
        assert_eq!(provider.sign_out_calls(), 1);
    }

    #[test]
    fn dead_subscribers_are_pruned() {
        let provider = MemoryIdentity::new();
        let first = provider.subscribe().unwrap();
        let _second = provider.subscribe().unwrap();
        assert_eq!(provider.subscriber_count(), 2);

        drop(first);
        assert_eq!(provider.subscriber_count(), 1);
    }
}
