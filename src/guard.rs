use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::clock::{Clock, SystemClock};
use crate::config::{GuardConfig, GuardSettings};
use crate::identity::{IdentityProvider, Subscription};
use crate::records::{
    REMEMBER_ME_KEY, RecordStatus, RememberMeRecord, SESSION_ONLY_KEY, SessionMarker,
};
use crate::route::{self, RouteDecision, RouteOutcome, RouteTable};
use crate::storage::Stores;
use crate::types::AuthSnapshot;

/// Lifecycle of a guard within one browser tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Uninitialized,
    FreshSessionChecked,
    /// Terminal until the tab closes.
    Navigating,
}

/// Why a remember-me record forced a sign-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Expired,
    NotRemembered,
    Malformed,
    /// The durable store could not be read.
    Unreadable,
}

/// Result of [`SessionGuard::check_remember_me_expiry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCheck {
    NoRecord,
    Valid,
    SignedOut(StaleReason),
    /// The record was discarded but the provider rejected the sign-out.
    SignOutFailed(StaleReason),
}

/// Result of [`SessionGuard::detect_fresh_browser_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshSession {
    /// First load in this browser session.
    Fresh { sign_out_requested: bool },
    /// First load, but the provider is still restoring its session. The
    /// decision is made on the first signed-in notification instead.
    Deferred,
    /// Reload within a running browser session.
    Continued,
    AlreadyInitialized,
}

/// Gates protected views and enforces the remember-me lifecycle.
///
/// The guard caches the latest [`AuthSnapshot`] it has been told about and
/// never fails outward: storage and provider errors are logged and degrade
/// towards "signed out".
///
/// Clones share the cached snapshot, so one clone can drive the notification
/// loop while another answers the router.
///
/// ```rust,ignore
/// let guard = SessionGuard::new(provider, stores, GuardConfig::from_env()?);
/// guard.detect_fresh_browser_session().await;
/// if let Some(subscription) = guard.activate().await {
///     let watcher = guard.clone();
///     tokio::spawn(async move { watcher.watch(subscription).await });
/// }
/// let outcome = guard.route("/userprofile");
/// ```
pub struct SessionGuard<P> {
    pub(crate) provider: Arc<P>,
    pub(crate) stores: Stores,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: GuardSettings,
    routes: RouteTable,
    snapshot: Arc<watch::Sender<AuthSnapshot>>,
    phase: Arc<Mutex<GuardPhase>>,
    /// Set when a fresh browser session started before the provider resolved.
    pub(crate) fresh_session_pending: Arc<AtomicBool>,
}

impl<P> Clone for SessionGuard<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            stores: self.stores.clone(),
            clock: Arc::clone(&self.clock),
            settings: self.settings.clone(),
            routes: self.routes.clone(),
            snapshot: Arc::clone(&self.snapshot),
            phase: Arc::clone(&self.phase),
            fresh_session_pending: Arc::clone(&self.fresh_session_pending),
        }
    }
}

impl<P: IdentityProvider> SessionGuard<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, stores: Stores, config: GuardConfig) -> Self {
        let routes = config.settings.route_table();
        let (snapshot, _) = watch::channel(AuthSnapshot::Unknown);
        Self {
            provider,
            stores,
            clock: Arc::new(SystemClock),
            settings: config.settings,
            routes,
            snapshot: Arc::new(snapshot),
            phase: Arc::new(Mutex::new(GuardPhase::Uninitialized)),
            fresh_session_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified whenever the cached snapshot changes.
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshot.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> GuardPhase {
        *self.lock_phase()
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Access decision for a protected view given the cached snapshot.
    #[must_use]
    pub fn evaluate_route_access(&self) -> RouteDecision {
        route::evaluate_route_access(&self.snapshot.borrow(), &self.settings.login_path)
    }

    /// Resolve a navigation to `path` through the route table.
    pub fn route(&self, path: &str) -> RouteOutcome {
        {
            let mut phase = self.lock_phase();
            if *phase == GuardPhase::FreshSessionChecked {
                *phase = GuardPhase::Navigating;
            }
        }
        self.routes.resolve(path, &self.snapshot.borrow())
    }

    /// Subscribe to the provider and run the eager remember-me check.
    ///
    /// If the provider cannot be subscribed to, the guard treats the visitor
    /// as signed out and returns `None`.
    pub async fn activate(&self) -> Option<Subscription> {
        let subscription = match self.provider.subscribe() {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::warn!(error = %e, "Auth subscription failed; treating visitor as signed out");
                self.set_snapshot(AuthSnapshot::SignedOut);
                None
            }
        };
        self.check_remember_me_expiry().await;
        subscription
    }

    /// Process notifications in delivery order until the subscription is torn
    /// down or the provider closes it.
    pub async fn watch(&self, mut subscription: Subscription) {
        while let Some(snapshot) = subscription.next().await {
            self.on_auth_changed(snapshot).await;
        }
        tracing::debug!("Auth subscription closed");
    }

    /// Apply one provider notification.
    ///
    /// A signed-in notification is only published to the router once the
    /// remember-me and fresh-session checks have let it through.
    pub async fn on_auth_changed(&self, snapshot: AuthSnapshot) -> Option<ExpiryCheck> {
        match snapshot {
            AuthSnapshot::Unknown => {
                tracing::debug!("Ignoring unresolved auth notification");
                None
            }
            AuthSnapshot::SignedOut => {
                self.fresh_session_pending.store(false, Ordering::SeqCst);
                self.set_snapshot(AuthSnapshot::SignedOut);
                if let Err(e) = self.stores.ephemeral.remove(SESSION_ONLY_KEY) {
                    tracing::warn!(error = %e, key = SESSION_ONLY_KEY, "Failed to clear session flag");
                }
                None
            }
            AuthSnapshot::SignedIn(session) => {
                tracing::debug!(user_id = %session.user_id, "Auth state: signed in");
                if self.fresh_session_pending.swap(false, Ordering::SeqCst)
                    && !self.has_remember_me_record()
                {
                    tracing::info!("Restored session in a fresh browser session without remember-me; signing out");
                    if !self.force_sign_out("fresh-session sign-out").await {
                        self.set_snapshot(AuthSnapshot::SignedIn(session));
                    }
                    return Some(ExpiryCheck::NoRecord);
                }

                let check = self.check_remember_me_expiry().await;
                if !matches!(check, ExpiryCheck::SignedOut(_)) {
                    self.set_snapshot(AuthSnapshot::SignedIn(session));
                }
                Some(check)
            }
        }
    }

    /// Sign out when the remember-me record is expired, opted out, or
    /// unreadable. Absent or valid records leave the session alone.
    pub async fn check_remember_me_expiry(&self) -> ExpiryCheck {
        let raw = match self.stores.durable.get(REMEMBER_ME_KEY) {
            Ok(None) => return ExpiryCheck::NoRecord,
            Ok(Some(raw)) => raw,
            Err(e) => {
                tracing::warn!(error = %e, key = REMEMBER_ME_KEY, "Failed to read remember-me record");
                return self.invalidate_remember_me(StaleReason::Unreadable).await;
            }
        };

        let reason = match RememberMeRecord::parse(&raw) {
            Ok(record) => match record.status(self.clock.now(), self.settings.remember_me_ttl) {
                RecordStatus::Valid => return ExpiryCheck::Valid,
                RecordStatus::Expired => StaleReason::Expired,
                RecordStatus::NotRemembered => StaleReason::NotRemembered,
                RecordStatus::PostDated => {
                    tracing::warn!(timestamp = record.timestamp, "Remember-me record is dated in the future");
                    StaleReason::Malformed
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unparseable remember-me record");
                StaleReason::Malformed
            }
        };
        self.invalidate_remember_me(reason).await
    }

    /// Decide once per browser session whether a surviving provider session
    /// may outlive a browser restart.
    pub async fn detect_fresh_browser_session(&self) -> FreshSession {
        {
            let mut phase = self.lock_phase();
            if *phase != GuardPhase::Uninitialized {
                return FreshSession::AlreadyInitialized;
            }
            *phase = GuardPhase::FreshSessionChecked;
        }

        let ephemeral = self.stores.ephemeral.as_ref();
        let marker = SessionMarker::load(ephemeral).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read session markers; assuming fresh session");
            SessionMarker::default()
        });

        if marker.is_fresh() {
            if let Err(e) = SessionMarker::start(ephemeral, self.clock.now()) {
                tracing::warn!(error = %e, "Failed to write session markers");
            }
            if self.has_remember_me_record() {
                return FreshSession::Fresh { sign_out_requested: false };
            }

            match self.provider.current() {
                AuthSnapshot::SignedIn(_) => {
                    tracing::info!("Fresh browser session without remember-me; signing out");
                    self.force_sign_out("fresh-session sign-out").await;
                    FreshSession::Fresh { sign_out_requested: true }
                }
                AuthSnapshot::Unknown => {
                    tracing::debug!("Provider unresolved; deferring fresh-session sign-out");
                    self.fresh_session_pending.store(true, Ordering::SeqCst);
                    FreshSession::Deferred
                }
                AuthSnapshot::SignedOut => FreshSession::Fresh { sign_out_requested: false },
            }
        } else if !marker.app_initialized {
            if let Err(e) = SessionMarker::mark_initialized(ephemeral) {
                tracing::warn!(error = %e, "Failed to write session markers");
            }
            FreshSession::Continued
        } else {
            FreshSession::AlreadyInitialized
        }
    }

    /// Whether a remember-me record exists. Unreadable counts as absent.
    fn has_remember_me_record(&self) -> bool {
        match self.stores.durable.get(REMEMBER_ME_KEY) {
            Ok(raw) => raw.is_some(),
            Err(e) => {
                tracing::warn!(error = %e, key = REMEMBER_ME_KEY, "Failed to read remember-me record");
                false
            }
        }
    }

    async fn invalidate_remember_me(&self, reason: StaleReason) -> ExpiryCheck {
        tracing::info!(?reason, "Remember-me record stale; signing out");
        if let Err(e) = self.stores.durable.remove(REMEMBER_ME_KEY) {
            tracing::warn!(error = %e, key = REMEMBER_ME_KEY, "Failed to delete remember-me record");
        }
        if self.force_sign_out("remember-me sign-out").await {
            ExpiryCheck::SignedOut(reason)
        } else {
            ExpiryCheck::SignOutFailed(reason)
        }
    }

    /// Ask the provider to sign out. Not retried; the next notification
    /// reconciles any inconsistency.
    pub(crate) async fn force_sign_out(&self, operation: &'static str) -> bool {
        match self.provider.sign_out().await {
            Ok(()) => {
                self.set_snapshot(AuthSnapshot::SignedOut);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, operation, "Identity provider rejected sign-out");
                false
            }
        }
    }

    pub(crate) fn set_snapshot(&self, snapshot: AuthSnapshot) {
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, GuardPhase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }
}
