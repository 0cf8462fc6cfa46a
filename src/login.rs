use std::future::Future;
use std::sync::atomic::Ordering;

use crate::error::{BoxError, Error};
use crate::guard::SessionGuard;
use crate::identity::IdentityProvider;
use crate::records::{REMEMBER_ME_KEY, RememberMeRecord, SESSION_ONLY_KEY, SessionMarker};
use crate::route::{CREATE_PROFILE_PATH, Navigate, PRACTICE_PATH};
use crate::types::{AuthSession, AuthSnapshot, Credentials};

/// Consumer-provided profile lookup.
///
/// Called after sign-in to decide whether the visitor goes to the practice
/// area or to profile creation.
///
/// # Example
///
/// ```rust,ignore
/// impl ProfileDirectory for ProfileApi {
///     async fn has_profile(&self, session: &AuthSession) -> Result<bool, BoxError> {
///         let email = session.email.as_deref().unwrap_or_default();
///         let res = self.http.get(self.user_url(email)).send().await?;
///         match res.status().as_u16() {
///             200 => Ok(true),
///             404 => Ok(false),
///             status => Err(format!("unexpected status {status}").into()),
///         }
///     }
/// }
/// ```
pub trait ProfileDirectory: Send + Sync + 'static {
    fn has_profile(
        &self,
        session: &AuthSession,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send;
}

/// Successful sign-in and where to go next.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct LoginOutcome {
    pub session: AuthSession,
    pub first_login: bool,
    pub next: Navigate,
}

impl<P: IdentityProvider> SessionGuard<P> {
    /// Sign in, record the remember-me choice, and route by profile existence.
    ///
    /// # Errors
    ///
    /// - [`Error::SignIn`] if the provider rejects the credentials
    /// - [`Error::EmailNotVerified`] if the account's email is unverified;
    ///   the visitor is signed out again
    /// - [`Error::ProfileLookup`] if the profile directory fails
    pub async fn sign_in<D: ProfileDirectory>(
        &self,
        directory: &D,
        credentials: &Credentials,
        remember_me: bool,
    ) -> Result<LoginOutcome, Error> {
        let session = self
            .provider
            .sign_in_with_credentials(credentials)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, identifier = %credentials.identifier, "Sign-in rejected");
                Error::SignIn(e)
            })?;

        if !session.email_verified {
            tracing::warn!(user_id = %session.user_id, "Sign-in with unverified email");
            self.force_sign_out("unverified sign-in").await;
            return Err(Error::EmailNotVerified);
        }

        // An explicit sign-in settles any deferred fresh-session check.
        self.fresh_session_pending.store(false, Ordering::SeqCst);
        if let Err(e) = self.remember_login(remember_me) {
            tracing::warn!(error = %e, "Failed to record remember-me choice");
        }
        self.set_snapshot(AuthSnapshot::SignedIn(session.clone()));

        let has_profile = directory
            .has_profile(&session)
            .await
            .map_err(Error::ProfileLookup)?;

        let next = if has_profile {
            Navigate::replace(PRACTICE_PATH)
        } else {
            Navigate::replace(CREATE_PROFILE_PATH)
        };

        tracing::info!(user_id = %session.user_id, first_login = !has_profile, "Sign-in successful");

        Ok(LoginOutcome {
            session,
            first_login: !has_profile,
            next,
        })
    }

    /// Persist the visitor's remember-me choice made at sign-in.
    ///
    /// Opting in writes a fresh durable record; opting out removes any record
    /// and flags the browser session as session-only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if a store write fails.
    pub fn remember_login(&self, remember_me: bool) -> Result<(), Error> {
        if remember_me {
            let record = RememberMeRecord::new(self.clock.now(), true);
            self.stores
                .durable
                .set(REMEMBER_ME_KEY, &record.to_json())
                .map_err(|source| storage_error(REMEMBER_ME_KEY, source))
        } else {
            self.stores
                .durable
                .remove(REMEMBER_ME_KEY)
                .map_err(|source| storage_error(REMEMBER_ME_KEY, source))?;
            self.stores
                .ephemeral
                .set(SESSION_ONLY_KEY, "true")
                .map_err(|source| storage_error(SESSION_ONLY_KEY, source))
        }
    }

    /// Explicit logout: clear every per-session marker and the remember-me
    /// record, then ask the provider to sign out.
    ///
    /// Returns whether the provider accepted the sign-out.
    pub async fn logout(&self) -> bool {
        SessionMarker::clear(self.stores.ephemeral.as_ref());
        if let Err(e) = self.stores.durable.remove(REMEMBER_ME_KEY) {
            tracing::warn!(error = %e, key = REMEMBER_ME_KEY, "Failed to delete remember-me record");
        }
        let signed_out = self.force_sign_out("logout").await;
        if signed_out {
            tracing::info!("Logged out");
        }
        signed_out
    }
}

fn storage_error(key: &str, source: BoxError) -> Error {
    Error::Storage {
        key: key.to_owned(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::guard::FreshSession;
    use crate::guard::tests::{Harness, drain, now, verified};
    use crate::identity::MemoryIdentity;
    use crate::records::{APP_INITIALIZED_KEY, SESSION_START_KEY};
    use crate::route::{RouteOutcome, View};
    use crate::storage::KeyValueStore;

    struct Directory(Result<bool, &'static str>);

    impl ProfileDirectory for Directory {
        async fn has_profile(&self, _session: &AuthSession) -> Result<bool, BoxError> {
            self.0.map_err(Into::into)
        }
    }

    fn provider() -> MemoryIdentity {
        MemoryIdentity::new()
            .with_account("ada@example.com", "pw", verified("ada").with_email("ada@example.com"))
            .with_account("new@example.com", "pw", AuthSession::new("new"))
    }

    fn creds(identifier: &str, secret: &str) -> Credentials {
        Credentials::new(identifier, secret)
    }

    #[tokio::test]
    async fn returning_user_goes_to_practice() {
        let harness = Harness::new(provider());
        let guard = harness.guard();

        let outcome = guard
            .sign_in(&Directory(Ok(true)), &creds("ada@example.com", "pw"), true)
            .await
            .unwrap();

        assert_eq!(outcome.next, Navigate::replace("/practice"));
        assert!(!outcome.first_login);
        assert_eq!(outcome.session.user_id.0, "ada");
        assert!(guard.snapshot().is_present());
    }

    #[tokio::test]
    async fn first_login_goes_to_profile_creation() {
        let harness = Harness::new(provider());
        let guard = harness.guard();

        let outcome = guard
            .sign_in(&Directory(Ok(false)), &creds("ada@example.com", "pw"), false)
            .await
            .unwrap();

        assert_eq!(outcome.next, Navigate::replace("/createprofile"));
        assert!(outcome.first_login);
    }

    #[tokio::test]
    async fn remember_me_writes_record() {
        let harness = Harness::new(provider());
        let guard = harness.guard();

        guard
            .sign_in(&Directory(Ok(true)), &creds("ada@example.com", "pw"), true)
            .await
            .unwrap();

        let raw = harness.durable.get(REMEMBER_ME_KEY).unwrap().unwrap();
        assert_eq!(raw, RememberMeRecord::new(now(), true).to_json());
        assert!(!harness.ephemeral.contains(SESSION_ONLY_KEY));
    }

    #[tokio::test]
    async fn without_remember_me_session_is_ephemeral() {
        let harness = Harness::new(provider());
        harness.store_record(Duration::days(3), true);
        let guard = harness.guard();

        guard
            .sign_in(&Directory(Ok(true)), &creds("ada@example.com", "pw"), false)
            .await
            .unwrap();

        assert!(!harness.durable.contains(REMEMBER_ME_KEY));
        assert_eq!(
            harness.ephemeral.get(SESSION_ONLY_KEY).unwrap().as_deref(),
            Some("true")
        );
    }

    #[tokio::test]
    async fn bad_credentials_rejected() {
        let harness = Harness::new(provider());
        let guard = harness.guard();

        let err = guard
            .sign_in(&Directory(Ok(true)), &creds("ada@example.com", "wrong"), true)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SignIn(_)));
        assert!(!harness.durable.contains(REMEMBER_ME_KEY));
    }

    #[tokio::test]
    async fn unverified_email_signs_out_again() {
        let harness = Harness::new(provider());
        let guard = harness.guard();

        let err = guard
            .sign_in(&Directory(Ok(true)), &creds("new@example.com", "pw"), true)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::EmailNotVerified));
        assert_eq!(harness.provider.sign_out_calls(), 1);
        assert_eq!(guard.snapshot(), AuthSnapshot::SignedOut);
        assert!(!harness.durable.contains(REMEMBER_ME_KEY));
    }

    #[tokio::test]
    async fn profile_lookup_failure_surfaces() {
        let harness = Harness::new(provider());
        let guard = harness.guard();

        let err = guard
            .sign_in(&Directory(Err("backend down")), &creds("ada@example.com", "pw"), true)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProfileLookup(_)));
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let harness = Harness::new(provider());
        let guard = harness.guard();
        guard.detect_fresh_browser_session().await;
        let mut sub = guard.activate().await.unwrap();
        guard
            .sign_in(&Directory(Ok(true)), &creds("ada@example.com", "pw"), true)
            .await
            .unwrap();
        harness.ephemeral.set(SESSION_ONLY_KEY, "true").unwrap();

        assert!(guard.logout().await);
        drain(&guard, &mut sub).await;

        assert!(!harness.durable.contains(REMEMBER_ME_KEY));
        assert!(!harness.ephemeral.contains(SESSION_ONLY_KEY));
        assert!(!harness.ephemeral.contains(SESSION_START_KEY));
        assert!(!harness.ephemeral.contains(APP_INITIALIZED_KEY));
        assert_eq!(
            guard.route("/userprofile"),
            RouteOutcome::Navigate(Navigate::replace("/login"))
        );
    }

    #[tokio::test]
    async fn logout_with_rejected_sign_out_still_clears_local_state() {
        let harness = Harness::new(provider());
        let guard = harness.guard();
        guard
            .sign_in(&Directory(Ok(true)), &creds("ada@example.com", "pw"), true)
            .await
            .unwrap();
        harness.provider.fail_sign_out(true);

        assert!(!guard.logout().await);
        assert!(!harness.durable.contains(REMEMBER_ME_KEY));
        assert!(guard.snapshot().is_present());
    }

    #[tokio::test]
    async fn sign_in_settles_deferred_fresh_session_check() {
        let harness = Harness::new(
            MemoryIdentity::unresolved().with_account(
                "ada@example.com",
                "pw",
                verified("ada").with_email("ada@example.com"),
            ),
        );
        let guard = harness.guard();
        assert_eq!(guard.detect_fresh_browser_session().await, FreshSession::Deferred);
        let mut sub = guard.activate().await.unwrap();

        guard
            .sign_in(&Directory(Ok(true)), &creds("ada@example.com", "pw"), false)
            .await
            .unwrap();
        drain(&guard, &mut sub).await;

        assert_eq!(harness.provider.sign_out_calls(), 0);
        assert_eq!(guard.route("/userprofile"), RouteOutcome::Render(View::UserProfile));
    }

    #[tokio::test]
    async fn remembered_login_survives_restart() {
        let mut harness = Harness::new(provider());
        let guard = harness.guard();
        guard.detect_fresh_browser_session().await;
        guard
            .sign_in(&Directory(Ok(true)), &creds("ada@example.com", "pw"), true)
            .await
            .unwrap();

        harness.reopen_browser();
        harness.clock.advance(Duration::days(10));
        let guard = harness.guard();
        assert_eq!(
            guard.detect_fresh_browser_session().await,
            FreshSession::Fresh { sign_out_requested: false }
        );
        let mut sub = guard.activate().await.unwrap();
        drain(&guard, &mut sub).await;

        assert_eq!(harness.provider.sign_out_calls(), 0);
        assert!(guard.snapshot().is_present());
    }
}
