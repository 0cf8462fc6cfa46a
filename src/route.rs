//! Route gating: the pure access decision and the application's route table.

use crate::types::AuthSnapshot;

pub const LOGIN_PATH: &str = "/login";
pub const USER_PROFILE_PATH: &str = "/userprofile";
pub const PRACTICE_PATH: &str = "/practice";
pub const CREATE_PROFILE_PATH: &str = "/createprofile";

/// Router-level navigation command. The guard returns these instead of
/// navigating itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigate {
    pub to: String,
    /// Replace the current history entry instead of pushing a new one.
    pub replace: bool,
}

impl Navigate {
    #[must_use]
    pub fn push(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            replace: false,
        }
    }

    #[must_use]
    pub fn replace(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            replace: true,
        }
    }
}

/// Outcome of [`evaluate_route_access`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// No snapshot yet: show a loading state, neither render nor redirect.
    Pending,
    Allow,
    Redirect(Navigate),
}

/// Decide whether a protected view may render for `snapshot`.
#[must_use]
pub fn evaluate_route_access(snapshot: &AuthSnapshot, login_path: &str) -> RouteDecision {
    match snapshot {
        AuthSnapshot::Unknown => RouteDecision::Pending,
        AuthSnapshot::SignedIn(_) => RouteDecision::Allow,
        AuthSnapshot::SignedOut => RouteDecision::Redirect(Navigate::replace(login_path)),
    }
}

/// Who may see a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    /// Only for signed-out visitors (login, registration).
    GuestOnly,
    Protected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Landing,
    Login,
    Register,
    VerifyEmail,
    CreateProfile,
    Practice,
    Participate,
    UserProfile,
    EditProfile,
    PythonCompiler,
    Admin,
    ProblemSolver { id: String },
    ProblemSolution { id: String },
    DeleteAccount,
    TermsOfService,
    Vision,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Render(View),
    Loading,
    Navigate(Navigate),
}

struct RouteEntry {
    pattern: &'static str,
    access: Access,
    view: fn(Option<&str>) -> View,
}

#[rustfmt::skip]
const ROUTES: &[RouteEntry] = &[
    RouteEntry { pattern: "/", access: Access::Public, view: |_| View::Landing },
    RouteEntry { pattern: "/login", access: Access::GuestOnly, view: |_| View::Login },
    RouteEntry { pattern: "/register", access: Access::GuestOnly, view: |_| View::Register },
    RouteEntry { pattern: "/verify-email", access: Access::Public, view: |_| View::VerifyEmail },
    RouteEntry { pattern: "/createprofile", access: Access::Protected, view: |_| View::CreateProfile },
    RouteEntry { pattern: "/practice", access: Access::Public, view: |_| View::Practice },
    RouteEntry { pattern: "/participate", access: Access::Protected, view: |_| View::Participate },
    RouteEntry { pattern: "/userprofile", access: Access::Protected, view: |_| View::UserProfile },
    RouteEntry { pattern: "/updateprofile", access: Access::Protected, view: |_| View::EditProfile },
    RouteEntry { pattern: "/pythoncompiler", access: Access::Protected, view: |_| View::PythonCompiler },
    // Role checks happen server-side; the guard still requires a session.
    RouteEntry { pattern: "/admin", access: Access::Protected, view: |_| View::Admin },
    RouteEntry {
        pattern: "/solve/:id",
        access: Access::Protected,
        view: |id| View::ProblemSolver { id: id.unwrap_or_default().to_owned() },
    },
    RouteEntry {
        pattern: "/solve/:id/solution",
        access: Access::Protected,
        view: |id| View::ProblemSolution { id: id.unwrap_or_default().to_owned() },
    },
    RouteEntry { pattern: "/delete-account", access: Access::Protected, view: |_| View::DeleteAccount },
    RouteEntry { pattern: "/termsofservice", access: Access::Public, view: |_| View::TermsOfService },
    RouteEntry { pattern: "/vision", access: Access::Public, view: |_| View::Vision },
];

/// The application's routes with their access rules.
#[derive(Debug, Clone)]
pub struct RouteTable {
    login_path: String,
    signed_in_redirect: String,
}

impl RouteTable {
    #[must_use]
    pub fn new(login_path: impl Into<String>, signed_in_redirect: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
            signed_in_redirect: signed_in_redirect.into(),
        }
    }

    /// Access rule for `path`; `None` for unknown paths.
    #[must_use]
    pub fn access(&self, path: &str) -> Option<Access> {
        lookup(path).map(|(entry, _)| entry.access)
    }

    /// Resolve `path` against the table for the given snapshot.
    #[must_use]
    pub fn resolve(&self, path: &str, snapshot: &AuthSnapshot) -> RouteOutcome {
        let Some((entry, param)) = lookup(path) else {
            return RouteOutcome::Render(View::NotFound);
        };
        let view = (entry.view)(param);

        match entry.access {
            Access::Public => RouteOutcome::Render(view),
            Access::GuestOnly => {
                if snapshot.is_present() {
                    RouteOutcome::Navigate(Navigate::push(self.signed_in_redirect.as_str()))
                } else {
                    RouteOutcome::Render(view)
                }
            }
            Access::Protected => match evaluate_route_access(snapshot, &self.login_path) {
                RouteDecision::Pending => RouteOutcome::Loading,
                RouteDecision::Allow => RouteOutcome::Render(view),
                RouteDecision::Redirect(navigate) => RouteOutcome::Navigate(navigate),
            },
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(LOGIN_PATH, USER_PROFILE_PATH)
    }
}

fn lookup(path: &str) -> Option<(&'static RouteEntry, Option<&str>)> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    ROUTES
        .iter()
        .find_map(|entry| match_pattern(entry.pattern, path).map(|param| (entry, param)))
}

/// Match a `/segment/:param` pattern, returning the single captured parameter.
fn match_pattern<'a>(pattern: &str, path: &'a str) -> Option<Option<&'a str>> {
    let mut pattern_segments = pattern.split('/');
    let mut path_segments = path.split('/');
    let mut param = None;
    loop {
        match (pattern_segments.next(), path_segments.next()) {
            (None, None) => return Some(param),
            (Some(p), Some(s)) if p.starts_with(':') && !s.is_empty() => param = Some(s),
            (Some(p), Some(s)) if p == s => {}
            _ => return None,
        }
    }
}
