#![doc = include_str!("../README.md")]

pub mod clock;
pub mod config;
pub mod error;
#[cfg(feature = "execution")]
pub mod execution;
pub mod guard;
pub mod identity;
pub mod login;
pub mod records;
pub mod route;
pub mod storage;
pub mod types;

// Re-exports for convenient access
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::GuardConfig;
pub use error::{BoxError, Error};
#[cfg(feature = "execution")]
pub use execution::{ExecutionClient, ExecutionConfig, ExecutionOutput, extract_relevant_output};
pub use guard::{ExpiryCheck, FreshSession, GuardPhase, SessionGuard, StaleReason};
pub use identity::{IdentityProvider, MemoryIdentity, Publisher, Subscription, Unsubscribe};
pub use login::{LoginOutcome, ProfileDirectory};
pub use records::{RememberMeRecord, SessionMarker};
pub use route::{
    Access, Navigate, RouteDecision, RouteOutcome, RouteTable, View, evaluate_route_access,
};
pub use storage::{KeyValueStore, MemoryStore, Stores};
pub use types::{AuthSession, AuthSnapshot, Credentials, UserId};
