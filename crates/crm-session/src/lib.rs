#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]

//! Session lifecycle for the CRM client: silent token renewal, server-side
//! session validation, the concurrent-session cap workflow and the controller
//! that ties them together.

pub mod clock;
pub mod controller;
pub mod credentials;
pub mod device;
pub mod error;
pub mod events;
pub mod http;
pub mod limit;
pub mod scheduler;
pub mod settings;
pub mod transport;
pub mod validator;

pub use crate::clock::{Clock, SystemClock, TokioClock};
pub use crate::controller::AuthSessionController;
pub use crate::device::{
    environment_fingerprint, DeviceIdentityProvider, FixedDeviceIdentity, StoredDeviceIdentity,
};
pub use crate::error::AuthError;
pub use crate::events::{RefreshEvent, SessionEvent, SessionInvalid};
pub use crate::http::HttpAuthTransport;
pub use crate::limit::{LimitPhase, LoginCredentials, Resolution, SessionLimitCoordinator};
pub use crate::scheduler::{RefreshOutcome, RefreshPolicy, RefreshScheduleState, RefreshScheduler};
pub use crate::settings::SessionSettings;
pub use crate::transport::{AuthTransport, Authorization};
pub use crate::validator::{validate_session, SessionValidator};
