//! Composite services over the tacet primitives and stores.
//!
//! Four services implement the confidential booking flows: [`TunnelService`]
//! (envelope-encrypted bookings), [`StaffKeyService`] (split-key staff
//! identity), [`PinResetService`] (single-use reset tokens with client key
//! rotation) and [`ThrottleService`] (escalating backoff over low-entropy
//! secrets). Tenant stores are reached through the [`TenantRegistry`];
//! everything outward-facing goes through the [`NotificationSink`] seam.

pub mod config;
pub mod envelope;
pub mod error;
pub mod notify;
pub mod pin_reset;
pub mod registry;
pub mod staff_keys;
pub mod throttle;
pub mod tunnel;

pub use config::CoreConfig;
pub use envelope::{unwrap_tunnel_key, wrap_tunnel_key, RecipientKind};
pub use error::CoreError;
pub use notify::{BookingNotification, NoopSink, NotificationSink, NotifyError};
pub use pin_reset::PinResetService;
pub use registry::{TenantRegistry, TenantStoreProvider};
pub use staff_keys::StaffKeyService;
pub use throttle::{ThrottleDecision, ThrottleKind, ThrottleService};
pub use tunnel::{AppointmentRequest, BookingCreated, CreateTunnelParams, TunnelService};
