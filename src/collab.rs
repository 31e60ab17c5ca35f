//! Collaborator seams
//!
//! The core consumes its surroundings through three narrow async traits:
//! transport (event delivery), media (device acquisition/release) and
//! payments (capture on accepted proposals). Production adapters live next
//! to each trait; test doubles live with the runtime's integration tests.

pub mod media;
pub mod payment;
pub mod transport;

#[allow(unused_imports)] // Public API re-exports
pub use media::{DeviceError, LeaseTracker, MediaGateway, MediaHandle, MediaLease};
#[allow(unused_imports)] // Public API re-exports
pub use payment::{CaptureReceipt, CaptureRequest, PaymentError, PaymentGateway, RecordingPayments};
#[allow(unused_imports)] // Public API re-exports
pub use transport::{DeliveryAck, DeliveryError, NullTransport, Transport, WebhookTransport};
