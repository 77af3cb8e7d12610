//! Domain services. Each holds `Arc` handles to the repositories it needs and is
//! built once at start-up.

pub mod chat;
pub mod listings;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod review;
pub mod translation;

pub use chat::ChatService;
pub use listings::ListingService;
pub use notifications::NotificationWriter;
pub use orders::{OrderFees, OrderService};
pub use payments::PaymentWebhook;
pub use review::AutoReviewPipeline;
pub use translation::TranslationService;
