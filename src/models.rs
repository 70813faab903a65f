pub mod delivery_record;
pub mod destination;
pub mod entry;
pub mod feed;

pub use delivery_record::{DeliveryRecord, DeliveryStatus};
pub use destination::{ChatKind, Destination};
pub use entry::Entry;
pub use feed::{CacheValidators, Feed};
