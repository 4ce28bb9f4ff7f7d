//! Repository traits for the collection schema.
//!
//! Every method runs inside the transaction that implements it; nothing is
//! visible to other transactions until `StoreTx::commit`.

pub mod collections;
pub mod hierarchy;
pub mod history;
pub mod items;
pub mod properties;
pub mod states;

pub use collections::CollectionRepo;
pub use hierarchy::HierarchyRepo;
pub use history::HistoryRepo;
pub use items::ItemRepo;
pub use properties::PropertyRepo;
pub use states::StateRepo;
