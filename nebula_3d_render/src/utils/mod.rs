/// Utility types shared by the render core and its backends

// Module declarations
pub mod sorted_set;
pub mod ownership;
pub mod hashed_name;

// Re-exports
pub use sorted_set::SortedSet;
pub use ownership::Ownership;
pub use hashed_name::HashedName;
