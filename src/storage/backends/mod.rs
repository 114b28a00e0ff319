pub mod b2;
pub mod mock;

pub use b2::B2Backend;
pub use mock::MockBackend;
