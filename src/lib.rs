pub mod error;
pub mod keys;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod sources;
pub mod store;

pub use error::{IngestError, Result};
pub use store::Store;
