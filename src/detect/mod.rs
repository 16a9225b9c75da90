mod backend;
mod backends;
mod loader;

pub use backend::{Detector, ModelInfo};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use loader::{DefaultLoader, ModelLoader};
