//! Model loading.
//!
//! The inference loop never constructs backends directly; it asks a
//! `ModelLoader` so hot-swap and tests can route identifiers however they
//! need. The default loader maps `stub://` identifiers to the stub backend
//! and `.onnx` paths to the tract backend (feature `backend-tract`).

use anyhow::{anyhow, Result};

use crate::detect::backend::Detector;
use crate::detect::backends::StubBackend;

pub trait ModelLoader: Send {
    fn load(&self, identifier: &str) -> Result<Box<dyn Detector>>;
}

pub struct DefaultLoader;

impl ModelLoader for DefaultLoader {
    fn load(&self, identifier: &str) -> Result<Box<dyn Detector>> {
        if identifier.starts_with("stub://") {
            return Ok(Box::new(StubBackend::new(identifier)?));
        }
        if identifier.ends_with(".onnx") {
            #[cfg(feature = "backend-tract")]
            {
                return Ok(Box::new(
                    crate::detect::backends::TractBackend::load(identifier)?,
                ));
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                return Err(anyhow!(
                    "loading {} requires the backend-tract feature",
                    identifier
                ));
            }
        }
        Err(anyhow!("unsupported model identifier '{}'", identifier))
    }
}
