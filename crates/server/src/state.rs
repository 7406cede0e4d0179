//! Shared application state.

use std::sync::Arc;

use pagewright::{RenderOptions, ResponseComposer};

use crate::demo::{self, DemoRenderer};

/// State passed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub composer: ResponseComposer,
}

impl AppState {
    /// State serving the demo blog with `options`.
    pub fn demo(options: RenderOptions) -> pagewright::Result<Self> {
        let composer = ResponseComposer::new(
            options,
            demo::manifest()?,
            demo::template(),
            Arc::new(DemoRenderer),
        )?;
        Ok(Self { composer })
    }
}
