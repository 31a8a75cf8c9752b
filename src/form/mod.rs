mod api;
mod engine;
mod mutation;
mod submit;
mod validation;


pub use api::FormApi;
pub use engine::{FormEngine, FormEngineBuilder, WeakFormEngine};
pub use mutation::SetOptions;
