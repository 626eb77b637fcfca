pub mod registry;

pub use registry::{SymbolRegistry, SymbolValidation};
