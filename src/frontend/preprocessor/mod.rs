pub mod builtin_macros;
pub mod conditionals;
pub mod includes;
pub mod macro_defs;
#[allow(clippy::module_inception)]
pub mod preprocessor;

pub use preprocessor::Preprocessor;
