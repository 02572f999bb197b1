//! x86-64 System V code generation.

macro_rules! wln {
    ($cg:expr, $($arg:tt)*) => {{
        use std::fmt::Write as _;
        let _ = writeln!($cg.out, $($arg)*);
    }};
}
pub(crate) use wln;

pub mod abi;
pub mod cast_ops;
pub mod codegen;
pub mod globals;

pub use codegen::codegen;
