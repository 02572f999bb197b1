#![recursion_limit = "512"]
// Compiler functions naturally accumulate parameters (session, types, flags).
// Refactoring every one into a struct would add boilerplate without improving clarity.
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod backend;
pub mod common;
pub mod driver;
pub mod frontend;

/// Shared entry point for the compiler binary. Spawns the real work on a
/// thread with a large stack so deeply recursive C files don't overflow.
pub fn compiler_main() {
    const STACK_SIZE: usize = 64 * 1024 * 1024; // 64 MB
    let builder = std::thread::Builder::new().stack_size(STACK_SIZE);
    let handler = builder
        .spawn(|| {
            let args: Vec<String> = std::env::args().collect();
            driver::run(&args)
        })
        .expect("failed to spawn main thread");

    match handler.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Err(e) => {
            if let Some(s) = e.downcast_ref::<&str>() {
                eprintln!("rycc: internal error: {}", s);
            } else if let Some(s) = e.downcast_ref::<String>() {
                eprintln!("rycc: internal error: {}", s);
            } else {
                eprintln!("rycc: internal error (thread panicked)");
            }
            std::process::exit(1);
        }
    }
}
