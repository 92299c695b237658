use migrun::cli::{execute, init_tracing, Entry};
use std::{env, process::ExitCode};

fn main() -> ExitCode {
    init_tracing();

    ExitCode::from(execute(Entry::Chained, env::args_os()))
}
