use migrun::cli::{execute, init_tracing, Entry};
use std::{env, process::ExitCode};

fn main() -> ExitCode {
    init_tracing();

    ExitCode::from(execute(Entry::AllToAll, env::args_os()))
}
