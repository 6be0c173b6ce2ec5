mod args;

use crate::args::Args;
use sable_common::ModuleLocation;
use sable_object::Object;
use sable_runtime::{
    BytecodeInterpreter, DirectoryLoader, InterpreterState, Loader, RuntimeError, RuntimeResult,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use structopt::StructOpt;

fn run(args: &Args) -> RuntimeResult<i32> {
    let location = ModuleLocation::new(&args.module);

    let mut search_dirs = args.search_dirs.clone();
    if search_dirs.is_empty() {
        search_dirs.push(PathBuf::from("."));
    }
    let loader = Arc::new(DirectoryLoader::new(search_dirs));

    if args.dump {
        let bytes = loader
            .load_object(&location)?
            .ok_or_else(|| RuntimeError::MissingObject(location.clone()))?;
        let object = Object::from_bytes(&bytes)?;
        print!("{}", object);
        return Ok(0);
    }

    let state = InterpreterState::new(loader, &location)?;
    let mut interpreter = BytecodeInterpreter::new(state).with_trace(args.trace);
    let exit = interpreter.run()?;

    log::debug!(
        "finished after {} instructions with status {}",
        exit.instruction_count,
        exit.status_code
    );

    if args.print_result {
        println!("{}", exit.main_return);
    }

    Ok(exit.status_code as i32)
}

fn main() {
    env_logger::init();

    let args = Args::from_args();
    match run(&args) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {}", err);
            process::exit(70);
        }
    }
}
