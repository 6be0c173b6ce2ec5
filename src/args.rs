use std::path::PathBuf;
use structopt::*;

#[derive(StructOpt, Debug)]
pub struct Args {
    /// absolute location of the module to execute, e.g. /hello
    #[structopt(name = "MODULE")]
    pub module: String,

    /// search dir for compiled .sbo objects (repeatable; defaults to the
    /// current dir)
    #[structopt(long = "path", short = "p", parse(from_os_str))]
    pub search_dirs: Vec<PathBuf>,

    /// log each executed instruction with its offset
    #[structopt(long = "trace")]
    pub trace: bool,

    /// print the object listing instead of executing it
    #[structopt(long = "dump")]
    pub dump: bool,

    /// print the entry call's return value after execution
    #[structopt(long = "print-result")]
    pub print_result: bool,
}
