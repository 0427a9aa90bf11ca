use speedstream_core::logging;

mod cli;

fn main() {
    // Initialize logging as early as possible.
    logging::init_logging();

    if let Err(err) = cli::run_from_args() {
        eprintln!("speedstream error: {:#}", err);
        std::process::exit(1);
    }
}
