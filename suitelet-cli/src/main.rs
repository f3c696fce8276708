//! suitelet: launcher process.
//!
//! Usage: `suitelet '<network options JSON>'`

use std::process;

fn main() {
    suitelet_cli::init_tracing();

    let arg = std::env::args().nth(1);
    process::exit(suitelet_cli::launch(arg.as_deref()));
}
