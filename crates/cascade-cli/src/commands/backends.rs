//! Backend report.

use anyhow::Result;
use cascade_compute::{describe_backends, select_best_backend};

pub fn run(verbose: bool) -> Result<()> {
    print!("{}", describe_backends());
    if verbose {
        println!("auto selects: {}", select_best_backend());
    }
    Ok(())
}
