use anyhow::Result;

use card_barcode_manager::cli::commands::run_cli;

fn main() -> Result<()> {
    run_cli()
}
