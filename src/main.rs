use coinledger::cli::commands::run_cli;

fn main() -> anyhow::Result<()> {
    // Logging is initialized in run_cli once the flags are parsed
    run_cli()
}
