use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = distconf::cli::Cli::parse();
    if let Err(e) = distconf::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
