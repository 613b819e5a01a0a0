use clap::Parser;
use tasknest_client::{Cli, run};

#[tokio::main]
async fn main() -> Result<(), tasknest_client::AppError> {
    run(Cli::parse()).await
}
