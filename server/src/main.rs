use clap::Parser;
use log::warn;
use server::network::Server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the listener to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "7878")]
    port: u16,

    /// Players required before the race starts
    #[arg(short, long, default_value_t = shared::DEFAULT_CAPACITY)]
    capacity: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    if args.capacity < 1 || args.capacity > shared::MAX_CAPACITY {
        warn!(
            "capacity {} outside 1..={}, clamping",
            args.capacity,
            shared::MAX_CAPACITY
        );
    }

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, args.capacity).await?;
    server.run().await
}
