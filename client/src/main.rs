use clap::Parser;
use client::game::RaceEvent;
use client::network::RaceClient;
use log::{error, info};
use shared::{Vec2, NUM_CHECKPOINTS, TOTAL_LAPS};
use tokio::time::{interval, Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    server: String,

    /// Display name to race under
    #[arg(short, long)]
    username: String,
}

/// Headless client: joins a session, then drives a scripted circuit and
/// fires checkpoints in order, reporting everything the server says. Handy
/// for filling seats while exercising a server.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("joining {} as {}", args.server, args.username);
    let mut client = match RaceClient::connect(&args.server, &args.username).await {
        Ok(client) => client,
        Err(e) => {
            error!("could not join the session: {}", e);
            return Ok(());
        }
    };

    info!("waiting for other players to connect...");
    loop {
        match client.next_event().await? {
            RaceEvent::RaceStarted => break,
            other => info!("{:?}", other),
        }
    }
    info!("the race has started");

    let center = Vec2::new(400.0, 300.0);
    let radius = 220.0;
    let mut angle: f32 = 0.0;
    let mut ticks: u32 = 0;
    let mut next_checkpoint: u8 = 0;
    let mut finished = false;

    let mut ticker = interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            event = client.next_event() => {
                let event = event?;
                match event {
                    RaceEvent::LapCompleted { laps_completed } => {
                        info!("lap {}/{} completed", laps_completed, TOTAL_LAPS);
                        if laps_completed >= TOTAL_LAPS && !finished {
                            finished = true;
                            client.send_race_completed().await?;
                        }
                    }
                    RaceEvent::GameOver { placements } => {
                        info!("the race is over, final placements:");
                        for (i, name) in placements.iter().enumerate() {
                            info!("  {}: {}", i + 1, name);
                        }
                        break;
                    }
                    other => info!("{:?}", other),
                }
            }

            _ = ticker.tick() => {
                angle += 0.05;
                let position = Vec2::new(
                    center.x + radius * angle.cos(),
                    center.y + radius * angle.sin(),
                );
                client.send_position(position, angle.to_degrees()).await?;

                ticks += 1;
                if !finished && ticks % 25 == 0 {
                    client.send_checkpoint(next_checkpoint).await?;
                    next_checkpoint = (next_checkpoint + 1) % NUM_CHECKPOINTS;
                }
            }
        }
    }

    Ok(())
}
