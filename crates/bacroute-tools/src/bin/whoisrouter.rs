use bacroute_core::encoding::reader::Reader;
use bacroute_core::{NetworkMessage, Npdu, NpduContent};
use bacroute_datalink::{BipLink, Link, LinkDestination};
use clap::Parser;
use std::net::SocketAddrV4;
use tokio::time::{timeout, Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "bacroute-whoisrouter")]
struct Args {
    /// Local bind address.
    #[arg(long, default_value = "0.0.0.0:47808")]
    bind: SocketAddrV4,
    /// Subnet broadcast address.
    #[arg(long)]
    broadcast: SocketAddrV4,
    /// Ask for a route to one network; omit to list everything routers carry.
    #[arg(long)]
    network: Option<u16>,
    /// How long to listen for answers.
    #[arg(long, default_value_t = 3)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let link = BipLink::bind(args.bind, args.broadcast).await?;
    let request = Npdu::network(NetworkMessage::WhoIsRouterToNetwork(args.network));
    link.send(LinkDestination::Broadcast, &request.to_vec()?)
        .await?;

    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut buf = [0u8; 1600];
    let mut heard = 0usize;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Ok(received) = timeout(remaining, link.recv(&mut buf)).await else {
            break;
        };
        let (len, source, _) = received?;
        let mut reader = Reader::new(&buf[..len]);
        let Ok(npdu) = Npdu::decode(&mut reader) else {
            continue;
        };
        if let NpduContent::Network(NetworkMessage::IAmRouterToNetwork(networks)) = npdu.content {
            heard += 1;
            println!("router {source} reaches {networks:?}");
        }
    }
    if heard == 0 {
        println!("no routers answered");
    }
    Ok(())
}
