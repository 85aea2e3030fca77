use bacroute_datalink::{Bbmd, BdtEntry, Link};
use bacroute_tools::parse_bdt_entry;
use clap::Parser;
use std::net::SocketAddrV4;

#[derive(Parser, Debug)]
#[command(name = "bacroute-bbmd")]
struct Args {
    /// Local bind address.
    #[arg(long, default_value = "0.0.0.0:47808")]
    bind: SocketAddrV4,
    /// Subnet broadcast address frames go out on.
    #[arg(long)]
    broadcast: SocketAddrV4,
    /// Peer entry in ip:port/mask form; repeat per peer BBMD.
    #[arg(long = "peer", value_parser = parse_bdt_entry)]
    peers: Vec<BdtEntry>,
    /// Public address peers reach this BBMD at, when it sits behind NAT.
    #[arg(long)]
    nat: Option<SocketAddrV4>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let bbmd = match args.nat {
        Some(public) => Bbmd::bind_nat(args.bind, args.broadcast, public).await?,
        None => Bbmd::bind(args.bind, args.broadcast).await?,
    };
    for entry in &args.peers {
        bbmd.add_peer(*entry).await?;
    }

    println!(
        "bbmd on {} relaying for {} peers. Ctrl+C to stop.",
        bbmd.address(),
        args.peers.len()
    );
    // Relaying runs inside recv; the payloads themselves are not for us.
    let mut buf = [0u8; 1600];
    loop {
        if let Err(err) = bbmd.recv(&mut buf).await {
            eprintln!("receive failed: {err}");
        }
    }
}
