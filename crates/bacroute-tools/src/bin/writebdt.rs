use bacroute_datalink::{BbmdAdmin, BdtEntry};
use bacroute_tools::parse_bdt_entry;
use clap::Parser;
use std::net::SocketAddrV4;

#[derive(Parser, Debug)]
#[command(name = "bacroute-write-bdt")]
struct Args {
    #[arg(long)]
    bbmd: SocketAddrV4,
    /// Entry in ip:port/mask form; repeat in distribution order.
    #[arg(long = "entry", value_parser = parse_bdt_entry, required = true)]
    entries: Vec<BdtEntry>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let admin = BbmdAdmin::connect(args.bbmd).await?;
    admin.write_bdt(&args.entries).await?;
    println!("wrote {} bdt entries", args.entries.len());
    Ok(())
}
