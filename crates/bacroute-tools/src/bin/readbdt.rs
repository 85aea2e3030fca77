use bacroute_datalink::BbmdAdmin;
use clap::Parser;
use std::net::SocketAddrV4;

#[derive(Parser, Debug)]
#[command(name = "bacroute-read-bdt")]
struct Args {
    #[arg(long)]
    bbmd: SocketAddrV4,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let admin = BbmdAdmin::connect(args.bbmd).await?;
    let entries = admin.read_bdt().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("bdt is empty");
        return Ok(());
    }
    for entry in entries {
        println!("{}/{}", entry.address, entry.mask);
    }
    Ok(())
}
