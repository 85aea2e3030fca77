use bacroute_datalink::BbmdAdmin;
use clap::Parser;
use std::net::SocketAddrV4;

#[derive(Parser, Debug)]
#[command(name = "bacroute-delete-fdt")]
struct Args {
    #[arg(long)]
    bbmd: SocketAddrV4,
    /// Registration to remove, as the foreign device's ip:port.
    #[arg(long)]
    target: SocketAddrV4,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let admin = BbmdAdmin::connect(args.bbmd).await?;
    admin.delete_fdt_entry(args.target).await?;
    println!("deleted fdt entry {}", args.target);
    Ok(())
}
