use bacroute_datalink::BipLink;
use bacroute_network::{NetworkServiceAccessPoint, RouterService};
use bacroute_tools::{parse_adapter_spec, AdapterSpec};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bacroute-router")]
struct Args {
    /// Adapter binding in net=ip:port[,broadcast] form; repeat per network.
    #[arg(long = "adapter", value_parser = parse_adapter_spec, required = true)]
    adapters: Vec<AdapterSpec>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut nsap = NetworkServiceAccessPoint::new();
    for spec in &args.adapters {
        let link = BipLink::bind(spec.bind, spec.broadcast).await?;
        let station = link.station()?;
        nsap.bind(link, Some(spec.network), Some(station))?;
        println!("network {} on {}", spec.network, spec.bind);
    }

    let _service = RouterService::start(nsap);
    println!(
        "routing between {} networks. Ctrl+C to stop.",
        args.adapters.len()
    );
    std::future::pending::<()>().await;
    Ok(())
}
