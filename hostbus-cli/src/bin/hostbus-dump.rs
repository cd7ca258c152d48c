use std::process::ExitCode;

use clap::Parser;
use hostbus_connector::{
    common::{Connector, EventPoller, Packet},
    Mode, PubSubConnector,
};

#[derive(Parser)]
#[command(about = "Print packets published by a hostbus gateway")]
struct Args {
    /// Endpoint the gateway publishes on
    #[clap(default_value = "tcp://localhost:8211")]
    endpoint_in: String,
    /// Endpoint the gateway receives on
    #[clap(default_value = "tcp://localhost:8212")]
    endpoint_out: String,
    /// Only show packets addressed to this node
    #[clap(short, long)]
    destination: Option<u8>,
    /// Print payloads
    #[clap(short, long)]
    verbose: bool,
}

fn print_packet(packet: &Packet, verbose: bool) {
    let time = chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false);
    if verbose {
        println!(
            "{time}: {} [{}] {}",
            packet.header,
            packet.payload.len(),
            packet.payload
        );
    } else {
        println!("{time}: {} [{}]", packet.header, packet.payload.len());
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut connector =
        match PubSubConnector::new(&args.endpoint_in, &args.endpoint_out, Mode::SubPush) {
            Ok(connector) => connector,
            Err(e) => {
                log::error!("{e}");
                return ExitCode::FAILURE;
            }
        };
    let poller = EventPoller::new();
    connector.set_read_event(poller.event_sender());

    loop {
        poller.wait();
        while let Some(packet) = connector.take_packet() {
            if args
                .destination
                .is_some_and(|dst| dst != packet.header.destination)
            {
                continue;
            }
            print_packet(&packet, args.verbose);
        }
    }
}
