use clap::{Parser, Subcommand};
use netdevgen::config::{ConfigError, GeneratorConfig};
use std::net::Ipv4Addr;

#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Args, Clone)]
pub struct PacketArgs {
    #[arg(short, long, default_value = None, help = "Path to a TOML configuration file")]
    pub config: Option<String>,
    #[arg(
        short = 'l',
        long,
        help = "Value of the IPv4 total length field [default: 50]"
    )]
    pub packet_length: Option<u16>,
    #[arg(short, long, help = "Source IPv4 address [default: 172.16.0.1]")]
    pub source: Option<Ipv4Addr>,
    #[arg(short, long, help = "Destination IPv4 address [default: 172.16.0.2]")]
    pub destination: Option<Ipv4Addr>,
}

impl PacketArgs {
    /// Loads the configuration file, if any, then applies the command line overrides
    pub fn load(&self) -> Result<GeneratorConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => GeneratorConfig::from_file(path)?,
            None => GeneratorConfig::default(),
        };
        if let Some(packet_length) = self.packet_length {
            config.packet_length = packet_length;
        }
        if let Some(source) = self.source {
            config.source = source;
        }
        if let Some(destination) = self.destination {
            config.destination = destination;
        }
        Ok(config)
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Send the packet toward the destination until Ctrl-C. Requires root privilege.
    Run {
        #[command(flatten)]
        packet: PacketArgs,
        #[arg(
            long,
            help = "Maximum number of clones held by the kernel at the same time [default: 1024]"
        )]
        max_in_flight: Option<usize>,
        #[arg(short = 't', long, default_value = None, help = "Stop after this duration, described in human-friendly time, such as \"1min 30s\"")]
        duration: Option<String>,
    },
    /// Print the packet template as hexadecimal, without sending anything
    Template {
        #[command(flatten)]
        packet: PacketArgs,
    },
    /// Print the route selected by the kernel for the source and destination
    Route {
        #[command(flatten)]
        packet: PacketArgs,
    },
}
