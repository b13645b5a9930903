//! One-off blocking checks from the command line
//!
//! Resolves each FQDN given on the command line and probes every resolved
//! address on both interfaces:
//!
//! ```bash
//! clearway-check --direct-dev eth0 --vpn-dev tun0 example.com rutracker.org
//! ```

use std::net::IpAddr;

use clearway::dns::IpFamily;
use clearway::{HttpProber, ProbeConfig, Prober};

struct Args {
    direct_dev: String,
    vpn_dev: String,
    fqdns: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut direct_dev = "wlan0".to_string();
        let mut vpn_dev = "tun0".to_string();
        let mut fqdns = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--direct-dev" => {
                    if let Some(dev) = args.next() {
                        direct_dev = dev;
                    }
                }
                "--vpn-dev" => {
                    if let Some(dev) = args.next() {
                        vpn_dev = dev;
                    }
                }
                "-h" | "--help" => {
                    println!(
                        "usage: clearway-check [--direct-dev DEV] [--vpn-dev DEV] FQDN..."
                    );
                    std::process::exit(0);
                }
                other => fqdns.push(other.trim_end_matches('.').to_string()),
            }
        }

        Self {
            direct_dev,
            vpn_dev,
            fqdns,
        }
    }
}

fn fatal(message: &str) -> ! {
    eprintln!("clearway-check: {message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.fqdns.is_empty() {
        fatal("no FQDNs given");
    }

    let prober = match HttpProber::new(ProbeConfig::new(&args.direct_dev, &args.vpn_dev)) {
        Ok(prober) => prober,
        Err(e) => fatal(&format!("unable to create prober: {e}")),
    };

    for fqdn in &args.fqdns {
        println!("check fqdn {fqdn}");

        let addrs: Vec<IpAddr> = match tokio::net::lookup_host((fqdn.as_str(), 443)).await {
            Ok(addrs) => addrs.map(|sa| sa.ip()).collect(),
            Err(e) => {
                eprintln!("  resolve failed: {e}");
                continue;
            }
        };

        for ip in addrs {
            let family = IpFamily::of(ip);
            match prober.is_blocked(&format!("{fqdn}."), ip, family).await {
                Ok(blocked) => println!("  {ip}: blocked={blocked}"),
                Err(e) => println!("  {ip}: indeterminate ({e})"),
            }
        }
    }
}
