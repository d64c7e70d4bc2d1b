// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Operator tool for poking at a volume set directly: take snapshots,
// mount volumes, remove them, and inspect pool usage.

use std::env;
use std::path::PathBuf;
use std::process;

use clap::{Arg, ArgMatches, Command};
use env_logger::Builder;

use volset::{VolsetResult, VolumeSet};

fn parse_args() -> Command {
    Command::new("volset-tool")
        .about("Operate on a thin-provisioned volume set")
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value("/var/lib/docker")
                .help("Root directory of the volume set"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("snap")
                .about("Create a snapshot volume")
                .arg(Arg::new("hash").required(true))
                .arg(Arg::new("base").required(true)),
        )
        .subcommand(
            Command::new("mount")
                .about("Activate a volume and mount it")
                .arg(Arg::new("hash").required(true))
                .arg(
                    Arg::new("mountpoint")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove a volume")
                .arg(Arg::new("hash").required(true)),
        )
        .subcommand(Command::new("status").about("Show pool usage"))
}

/// Configure and initialize the logger. Read log configuration
/// parameters from the environment if RUST_LOG is set.
fn initialize_log() {
    let mut builder = Builder::new();
    if let Ok(s) = env::var("RUST_LOG") {
        builder.parse_filters(&s);
    }
    builder.init()
}

fn hash_arg<'a>(matches: &'a ArgMatches) -> &'a str {
    matches
        .get_one::<String>("hash")
        .expect("hash is a mandatory argument")
}

fn run() -> VolsetResult<()> {
    let matches = parse_args().get_matches();
    let root = matches
        .get_one::<PathBuf>("root")
        .expect("root has a default value");

    let mut volumes = VolumeSet::new(root)?;

    match matches.subcommand() {
        Some(("snap", args)) => {
            let base = args
                .get_one::<String>("base")
                .expect("base is a mandatory argument");
            volumes.add_volume(hash_arg(args), base)
        }
        Some(("mount", args)) => {
            let mountpoint = args
                .get_one::<PathBuf>("mountpoint")
                .expect("mountpoint is a mandatory argument");
            volumes.mount_volume(hash_arg(args), mountpoint)
        }
        Some(("remove", args)) => volumes.remove_volume(hash_arg(args)),
        Some(("status", _)) => {
            let status = volumes.status()?;
            println!("Pool name: {}", status.pool_name);
            println!("Data file: {}", status.data_loopback.display());
            println!("Metadata file: {}", status.metadata_loopback.display());
            println!(
                "Data space used: {:.1} MB of {:.1} MB",
                status.data.used.0 as f64 / (1024.0 * 1024.0),
                status.data.total.0 as f64 / (1024.0 * 1024.0),
            );
            println!(
                "Metadata space used: {:.1} MB of {:.1} MB",
                status.metadata.used.0 as f64 / (1024.0 * 1024.0),
                status.metadata.total.0 as f64 / (1024.0 * 1024.0),
            );
            Ok(())
        }
        _ => unreachable!("subcommand is required"),
    }
}

fn main() {
    initialize_log();

    if let Err(err) = run() {
        eprintln!("Error encountered: {err}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::parse_args;

    #[test]
    fn test_arg_parsing() {
        parse_args().debug_assert();
    }
}
