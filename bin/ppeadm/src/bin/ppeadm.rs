// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::io;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use clap::ValueEnum;

use ppe::api::PpeConfig;
use ppe::engine::bind::Egress;
use ppe::print::print_foe;
use ppe::print::print_sizes_into;
use ppeadm::Replay;
use ppeadm::load_config;
use ppeadm::print_tuples_into;
use ppeadm::print_verdicts_into;
use ppeadm::read_capture;

/// Inspect captures and configurations for the flow offload engine
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Print each frame's flow tuple, or why it does not parse.
    Parse { capture: PathBuf },

    /// Replay a capture through a simulated engine and dump the bound
    /// flow table.
    Bind {
        capture: PathBuf,

        /// Engine configuration (TOML). Defaults apply without one.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// The port the frames leave through.
        #[arg(long, value_enum, default_value_t = Port::Gmac1)]
        egress: Port,
    },

    /// Validate a configuration and print it with defaults filled in.
    Config { path: PathBuf },

    /// Print the memory needed by each table size.
    Sizes,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Port {
    Gmac1,
    Gmac2,
}

impl From<Port> for Egress {
    fn from(port: Port) -> Self {
        match port {
            Port::Gmac1 => Egress::Gmac1,
            Port::Gmac2 => Egress::Gmac2,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    let log = ppeadm::logger();

    match cmd {
        Command::Parse { capture } => {
            let frames = read_capture(&log, &capture)?;
            print_tuples_into(&mut io::stdout(), &frames)?;
        }

        Command::Bind { capture, config, egress } => {
            let cfg = match config {
                Some(path) => load_config(&path)?,
                None => PpeConfig::default(),
            };

            let frames = read_capture(&log, &capture)?;
            let replay =
                Replay::new(&log, cfg).context("failed to start engine")?;
            let verdicts = replay.run(&frames, egress.into());
            print_verdicts_into(&mut io::stdout(), &verdicts)?;
            println!();
            print_foe(&replay.engine().dump())?;
        }

        Command::Config { path } => {
            let cfg = load_config(&path)?;
            let text = toml::to_string(&cfg)
                .context("failed to serialize configuration")?;
            let mut out = io::stdout();
            out.write_all(text.as_bytes())?;
            writeln!(out, "# generation: {:?}", cfg.generation())?;
            writeln!(out, "# udp checksum defect: {}", cfg.udp_csum_bug())?;
        }

        Command::Sizes => {
            print_sizes_into(&mut io::stdout())?;
        }
    }

    Ok(())
}
