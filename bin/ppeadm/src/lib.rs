// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! PPE offline administration library
//!
//! Everything here works on files: packet captures are parsed, or
//! replayed through an engine whose flow-table hardware and interfaces
//! are simulated, and configurations are checked before they are
//! handed to a driver.

use pcap_parser::Linktype;
use pcap_parser::pcap;
use ppe::api::MacAddr;
use ppe::api::PpeConfig;
use ppe::api::PpeError;
use ppe::engine::Engine;
use ppe::engine::bind;
use ppe::engine::bind::BindOutcome;
use ppe::engine::bind::Egress;
use ppe::engine::bind::NotAccelerated;
use ppe::engine::flow_table::FoeHw;
use ppe::engine::foe::FoeFlow;
use ppe::engine::foe::Ipv4DsLite;
use ppe::engine::foe::Ipv4Hnapt;
use ppe::engine::foe::Ipv6Route5T;
use ppe::engine::foe::Ipv6SixRd;
use ppe::engine::frame::Frame;
use ppe::engine::ifdir::DeviceResolver;
use ppe::engine::ifdir::NetDev;
use ppe::engine::ifdir::NetDevRef;
use ppe::engine::parse;
use ppe::engine::parse::EncapKind;
use ppe::engine::parse::FlowTuple;
use ppe::engine::parse::L3Info;
use ppe::engine::parse::L4Info;
use ppe::engine::parse::ParseError;
use slog::Drain;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use tabwriter::TabWriter;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: malformed capture: {msg}")]
    Capture { path: String, msg: String },

    #[error("{path}: link type {linktype} is not Ethernet")]
    LinkType { path: String, linktype: i32 },

    #[error("{path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0}")]
    Ppe(#[from] PpeError),
}

/// The logger used by the `ppeadm` binary. Filtering follows
/// `RUST_LOG`.
pub fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "ppeadm"))
}

/// Read every frame of the pcap file at `path`.
///
/// Frames captured with a short snap length are kept; they are likely
/// to fail parsing, which is reported per frame.
pub fn read_capture(log: &Logger, path: &Path) -> Result<Vec<Vec<u8>>, Error> {
    let name = path.display().to_string();
    let data = std::fs::read(path)
        .map_err(|source| Error::Io { path: name.clone(), source })?;

    let (mut rest, hdr) = pcap::parse_pcap_header(&data).map_err(|e| {
        Error::Capture { path: name.clone(), msg: format!("header: {e:?}") }
    })?;

    if hdr.network != Linktype::ETHERNET {
        return Err(Error::LinkType { path: name, linktype: hdr.network.0 });
    }

    let mut frames = Vec::new();
    while !rest.is_empty() {
        let (next, block) = pcap::parse_pcap_frame(rest).map_err(|e| {
            Error::Capture {
                path: name.clone(),
                msg: format!("frame {}: {e:?}", frames.len()),
            }
        })?;

        if block.caplen < block.origlen {
            warn!(log, "frame truncated by capture";
                "frame" => frames.len(),
                "caplen" => block.caplen,
                "origlen" => block.origlen
            );
        }

        frames.push(block.data.to_vec());
        rest = next;
    }

    debug!(log, "read capture"; "path" => &name, "frames" => frames.len());
    Ok(frames)
}

/// Read and validate a TOML engine configuration.
pub fn load_config(path: &Path) -> Result<PpeConfig, Error> {
    let name = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|source| Error::Io { path: name.clone(), source })?;
    let cfg: PpeConfig = toml::from_str(&text)
        .map_err(|source| Error::Toml { path: name, source })?;
    cfg.validate()?;
    Ok(cfg)
}

/// The flow-table side of the engine: a free-running clock and a
/// count of slot barriers.
#[derive(Debug, Default)]
struct SimHw {
    ts: AtomicU16,
    syncs: AtomicUsize,
}

impl FoeHw for SimHw {
    fn timestamp(&self) -> u16 {
        self.ts.fetch_add(1, Ordering::Relaxed)
    }

    fn sync_for_device(&self, _idx: u32, _slot: &[u8]) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }
}

/// An always-up interface that discards what it is given.
struct SimDev {
    name: String,
    mac: MacAddr,
}

impl NetDev for SimDev {
    fn name(&self) -> &str {
        &self.name
    }

    fn mac(&self) -> MacAddr {
        self.mac
    }

    fn is_up(&self) -> bool {
        true
    }

    fn xmit(&self, _frame: Frame) {}
}

/// Resolves any interface name to a fresh simulated interface.
struct SimNet;

impl DeviceResolver for SimNet {
    fn get_by_name(&self, name: &str) -> Option<NetDevRef> {
        let mac = MacAddr::from([0x02, 0, 0, 0, 0, name.len() as u8]);
        Some(Arc::new(SimDev { name: name.to_string(), mac }))
    }
}

/// What became of one replayed frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Bound(u32),
    PreBound(u32),
    Rejected(NotAccelerated),
}

/// An engine with simulated hardware, for replaying captures.
pub struct Replay {
    log: Logger,
    engine: Engine,
    hw: Arc<SimHw>,
}

impl Replay {
    pub fn new(log: &Logger, cfg: PpeConfig) -> Result<Self, Error> {
        let log = log.new(o!("chip" => cfg.chip.to_string()));
        let hw = Arc::new(SimHw::default());
        let engine = Engine::new(cfg, hw.clone())?;
        engine.start(&SimNet);
        Ok(Self { log, engine, hw })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Learn each frame's flow into its own slot and try to bind it,
    /// as if the frame had reached its rate limit on the way out of
    /// `egress`.
    ///
    /// Hardware learns from the frame itself, as if no translation
    /// had taken place.
    pub fn run(&self, frames: &[Vec<u8>], egress: Egress) -> Vec<Verdict> {
        let table = self.engine.table();
        let num_slots = table.num_slots();

        let verdicts: Vec<Verdict> = frames
            .iter()
            .enumerate()
            .map(|(i, bytes)| {
                let idx = i as u32 % num_slots;
                match self.replay_one(idx, bytes, egress) {
                    Ok(BindOutcome::Bound) => Verdict::Bound(idx),
                    Ok(BindOutcome::PreBound) => Verdict::PreBound(idx),
                    Err(why) => Verdict::Rejected(why),
                }
            })
            .collect();

        info!(self.log, "replay done";
            "frames" => frames.len(),
            "syncs" => self.hw.syncs.load(Ordering::Relaxed)
        );
        verdicts
    }

    fn replay_one(
        &self,
        idx: u32,
        bytes: &[u8],
        egress: Egress,
    ) -> Result<BindOutcome, NotAccelerated> {
        let tuple = parse::parse(bytes)?;
        let flow = learn(&tuple)?;
        let table = self.engine.table();

        if let Err(e) = table.hw_learn(idx, flow) {
            warn!(self.log, "learn failed"; "slot" => idx, "err" => %e);
            return Err(NotAccelerated::BadEntry);
        }

        let frame = Frame::new(bytes.to_vec());
        bind::bind(
            &mut table.lock(),
            idx,
            &frame,
            egress,
            self.engine.cfg(),
            self.engine.dir(),
        )
    }
}

/// The flow hardware would learn for this frame.
fn learn(tuple: &FlowTuple) -> Result<FoeFlow, NotAccelerated> {
    let flow = match (tuple.l3, tuple.l4) {
        (
            L3Info::Ipv4(ip),
            L4Info::Tcp { sport, dport } | L4Info::Udp { sport, dport, .. },
        ) => FoeFlow::Ipv4Hnapt(Ipv4Hnapt {
            sip: ip.src,
            dip: ip.dst,
            sport,
            dport,
            ..Default::default()
        }),

        (L3Info::Ipv4(_), L4Info::Ipv6InIpv4) => {
            FoeFlow::Ipv6SixRd(Ipv6SixRd::default())
        }

        (
            L3Info::Ipv6(ip),
            L4Info::Tcp { sport, dport } | L4Info::Udp { sport, dport, .. },
        ) => FoeFlow::Ipv6Route5T(Ipv6Route5T {
            sip: ip.src,
            dip: ip.dst,
            sport,
            dport,
        }),

        (L3Info::Ipv6(_), L4Info::Ipv4InIpv6) => {
            FoeFlow::Ipv4DsLite(Ipv4DsLite::default())
        }

        (L3Info::Ipv4(ip), _) => return Err(NotAccelerated::Protocol(ip.proto)),
        (L3Info::Ipv6(ip), _) => {
            return Err(NotAccelerated::Protocol(ip.next_hdr));
        }
    };

    Ok(flow)
}

fn encap_str(tuple: &FlowTuple) -> String {
    if tuple.encap.is_empty() {
        return String::from("-");
    }

    tuple
        .encap
        .iter()
        .map(|step| match step.kind {
            EncapKind::Vlan { tci } => format!("vlan {tci}"),
            EncapKind::PppoeSession { sid } => format!("pppoe {sid}"),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn l4_str(l4: &L4Info) -> String {
    match l4 {
        L4Info::Tcp { .. } => String::from("TCP"),
        L4Info::Udp { csum: 0, .. } => String::from("UDP (no csum)"),
        L4Info::Udp { .. } => String::from("UDP"),
        L4Info::Ipv4InIpv6 => String::from("IPv4-in-IPv6"),
        L4Info::Ipv6InIpv4 => String::from("IPv6-in-IPv4"),
        L4Info::Other(p) => format!("proto {p}"),
    }
}

fn endpoints(tuple: &FlowTuple) -> (String, String) {
    let (sport, dport) = match tuple.l4 {
        L4Info::Tcp { sport, dport } | L4Info::Udp { sport, dport, .. } => {
            (Some(sport), Some(dport))
        }
        _ => (None, None),
    };

    let fmt = |addr: String, port: Option<u16>| match port {
        Some(p) => format!("{addr}:{p}"),
        None => addr,
    };

    match &tuple.l3 {
        L3Info::Ipv4(ip) => {
            (fmt(ip.src.to_string(), sport), fmt(ip.dst.to_string(), dport))
        }
        L3Info::Ipv6(ip) => (
            fmt(format!("[{}]", ip.src), sport),
            fmt(format!("[{}]", ip.dst), dport),
        ),
    }
}

/// Print the parsed view of each frame, or why it could not be parsed.
pub fn print_tuples_into(
    writer: &mut impl Write,
    frames: &[Vec<u8>],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "FRAME\tDMAC\tSMAC\tENCAP\tSRC\tDST\tL4\tDSCP")?;

    for (i, bytes) in frames.iter().enumerate() {
        match parse::parse(bytes) {
            Ok(tuple) => {
                let (src, dst) = endpoints(&tuple);
                writeln!(
                    t,
                    "{i}\t{}\t{}\t{}\t{src}\t{dst}\t{}\t{:#04x}",
                    tuple.dmac,
                    tuple.smac,
                    encap_str(&tuple),
                    l4_str(&tuple.l4),
                    tuple.dscp(),
                )?;
            }

            Err(e) => writeln!(t, "{i}\t{}", parse_err_str(e))?,
        }
    }

    t.flush()
}

fn parse_err_str(e: ParseError) -> String {
    format!("error: {e}")
}

/// Print what became of each replayed frame.
pub fn print_verdicts_into(
    writer: &mut impl Write,
    verdicts: &[Verdict],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "FRAME\tSLOT\tRESULT")?;

    for (i, v) in verdicts.iter().enumerate() {
        match v {
            Verdict::Bound(idx) => writeln!(t, "{i}\t{idx}\tbound")?,
            Verdict::PreBound(idx) => writeln!(t, "{i}\t{idx}\tprebound")?,
            Verdict::Rejected(why) => writeln!(t, "{i}\t-\t{why}")?,
        }
    }

    t.flush()
}

#[cfg(test)]
mod test {
    use super::*;
    use ppe::api::FoeState;
    use ppe_test_utils::FrameBuilder;
    use ppe_test_utils::GW_MAC;
    use ppe_test_utils::WAN_MAC;
    use ppe_test_utils::pcap::Capture;

    fn discard() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn capture_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("ppeadm-{}-{name}.pcap", std::process::id()))
    }

    fn capture(name: &str, frames: &[Vec<u8>]) -> std::path::PathBuf {
        let path = capture_path(name);
        let mut pcap = Capture::new();
        for f in frames {
            pcap.push(&Frame::new(f.clone()));
        }
        pcap.write(&path);
        path
    }

    fn frames() -> Vec<Vec<u8>> {
        let b = FrameBuilder::new(GW_MAC, WAN_MAC);
        vec![
            b.ipv4_tcp([10, 0, 0, 5], 51000, [93, 184, 216, 34], 443),
            b.clone().vlan(2).pppoe(7).ipv4_tcp([10, 0, 0, 5], 1, [1, 1, 1, 1], 2),
            b.ipv4_icmp([10, 0, 0, 5], [1, 1, 1, 1]),
            b.clone().fragment(true, 0).ipv4_tcp([10, 0, 0, 5], 1, [1, 1, 1, 1], 2),
            vec![0xFF; 10],
        ]
    }

    #[test]
    fn capture_round_trip() {
        let frames = frames();
        let path = capture("round-trip", &frames);
        let read = read_capture(&discard(), &path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read, frames);

        let mut out = Vec::new();
        print_tuples_into(&mut out, &read).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[1].contains("10.0.0.5:51000"));
        assert!(lines[1].contains("93.184.216.34:443"));
        assert!(lines[2].contains("vlan 2,pppoe 7"));
        assert!(lines[3].contains("proto 1"));
        assert!(lines[4].contains("error"));
        assert!(lines[5].contains("error"));
    }

    #[test]
    fn short_snap_length() {
        let frames = frames();
        let path = capture_path("snaplen");
        let mut pcap = Capture::with_snaplen(40);
        pcap.push_bytes(&frames[0]);
        pcap.push_bytes(&frames[4]);
        assert_eq!(pcap.len(), 2);
        pcap.write(&path);

        let read = read_capture(&discard(), &path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read, vec![frames[0][..40].to_vec(), frames[4].clone()]);

        let replay = Replay::new(&discard(), PpeConfig::default()).unwrap();
        assert_eq!(
            replay.run(&read[..1], Egress::Gmac1),
            vec![Verdict::Rejected(NotAccelerated::Parse(
                ParseError::Truncated
            ))]
        );
    }

    #[test]
    fn not_a_capture() {
        let path = std::env::temp_dir()
            .join(format!("ppeadm-{}-garbage.pcap", std::process::id()));
        std::fs::write(&path, b"definitely not pcap").unwrap();
        let res = read_capture(&discard(), &path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(res, Err(Error::Capture { .. })));

        let res = read_capture(&discard(), Path::new("/nonexistent/x.pcap"));
        assert!(matches!(res, Err(Error::Io { .. })));
    }

    #[test]
    fn replay_binds_what_it_can() {
        let replay = Replay::new(&discard(), PpeConfig::default()).unwrap();
        let verdicts = replay.run(&frames(), Egress::Gmac1);

        assert_eq!(
            verdicts,
            vec![
                Verdict::Bound(0),
                Verdict::Bound(1),
                Verdict::Rejected(NotAccelerated::Protocol(1)),
                Verdict::Rejected(NotAccelerated::Parse(ParseError::Fragment)),
                Verdict::Rejected(NotAccelerated::Parse(ParseError::Truncated)),
            ]
        );

        let dump = replay.engine().dump();
        assert_eq!(dump.entries.len(), 2);
        assert!(dump.entries.iter().all(|e| e.state == FoeState::Bind));
        assert_eq!(dump.entries[1].pppoe_id, 7);

        let mut out = Vec::new();
        print_verdicts_into(&mut out, &verdicts).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("bound"));
        assert!(out.contains("fragment"));
    }

    #[test]
    fn config_file() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("ppeadm-{}-good.toml", std::process::id()));
        std::fs::write(&good, "chip = \"mt7621\"\ndual_gmac = true\n").unwrap();
        let cfg = load_config(&good).unwrap();
        std::fs::remove_file(&good).unwrap();
        assert!(cfg.dual_gmac);

        let bad = dir.join(format!("ppeadm-{}-bad.toml", std::process::id()));
        std::fs::write(&bad, "lan_vid = 2\n").unwrap();
        let res = load_config(&bad);
        std::fs::remove_file(&bad).unwrap();
        assert!(matches!(res, Err(Error::Ppe(PpeError::BadConfig(_)))));

        // A first generation chip cannot drive the engine compiled in.
        let cfg = PpeConfig { chip: ppe::api::Chip::Rt3052, ..Default::default() };
        assert!(matches!(
            Replay::new(&discard(), cfg),
            Err(Error::Ppe(PpeError::BadConfig(_)))
        ));
    }
}
