// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print engine state in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both ppeadm and integration tests.

use crate::api::DumpFoeResp;
use crate::api::FoeEntryDump;
use crate::api::TableSize;
use crate::api::table_bytes;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`DumpFoeResp`].
pub fn print_foe(resp: &DumpFoeResp) -> std::io::Result<()> {
    print_foe_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpFoeResp`].
pub fn print_foe_into(
    writer: &mut impl Write,
    resp: &DumpFoeResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(
        t,
        "Flow Table ({} slots of {} bytes)",
        resp.num_slots, resp.entry_size
    )?;
    write_hrb(&mut t)?;
    writeln!(t, "Bound Entries")?;
    write_hr(&mut t)?;
    print_foe_header(&mut t)?;
    for entry in &resp.entries {
        print_foe_entry(&mut t, entry)?;
    }
    writeln!(t)?;
    t.flush()
}

fn print_foe_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(
        t,
        "IDX\tSTATE\tKIND\tORIG\tNEW\tDMAC\tVLAN1\tVLAN2\tPPPOE\tFP\tDP\tTS"
    )
}

fn print_foe_entry(
    t: &mut impl Write,
    e: &FoeEntryDump,
) -> std::io::Result<()> {
    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        e.index,
        e.state,
        e.kind,
        e.orig,
        e.new,
        e.dmac,
        e.vlan1,
        e.vlan2,
        e.pppoe_id,
        e.fpidx,
        e.act_dp,
        e.ts,
    )
}

/// Print the memory needed by each supported table size.
pub fn print_sizes_into(writer: &mut impl Write) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "SLOTS\tSLOT BYTES\tTABLE BYTES")?;
    write_hr(&mut t)?;
    for size in TableSize::ALL {
        writeln!(
            t,
            "{}\t{}\t{}",
            size.entries(),
            crate::api::FOE_ENTRY_SIZE,
            table_bytes(size)
        )?;
    }
    t.flush()
}

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
