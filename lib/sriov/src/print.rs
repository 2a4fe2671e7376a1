// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print command responses in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both administrative tools and integration tests.

use crate::api::ListVfsResp;
use crate::api::SriovStatsSnap;
use crate::api::VfConfigSnapshot;
use std::io::Write;
use std::string::String;
use std::string::ToString;
use tabwriter::TabWriter;

/// Print a [`ListVfsResp`].
pub fn print_vfs(resp: &ListVfsResp) -> std::io::Result<()> {
    print_vfs_into(&mut std::io::stdout(), resp)
}

/// Print a [`ListVfsResp`] into a given writer.
pub fn print_vfs_into(
    writer: &mut impl Write,
    resp: &ListVfsResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    print_vf_header(&mut t)?;
    for vf in &resp.vfs {
        print_vf(&mut t, vf)?;
    }
    t.flush()
}

fn print_vf_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(
        t,
        "VF\tMAC\tVLAN\tQOS\tTX RATE\tLINK\tSPOOFCHK\tTRUST\tRSS QUERY"
    )
}

fn print_vf(
    t: &mut impl Write,
    vf: &VfConfigSnapshot,
) -> std::io::Result<()> {
    let vlan =
        if vf.vlan == 0 { "-".to_string() } else { vf.vlan.to_string() };
    let rate = if vf.max_tx_rate == 0 {
        "-".to_string()
    } else {
        format!("{} Mbps", vf.max_tx_rate)
    };

    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        vf.vf,
        vf.mac,
        vlan,
        vf.qos,
        rate,
        vf.link_state,
        on_off(vf.spoofchk),
        on_off(vf.trusted),
        on_off(vf.rss_query_en),
    )
}

fn on_off(b: bool) -> String {
    if b { "on" } else { "off" }.to_string()
}

/// Print a [`SriovStatsSnap`].
pub fn print_stats(stats: &SriovStatsSnap) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), stats)
}

/// Print a [`SriovStatsSnap`] into a given writer.
pub fn print_stats_into(
    writer: &mut impl Write,
    stats: &SriovStatsSnap,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "Mailbox")?;
    write_hr(&mut t)?;
    writeln!(t, "received\t{}", stats.msgs_rx)?;
    writeln!(t, "failed\t{}", stats.msgs_failed)?;
    writeln!(t, "replayed\t{}", stats.msgs_replayed)?;
    writeln!(t, "not clear to send\t{}", stats.msgs_not_cts)?;
    writeln!(t, "unknown opcode\t{}", stats.msgs_unknown)?;
    t.flush()?;

    writeln!(t, "\nVF events")?;
    write_hr(&mut t)?;
    writeln!(t, "resets\t{}", stats.vf_resets)?;
    writeln!(t, "FLRs\t{}", stats.vf_flrs)?;
    writeln!(t, "MDD events\t{}", stats.mdd_events)?;
    t.flush()
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::LinkState;
    use crate::api::MacAddr;
    use crate::api::VfIndex;

    #[test]
    fn vf_table_columns() {
        let resp = ListVfsResp {
            vfs: vec![VfConfigSnapshot {
                vf: VfIndex::new(2),
                mac: MacAddr::from([0x02, 0, 0, 0, 0, 0x2A]),
                vlan: 100,
                qos: 3,
                max_tx_rate: 2000,
                link_state: LinkState::Auto,
                spoofchk: true,
                trusted: false,
                rss_query_en: false,
            }],
        };

        let mut out = Vec::new();
        print_vfs_into(&mut out, &resp).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("VF"));

        let cols: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(
            cols,
            [
                "2",
                "02:00:00:00:00:2A",
                "100",
                "3",
                "2000",
                "Mbps",
                "auto",
                "on",
                "off",
                "off"
            ]
        );
    }

    #[test]
    fn stats_rows() {
        let stats = SriovStatsSnap {
            msgs_rx: 7,
            vf_resets: 2,
            ..Default::default()
        };
        let mut out = Vec::new();
        print_stats_into(&mut out, &stats).unwrap();
        let out = String::from_utf8(out).unwrap();
        let row = |name: &str| {
            out.lines()
                .find(|l| l.starts_with(name))
                .map(|l| l.split_whitespace().last().unwrap_or("").to_string())
        };
        assert_eq!(row("received").as_deref(), Some("7"));
        assert_eq!(row("resets").as_deref(), Some("2"));
        assert_eq!(row("MDD").as_deref(), Some("0"));
    }
}
