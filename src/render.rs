//! Plain-text rendering of a ping log snapshot.

use std::fmt::Write;

use crate::types::{Observation, PingSnapshot};

const HUMAN_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z %Z";

/// One block per address: the address, then one tab-indented line per
/// observation with fractional epoch seconds and a readable timestamp,
/// then a blank line.
pub fn render_text(snapshot: &PingSnapshot) -> String {
    let mut out = String::new();
    for (address, history) in &snapshot.pings {
        let _ = writeln!(out, "{}:", address);
        for observation in history {
            let _ = writeln!(
                out,
                "\t{:.6} {}",
                epoch_seconds(observation),
                observation.format(HUMAN_FORMAT)
            );
        }
        out.push('\n');
    }
    out
}

pub fn epoch_seconds(observation: &Observation) -> f64 {
    observation.timestamp() as f64 + f64::from(observation.timestamp_subsec_nanos()) * 1e-9
}
