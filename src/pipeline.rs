//! The response pipeline: validates, splices, filters, and inserts the
//! candidates returned by a `find-node` reply.

use std::cmp::Ordering;

use tracing::debug;

use crate::address::{closest, Address, Target};
use crate::collaborators::Environment;
use crate::consts::ADDRESS_SERIALIZED_SIZE;
use crate::error::PipelineDrop;
use crate::frontier::Frontier;
use crate::version_list;
use crate::wire::FindNodeReply;

/// A record-by-record account of what a reply did, useful to tests and to
/// `tracing` spans alike.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// `true` if `from` was the node most recently asked (in-order reply);
    /// `false` for a late reply, which still runs every side effect below
    /// except extending the frontier.
    pub in_order: bool,
    /// Number of records accepted into the frontier.
    pub accepted: u32,
    /// Every record-level drop, in record order.
    pub dropped: Vec<PipelineDrop>,
}

/// Runs the response pipeline over one reply. Never panics on attacker
/// input: every failure is absorbed into `report.dropped` and logged at
/// `debug`/`warn`.
pub fn ingest<E: Environment>(
    env: &E,
    my_address: &Target,
    search_target: &Target,
    from: &Address,
    last_asked: &Address,
    reply: &FindNodeReply,
    frontier: &mut Frontier,
) -> PipelineReport {
    let mut report = PipelineReport {
        in_order: from.path == last_asked.path,
        ..Default::default()
    };

    if reply.n.is_empty() || reply.n.len() % ADDRESS_SERIALIZED_SIZE != 0 {
        debug!("dropping unrecognized reply: bad n length {}", reply.n.len());
        report.dropped.push(PipelineDrop::MalformedReply);
        return report;
    }

    let record_count = reply.n.len() / ADDRESS_SERIALIZED_SIZE;
    let versions = match version_list::parse(&reply.np) {
        Some(v) if v.len() == record_count => v,
        _ => {
            debug!("dropping reply with missing or invalid versions");
            report.dropped.push(PipelineDrop::MalformedReply);
            return report;
        }
    };

    #[cfg_attr(not(feature = "version1-compat"), allow(unused_mut))]
    let mut versions = versions;
    #[cfg(feature = "version1-compat")]
    if from.version < 2 {
        // Version 1 lies about the versions of the nodes it returns.
        versions.iter_mut().for_each(|v| *v = 1);
    }

    'records: for i in 0..record_count {
        let record = &reply.n[i * ADDRESS_SERIALIZED_SIZE..(i + 1) * ADDRESS_SERIALIZED_SIZE];

        let (path, key) = match env.parse_record(record) {
            Some(parsed) => parsed,
            None => {
                debug!("was told garbage (unparseable record)");
                report.dropped.push(PipelineDrop::GarbageAddress);
                break 'records;
            }
        };

        // Step 1: intra-reply dedup — only the last occurrence of a key
        // within this reply is processed.
        let is_duplicate = ((i + 1)..record_count).any(|j| {
            let other = &reply.n[j * ADDRESS_SERIALIZED_SIZE..(j + 1) * ADDRESS_SERIALIZED_SIZE];
            env.parse_record(other).map(|(_, k)| k) == Some(key)
        });
        if is_duplicate {
            continue 'records;
        }

        // Step 2-3: assign version, derive prefix.
        let mut addr = Address {
            ip6: env.derive_prefix(&key),
            key,
            path,
            version: versions[i],
        };

        // Step 4: route splice.
        let spliced = match env.splice(addr.path, from.path) {
            Some(p) => p,
            None => {
                debug!("dropping node because route could not be spliced");
                report.dropped.push(PipelineDrop::UnsplicableRoute);
                continue 'records;
            }
        };
        addr.path = spliced;

        // Step 5: loop detect.
        if &addr.ip6 == my_address {
            debug!("detected a loop-route");
            env.broken_path(addr.path);
            report.dropped.push(PipelineDrop::LoopRoute);
            continue 'records;
        }

        // Step 6: address sanity; a failure abandons the rest of the reply.
        addr.ip6 = env.derive_prefix(&addr.key);
        if !env.is_valid_prefix(&addr.ip6) {
            debug!("was told garbage (invalid address)");
            report.dropped.push(PipelineDrop::GarbageAddress);
            break 'records;
        }

        // Step 7: rumor intake.
        match env.best_for_path(&addr) {
            Some(known) if known.same_key(&addr) => {}
            _ => env.add_rumor(addr),
        }

        // Step 8: progress filter — too much noise if not strictly closer.
        if closest(search_target, &addr, from) != Ordering::Less {
            report.dropped.push(PipelineDrop::NotCloser);
            continue 'records;
        }

        // Step 9: late reply guard — side effects above still ran, but a
        // late reply never extends the frontier.
        if !report.in_order {
            continue 'records;
        }

        // Step 10: canonicalize to the node store's better-known address,
        // if any, then add to the frontier.
        let to_add = env.best_for_path(&addr).unwrap_or(addr);
        frontier.add(to_add);
        report.accepted += 1;
    }

    report
}
