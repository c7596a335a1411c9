//! Report files
//!
//! Per-run report files are written beside the guest executable with the
//! smallest run number that collides with no existing file. Dependency
//! graphs are dumped in VCG format with a depth cap and a deduplication
//! set to break cycles.

use crate::consts::{MAX_DUMPED_GRAPHS, MAX_ENTRIES_PER_FILE, MAX_LEVEL_OF_GRAPH};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::host::GuestHost;

use itertools::Itertools;
use shadowfp_ir::Addr;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const SUFFIXES: [&str; 8] = [
    "_shadow_values_relative_error_",
    "_shadow_values_canceled_",
    "_shadow_values_special_",
    "_mean_errors_addr_",
    "_mean_errors_canceled_",
    "_mean_errors_intro_",
    "_stage_reports_",
    "_pso.log_",
];

/// Where detected PSOs persist between program runs.
pub(crate) fn pso_persistence_path(object: &Path) -> PathBuf {
    PathBuf::from(format!("{}_detected_pso", object.display()))
}

fn run_number(base: &str) -> u32 {
    (1u32..)
        .find(|n| {
            SUFFIXES
                .iter()
                .all(|suffix| !Path::new(&format!("{base}{suffix}{n}")).exists())
        })
        .unwrap_or(1)
}

fn open_report(base: &str, suffix: &str, n: u32, description: &str) -> std::io::Result<(BufWriter<File>, PathBuf)> {
    let path = PathBuf::from(format!("{base}{suffix}{n}"));
    let mut file = BufWriter::new(File::create(&path)?);

    writeln!(file, "# shadowfp: {description}")?;
    writeln!(
        file,
        "# V128 shadowing is single-lane: low lane only, high lane must be zero"
    )?;

    Ok((file, path))
}

/// Write every report file for one finished run.
pub(crate) fn write_reports<H>(engine: &mut Engine<H>) -> Result<Vec<PathBuf>, EngineError>
where
    H: GuestHost,
{
    let base = engine.host().object_path().display().to_string();
    let n = run_number(&base);
    let mut paths = Vec::with_capacity(SUFFIXES.len());

    // Shadow values by relative error.
    {
        let (mut file, path) = open_report(
            &base,
            SUFFIXES[0],
            n,
            "memory shadow values sorted by relative error",
        )?;
        let ignore_accurate = engine.options().ignore_accurate;
        let rows = engine
            .store()
            .active_memory()
            .map(|(addr, sv)| (addr, sv.relative_error(), sv))
            .filter(|(_, rel, _)| !ignore_accurate || *rel > 0.0)
            .sorted_by(|a, b| b.1.total_cmp(&a.1))
            .take(MAX_ENTRIES_PER_FILE);
        for (addr, rel, sv) in rows {
            writeln!(
                file,
                "{addr:#x} rel {rel:.10e} shadow {} ops {} canceled {} origin {:#x}",
                sv.value().to_string_radix(10, Some(30)),
                sv.op_count(),
                sv.canceled(),
                sv.origin(),
            )?;
        }
        file.flush()?;
        paths.push(path);
    }

    // Shadow values by cancellation.
    {
        let (mut file, path) = open_report(
            &base,
            SUFFIXES[1],
            n,
            "memory shadow values sorted by canceled bits",
        )?;
        let rows = engine
            .store()
            .active_memory()
            .filter(|(_, sv)| sv.canceled() > 0)
            .sorted_by_key(|(_, sv)| std::cmp::Reverse(sv.canceled()))
            .take(MAX_ENTRIES_PER_FILE);
        for (addr, sv) in rows {
            writeln!(
                file,
                "{addr:#x} canceled {} at {:#x} rel {:.10e} origin {:#x}",
                sv.canceled(),
                sv.cancel_origin(),
                sv.relative_error(),
                sv.origin(),
            )?;
        }
        file.flush()?;
        paths.push(path);
    }

    // Shadow values holding special values.
    {
        let (mut file, path) = open_report(
            &base,
            SUFFIXES[2],
            n,
            "memory shadow values involving non-finite results",
        )?;
        let rows = engine
            .store()
            .active_memory()
            .filter(|(_, sv)| {
                let org_special = sv.org().to_f64().is_some_and(|v| !v.is_finite());
                org_special || !sv.value().is_finite()
            })
            .take(MAX_ENTRIES_PER_FILE);
        for (addr, sv) in rows {
            let original = sv
                .org()
                .to_f64()
                .map(|v| format!("{v:e}"))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                file,
                "{addr:#x} original {original} shadow {} origin {:#x}",
                sv.value().to_string_radix(10, Some(30)),
                sv.origin(),
            )?;
        }
        file.flush()?;
        paths.push(path);
    }

    // Mean errors by origin.
    {
        let (mut file, path) = open_report(
            &base,
            SUFFIXES[3],
            n,
            "per-origin relative error, sorted by maximum",
        )?;
        let rows = engine
            .mean_values()
            .iter()
            .sorted_by(|a, b| b.1.err_max.total_cmp(&a.1.err_max))
            .take(MAX_ENTRIES_PER_FILE);
        for (origin, entry) in rows {
            let location = engine
                .host()
                .describe_origin(origin)
                .unwrap_or_else(|| "?".to_string());
            writeln!(
                file,
                "{origin:#x} count {} mean {:.10e} max {:.10e} operands {:#x} {:#x} ({location})",
                entry.count,
                entry.mean(),
                entry.err_max,
                entry.arg1_origin,
                entry.arg2_origin,
            )?;
        }
        file.flush()?;
        paths.push(path);
    }

    // Mean errors by cancellation.
    {
        let (mut file, path) = open_report(
            &base,
            SUFFIXES[4],
            n,
            "per-origin cancellation, sorted by maximum",
        )?;
        let rows = engine
            .mean_values()
            .iter()
            .filter(|(_, entry)| entry.canceled_max > 0)
            .sorted_by_key(|(_, entry)| std::cmp::Reverse(entry.canceled_max))
            .take(MAX_ENTRIES_PER_FILE);
        for (origin, entry) in rows {
            writeln!(
                file,
                "{origin:#x} count {} canceled max {} sum {}{} badness max {} sum {}",
                entry.count,
                entry.canceled_max,
                entry.canceled_sum,
                if entry.canceled_overflow {
                    " (overflowed)"
                } else {
                    ""
                },
                entry.badness_max,
                entry.badness_sum,
            )?;
        }
        file.flush()?;
        paths.push(path);
    }

    // Introduced error.
    {
        let (mut file, path) = open_report(
            &base,
            SUFFIXES[5],
            n,
            "error introduced per origin (max residual over max-path parents)",
        )?;
        let mut rows = Vec::with_capacity(engine.mean_values().len());
        for (origin, _) in engine.mean_values().iter() {
            let introduced = engine.mean_values().introduced_error(origin)?;
            rows.push((origin, introduced));
        }
        rows.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (origin, introduced) in rows.into_iter().take(MAX_ENTRIES_PER_FILE) {
            writeln!(file, "{origin:#x} introduced {introduced:.10e}")?;
        }
        file.flush()?;
        paths.push(path);
    }

    // Stage reports.
    {
        let (mut file, path) = open_report(&base, SUFFIXES[6], n, "stage divergence reports")?;
        for ((stage, addr), report) in engine.stages().reports().take(MAX_ENTRIES_PER_FILE) {
            writeln!(
                file,
                "stage {stage} {addr:#x} count {} iterations {}..{} limit {:.10e} value {:e}",
                report.count, report.iter_min, report.iter_max, report.limit, report.value,
            )?;
        }
        file.flush()?;
        paths.push(path);
    }

    // PSO log.
    {
        let (mut file, path) = open_report(&base, SUFFIXES[7], n, "precision-specific operations")?;
        writeln!(
            file,
            "runs {} finished {}",
            engine.pso().runs(),
            engine.pso().is_finished(),
        )?;
        for (origin, entry) in engine.pso().detected().take(MAX_ENTRIES_PER_FILE) {
            writeln!(
                file,
                "{origin:#x}{}",
                if entry.false_positive {
                    " (false positive)"
                } else {
                    ""
                },
            )?;
        }
        for (origin, count) in engine.branches().iter() {
            writeln!(file, "branch divergence {origin:#x} hits {count}")?;
        }
        file.flush()?;
        paths.push(path);
    }

    Ok(paths)
}

/// Dump the dependency graph of the shadow value at `addr` as a VCG file
/// named `<base>_<k>_<i>.vcg`.
pub(crate) fn dump_error_graph<H>(
    engine: &mut Engine<H>,
    base: &str,
    addr: Addr,
) -> Result<Option<PathBuf>, EngineError>
where
    H: GuestHost,
{
    let Some(root) = engine.store().get_mem(addr).map(|sv| sv.origin()) else {
        return Ok(None);
    };
    if !engine.note_graph_dump() {
        tracing::warn!(
            limit = MAX_DUMPED_GRAPHS,
            "graph dump limit reached; skipping"
        );
        return Ok(None);
    }

    let i = engine.graphs_dumped();
    let path = (1u32..)
        .map(|k| PathBuf::from(format!("{base}_{k}_{i}.vcg")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| PathBuf::from(format!("{base}_1_{i}.vcg")));

    let mut file = BufWriter::new(File::create(&path)?);
    writeln!(file, "graph: {{")?;
    writeln!(file, "title: \"error graph for {addr:#x}\"")?;

    // Breadth-first over max-path parents; a dedicated set breaks cycles,
    // the per-entry visited flag stops re-expansion across graphs of the
    // same report.
    let mut seen: HashSet<Addr> = HashSet::new();
    let mut frontier = vec![root];
    let mut entries = 2usize;

    for _ in 0..MAX_LEVEL_OF_GRAPH {
        let mut next = Vec::new();

        for origin in frontier {
            if origin == 0 || !seen.insert(origin) {
                continue;
            }
            if entries >= MAX_ENTRIES_PER_FILE {
                break;
            }

            let Some(entry) = engine.mean_values().get(origin) else {
                writeln!(file, "node: {{ title: \"{origin:#x}\" label: \"{origin:#x}\" }}")?;
                entries += 1;
                continue;
            };

            let location = engine
                .host()
                .describe_origin(origin)
                .unwrap_or_else(|| "?".to_string());
            writeln!(
                file,
                "node: {{ title: \"{origin:#x}\" label: \"{origin:#x}\\n{location}\\ncount {}\\nmax {:.4e}\\ncanceled {}\" }}",
                entry.count, entry.err_max, entry.canceled_max,
            )?;
            entries += 1;

            let expanded = entry.visited;
            let parents = (entry.arg1_origin, entry.arg2_origin);
            for parent in [parents.0, parents.1] {
                if parent == 0 || parent == origin {
                    continue;
                }
                writeln!(
                    file,
                    "edge: {{ sourcename: \"{origin:#x}\" targetname: \"{parent:#x}\" }}"
                )?;
                entries += 1;
                if !expanded {
                    next.push(parent);
                }
            }

            if let Some(entry) = engine.mean_values_mut().get_mut(origin) {
                entry.visited = true;
            }
        }

        if next.is_empty() || entries >= MAX_ENTRIES_PER_FILE {
            break;
        }
        frontier = next;
    }

    writeln!(file, "}}")?;
    file.flush()?;

    Ok(Some(path))
}
