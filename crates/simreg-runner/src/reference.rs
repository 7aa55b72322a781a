//! Reference result files
//!
//! A reference file is plain text, one `key=value` entry per line:
//!
//! ```text
//! last-generated=2024-03-01
//! statistics-simulation=
//! {
//!   "linear": "2",
//!   "nonlinear": "1, 4"
//! }
//! time=[0e+00, 1e+01]
//! tank.T=[2.9315e+02, 2.9316e+02, ...]
//! ```
//!
//! Statistics blocks are pretty-printed JSON and may span several lines.
//! Files are only ever replaced whole.

use crate::error::{Error, Result};
use crate::result::SeriesBundle;
use crate::statistics::{Phase, PhaseStatistics, StatisticsRecord};
use std::collections::HashSet;
use std::fmt::Write;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Location of reference files below the library root
pub const REFERENCE_SUBDIR: &str = "Resources/ReferenceResults/Dymola";

const STATISTICS_PREFIX: &str = "statistics-";

/// Parsed content of a reference file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceDocument {
    /// Date from the `last-generated` header, if present
    pub last_generated: Option<String>,
    /// Statistics per phase; `translated` is not stored and reads as false
    pub statistics: StatisticsRecord,
    /// Stored series in file order, `time` included
    pub results: Vec<(String, Vec<f64>)>,
}

impl ReferenceDocument {
    /// Values stored for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.results
            .iter()
            .find_map(|(k, v)| (k == name).then_some(v.as_slice()))
    }

    /// Stored time vector
    #[must_use]
    pub fn time(&self) -> Option<&[f64]> {
        self.get("time")
    }

    /// True if the file holds at least one series
    #[must_use]
    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }
}

/// Directory holding the reference files of a library
#[must_use]
pub fn reference_dir(library_root: &Path) -> PathBuf {
    library_root.join(REFERENCE_SUBDIR)
}

/// Reference file name for a script, e.g. `Lib_Fluid_Examples_Tank.txt`
#[must_use]
pub fn reference_file_name(library: &str, script: &str) -> String {
    let joined = format!("{library}/{script}").replace(['/', '\\'], "_");
    let stem = joined.strip_suffix(".mos").unwrap_or(&joined);
    format!("{stem}.txt")
}

/// Format a number with 15 significant decimals, dropping trailing mantissa zeros
///
/// `1.0` becomes `1e+00`, `0.25` becomes `2.5e-01`.
#[must_use]
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let raw = scientific(value, 15);
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "+00"));
    let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{mantissa}e{exponent}")
}

/// Scientific notation with a signed, at least two-digit exponent: `1.500e-03`
#[must_use]
pub fn scientific(value: f64, precision: usize) -> String {
    let raw = format!("{value:.precision$e}");
    let Some((mantissa, exponent)) = raw.split_once('e') else {
        return raw;
    };
    let exp: i32 = exponent.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

fn format_series(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format_float(*v)).collect();
    format!("[{}]", items.join(", "))
}

/// Render a reference file
///
/// Variables that appear in several groups are written once.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if a statistics block cannot be encoded.
pub fn render(date: &str, bundles: &[SeriesBundle], statistics: &StatisticsRecord) -> Result<String> {
    let mut blocks = Vec::new();
    for phase in Phase::ALL {
        if let Some(stats) = statistics.phase(phase) {
            blocks.push((phase, serde_json::to_string_pretty(stats)?));
        }
    }
    let mut out = String::new();
    write_reference(&mut out, date, &blocks, bundles)?;
    Ok(out)
}

fn write_reference(
    out: &mut impl Write,
    date: &str,
    blocks: &[(Phase, String)],
    bundles: &[SeriesBundle],
) -> std::fmt::Result {
    writeln!(out, "last-generated={date}")?;
    for (phase, json) in blocks {
        writeln!(out, "{STATISTICS_PREFIX}{phase}=\n{json}")?;
    }
    let mut seen = HashSet::new();
    for bundle in bundles {
        if seen.insert("time") {
            writeln!(out, "time={}", format_series(&bundle.time))?;
        }
        for (name, values) in &bundle.series {
            if seen.insert(name.as_str()) {
                writeln!(out, "{name}={}", format_series(values))?;
            }
        }
    }
    Ok(())
}

/// Write a reference file, replacing any previous content atomically
///
/// # Errors
///
/// Returns [`Error::Io`] if the temporary file cannot be written or renamed.
pub fn write(path: &Path, bundles: &[SeriesBundle], statistics: &StatisticsRecord) -> Result<()> {
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    let content = render(&date, bundles, statistics)?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    tracing::debug!(path = %path.display(), "wrote reference file");
    Ok(())
}

/// Read a reference file
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read and [`Error::Parse`] if a
/// line is not a `key=value` pair, a number cannot be parsed or a statistics
/// block is malformed.
pub fn read(path: &Path) -> Result<ReferenceDocument> {
    let content = std::fs::read_to_string(path)?;
    parse(path, content.trim_start_matches('\u{feff}'))
}

/// Parse the content of a reference file; `path` is used for error messages
///
/// # Errors
///
/// See [`read`].
pub fn parse(path: &Path, content: &str) -> Result<ReferenceDocument> {
    let lines: Vec<&str> = content.lines().collect();
    let mut doc = ReferenceDocument::default();

    let mut start = 0;
    for line in lines.iter().take(2) {
        if line.contains("svn-id") {
            start += 1;
        }
        if line.contains("last-generated") {
            start += 1;
            doc.last_generated = line.split_once('=').map(|(_, d)| d.trim().to_string());
        }
    }

    let mut i = start;
    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::parse(path, format!("line {i} could not be parsed: '{line}'")));
        };

        if let Some(stage) = key.strip_prefix(STATISTICS_PREFIX) {
            let mut block = value.trim().to_string();
            while i < lines.len() && !lines[i].contains('=') {
                block.push_str(lines[i].trim());
                i += 1;
            }
            let phase = match stage {
                "initialization" => Phase::Initialization,
                "simulation" => Phase::Simulation,
                other => {
                    tracing::debug!(stage = other, "ignoring statistics block");
                    continue;
                }
            };
            let stats = PhaseStatistics::from_block(&block).map_err(|e| {
                Error::parse(path, format!("statistics for {phase} could not be parsed: {e}"))
            })?;
            *doc.statistics.phase_mut(phase) = Some(stats);
        } else {
            let values = parse_series(value)
                .map_err(|reason| Error::parse(path, format!("line {i}: {reason}")))?;
            doc.results.push((key.to_string(), values));
        }
    }
    Ok(doc)
}

fn parse_series(value: &str) -> std::result::Result<Vec<f64>, String> {
    let inner = match (value.find('['), value.rfind(']')) {
        (Some(a), Some(b)) if a < b => &value[a + 1..b],
        _ => value,
    };
    inner
        .split(',')
        .map(|n| {
            let n = n.trim();
            n.parse::<f64>()
                .map_err(|_| format!("'{n}' is not a number"))
        })
        .collect()
}
