//! Test catalog
//!
//! Scans the `.mos` scripts of a model library and builds one [`TestRecord`]
//! per script. Every record carries its [`ScriptMapping`], the single place
//! where the script path, the model file and the reference file name are
//! related to each other.

use crate::config::{ExperimentSettings, RunnerConfig, load_experiment_settings};
use crate::error::{Error, Result};
use crate::reference::reference_file_name;
use crate::reporter::Reporter;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

/// Script directory below the library root
pub const SCRIPT_SUBDIR: &str = "Resources/Scripts/Dymola";

/// Longest accepted script path, relative to the script directory
pub const MAX_SCRIPT_PATH_LEN: usize = 130;

static SIMULATE_MODEL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r#"simulateModel\(\s*"([^"]*)""#).unwrap()
});

static PLOT_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"y\s*=\s*\{.*\}").unwrap()
});

static PLOT_GROUP_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"y\s*=\s*\{").unwrap()
});

static BRACES: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\{.*?\}").unwrap()
});

static COMMA_SPACING: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r",\W*").unwrap()
});

static PLOT_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r#"filename="([a-zA-Z0-9_.]+)"#).unwrap()
});

static TOLERANCE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"Tolerance\s*=\s*(-?\ *[0-9]+\.?[0-9]*(?:[Ee]\ *-?\ *[0-9]+)?)").unwrap()
});

/// Relation between a test script, its model file and its reference file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMapping {
    /// Script path relative to [`SCRIPT_SUBDIR`], `/`-separated
    pub script: String,
    /// Model file relative to the parent of the library root
    pub model_file: PathBuf,
    /// Reference file name inside the reference directory
    pub reference_file: String,
}

/// One regression test
#[derive(Debug, Clone, PartialEq)]
pub struct TestRecord {
    /// Fully qualified model name
    pub model_name: String,
    /// Script, model and reference locations
    pub mapping: ScriptMapping,
    /// The script calls `simulateModel`
    pub must_simulate: bool,
    /// The script calls `translateModelFMU`
    pub must_export_fmu: bool,
    /// Start time of the simulation
    pub start_time: f64,
    /// Stop time of the simulation
    pub stop_time: f64,
    /// Variables plotted together, without duplicate groups
    pub plot_groups: Vec<Vec<String>>,
    /// Result file written by the simulator
    pub result_file: Option<String>,
    /// FMU written by the simulator
    pub fmu_name: Option<String>,
    /// Settings from `conf.json`
    pub settings: ExperimentSettings,
}

impl TestRecord {
    /// Script path relative to the script directory
    #[must_use]
    pub fn script(&self) -> &str {
        &self.mapping.script
    }

    /// The simulator has to run this test
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        self.must_simulate || self.must_export_fmu
    }

    /// Results of this test are compared against the reference
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.must_simulate && self.settings.translate && self.settings.simulate
    }

    /// Translation log written by the driver script
    #[must_use]
    pub fn translation_log(&self) -> String {
        format!("{}.translation.log", self.model_name)
    }

    /// Result file the simulator writes before conversion to [`Self::result_file`]
    #[must_use]
    pub fn mat_file(&self) -> String {
        format!("{}.mat", self.model_name)
    }

    /// `time` followed by every plotted variable, each once
    #[must_use]
    pub fn result_variables(&self) -> Vec<&str> {
        let mut variables = vec!["time"];
        for v in self.plot_groups.iter().flatten() {
            if !variables.contains(&v.as_str()) {
                variables.push(v);
            }
        }
        variables
    }
}

/// Options that shape the catalog
#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    /// Tool name for `conf.json` lookups
    pub tool: String,
    /// Parse `translateModelFMU` directives
    pub fmu_tests: bool,
    /// Restrict the catalog to these packages
    pub packages: Option<String>,
    /// File listing scripts to exclude
    pub exclude_file: Option<PathBuf>,
}

impl CatalogOptions {
    /// Options taken from a runner configuration
    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            tool: config.tool.clone(),
            fmu_tests: config.fmu_tests,
            packages: config.single_package.clone(),
            exclude_file: config.exclude_file.clone(),
        }
    }
}

/// All tests of a library
#[derive(Debug, Clone)]
pub struct TestCatalog {
    library: String,
    library_root: PathBuf,
    records: Vec<TestRecord>,
}

impl TestCatalog {
    /// Scan the scripts of the library at `library_root`
    ///
    /// Every problem found while scanning is reported. Problems that make a
    /// run unsafe abort the build.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] if no test is found, two tests write the
    /// same result file or FMU, a simulating script has no or a malformed plot
    /// command, a script path is too long, or a requested package does not
    /// exist.
    pub fn build(library_root: &Path, options: &CatalogOptions, reporter: &Reporter) -> Result<Self> {
        let library = library_name(library_root)?;
        let script_root = library_root.join(SCRIPT_SUBDIR);

        let roots = match &options.packages {
            Some(packages) => select_packages(&script_root, packages, reporter)?,
            None => vec![script_root.clone()],
        };
        let excluded = match &options.exclude_file {
            Some(path) => read_exclusions(path, &library, reporter)?,
            None => HashSet::new(),
        };
        let settings = load_experiment_settings(library_root, &options.tool)?;

        let mut problems = Vec::new();
        let mut records = Vec::new();
        for root in &roots {
            for entry in WalkDir::new(root).sort_by_file_name() {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy();
                if !entry.file_type().is_file()
                    || !name.ends_with(".mos")
                    || name.starts_with(&format!("Convert{library}"))
                {
                    continue;
                }
                let script = relative_script(&script_root, entry.path())?;
                if excluded.contains(&script) {
                    reporter.output(format!("Excluded file {script} from the regression tests."));
                    continue;
                }
                if script.len() > MAX_SCRIPT_PATH_LEN {
                    problems.push(format!(
                        "File {script} is {}-character long. Reduce it to maximum of {MAX_SCRIPT_PATH_LEN} characters.",
                        script.len()
                    ));
                }
                let content = std::fs::read_to_string(entry.path())?;
                let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
                match parse_script(&library, &script, content, options.fmu_tests) {
                    Ok(record) => records.push(record),
                    Err(Error::Catalog(msg)) => problems.push(msg),
                    Err(e) => return Err(e),
                }
            }
        }

        for record in &mut records {
            if let Some(s) = settings.get(&record.model_name) {
                record.settings = s.clone();
            }
            if let Some(msg) = record.settings.exclusion_message(&record.model_name) {
                reporter.output(msg);
            }
            if !record.settings.simulate {
                record.plot_groups.clear();
            }
            if record.must_simulate {
                if let Err(e) = tolerance_of(library_root, &record.model_name) {
                    reporter.error(e.to_string());
                }
            }
        }

        resolve_plot_only_artifacts(&mut records);

        if !records.iter().any(TestRecord::is_executable) {
            problems.push(format!(
                "Did not find any regression tests in '{}'.",
                script_root.display()
            ));
        }
        problems.extend(duplicate_artifacts(&records));

        if !problems.is_empty() {
            for p in &problems {
                reporter.error(p);
            }
            return Err(Error::Catalog(problems.join("\n")));
        }

        tracing::info!(library = %library, tests = records.len(), "built test catalog");
        Ok(Self {
            library,
            library_root: library_root.to_path_buf(),
            records,
        })
    }

    /// Library name, e.g. `Buildings`
    #[must_use]
    pub fn library(&self) -> &str {
        &self.library
    }

    /// Library root directory
    #[must_use]
    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Every record, in script order
    #[must_use]
    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    /// Records the simulator has to run
    #[must_use]
    pub fn executable(&self) -> Vec<&TestRecord> {
        self.records.iter().filter(|r| r.is_executable()).collect()
    }

    /// Record of a script
    #[must_use]
    pub fn by_script(&self, script: &str) -> Option<&TestRecord> {
        self.records.iter().find(|r| r.mapping.script == script)
    }
}

/// Name of the library, the last component of its root directory
fn library_name(library_root: &Path) -> Result<String> {
    library_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidLibrary(library_root.display().to_string()))
}

fn relative_script(script_root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(script_root)
        .map_err(|_| Error::Catalog(format!("{} is outside {}", path.display(), script_root.display())))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Parse one script
///
/// `script` is the path relative to the script directory. Spaces are removed
/// from every line before the directives are matched.
///
/// # Errors
///
/// Returns [`Error::Catalog`] for a malformed plot line, a simulating script
/// without plot command, or an FMU export without `modelToOpen`.
pub fn parse_script(library: &str, script: &str, content: &str, fmu_tests: bool) -> Result<TestRecord> {
    let lines: Vec<String> = content.lines().map(|l| l.replace(' ', "")).collect();

    let mut model_name: Option<String> = None;
    let mut start_time = None;
    let mut stop_time = None;
    let mut must_export_fmu = false;
    let mut model_to_open = None;
    let mut fmu_model_name = None;

    for line in &lines {
        if let Some(caps) = SIMULATE_MODEL.captures(line) {
            model_name = Some(caps[1].to_string());
        }
        if model_name.is_some() {
            if let Some(v) = attribute_value(line, "startTime") {
                start_time = Some(parse_time(script, "startTime", &v)?);
            }
            if let Some(v) = attribute_value(line, "stopTime") {
                stop_time = Some(parse_time(script, "stopTime", &v)?);
            }
        }
        if fmu_tests && line.contains("translateModelFMU") {
            must_export_fmu = true;
        }
        if must_export_fmu {
            if let Some(v) = attribute_value(line, "modelToOpen") {
                model_to_open = Some(v);
            }
            if let Some(v) = attribute_value(line, "modelName") {
                fmu_model_name = Some(v);
            }
        }
    }

    let must_simulate = model_name.is_some();
    let mut fmu_name = None;
    if must_export_fmu {
        let open = model_to_open
            .ok_or_else(|| Error::Catalog(format!("{script}: translateModelFMU without modelToOpen.")))?;
        let name = fmu_model_name.filter(|n| !n.is_empty()).unwrap_or(open);
        fmu_name = Some(fmu_file_name(&name));
        if model_name.is_none() {
            model_name = Some(name);
        }
    }

    let mut plot_groups: Vec<Vec<String>> = Vec::new();
    if must_simulate {
        for (i, line) in lines.iter().enumerate() {
            let group = plot_variables(line).map_err(|_| {
                Error::Catalog(format!(
                    "{script}, line {}, could not be parsed.\n\
                     The problem occurred at the line below:\n{line}\n\
                     Make sure that each assignment of the plot command is on one line.",
                    i + 1
                ))
            })?;
            if let Some(group) = group {
                if !plot_groups.contains(&group) {
                    plot_groups.push(group);
                }
            }
        }
        if plot_groups.is_empty() {
            return Err(Error::Catalog(format!(
                "{script} does not contain any plot command.\n\
                 You need to add a plot command to include its\n\
                 results in the regression tests."
            )));
        }
    }

    let model_name = model_name.unwrap_or_default();
    let result_file = if must_simulate {
        Some(format!("{model_name}.csv"))
    } else {
        lines
            .iter()
            .find_map(|l| PLOT_FILENAME.captures(l).map(|c| c[1].to_string()))
    };
    let model_file = if model_name.is_empty() {
        PathBuf::new()
    } else {
        model_file_path(&model_name)
    };

    Ok(TestRecord {
        mapping: ScriptMapping {
            script: script.to_string(),
            model_file,
            reference_file: reference_file_name(library, script),
        },
        model_name,
        must_simulate,
        must_export_fmu,
        start_time: start_time.unwrap_or(0.0),
        stop_time: stop_time.unwrap_or(1.0),
        plot_groups,
        result_file,
        fmu_name,
        settings: ExperimentSettings::default(),
    })
}

fn parse_time(script: &str, keyword: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| Error::Catalog(format!("{script}: could not parse {keyword}={value}.")))
}

/// Value of `keyword=...` up to the next `,` or `)`, without enclosing quotes
fn attribute_value(line: &str, keyword: &str) -> Option<String> {
    let pos = line.find(keyword)?;
    let after = &line[pos + keyword.len()..];
    let rest = after.strip_prefix('=')?;
    let end = rest.find([',', ')']).unwrap_or(rest.len());
    let value = &rest[..end];
    let value = value.strip_prefix('"').unwrap_or(value);
    let value = value.strip_suffix('"').unwrap_or(value);
    Some(value.to_string())
}

/// FMU file name generated for `model`
///
/// `_` becomes `_0` and `.` becomes `_`, so
/// `Lib.FMUs.Source_m_flow` is exported as `Lib_FMUs_Source_0m_0flow.fmu`.
#[must_use]
pub fn fmu_file_name(model: &str) -> String {
    format!("{}.fmu", model.replace('_', "_0").replace('.', "_"))
}

/// Model file of `model`, relative to the parent of the library root
#[must_use]
pub fn model_file_path(model: &str) -> PathBuf {
    let mut path: PathBuf = model.split('.').collect();
    path.set_extension("mo");
    path
}

/// Variables of a `y = {...}` plot assignment
///
/// Returns `Ok(None)` if the line has no plot assignment. Array indices are
/// normalised to `a[1, 1]`.
///
/// # Errors
///
/// Returns [`Error::Catalog`] if a `y = {` is not closed on the same line.
pub fn plot_variables(line: &str) -> Result<Option<Vec<String>>> {
    let Some(m) = PLOT_GROUP.find(line) else {
        if PLOT_GROUP_OPEN.is_match(line) {
            return Err(Error::Catalog(format!("Malformed line '{line}'")));
        }
        return Ok(None);
    };
    let inner = BRACES
        .find(m.as_str())
        .map(|b| b.as_str().trim_matches(|c| c == '{' || c == '}'))
        .unwrap_or_default();

    let variables = lex_names(inner)
        .into_iter()
        .map(|name| {
            let name = name.replace('"', "");
            COMMA_SPACING
                .replace_all(name.trim(), ", ")
                .into_owned()
        })
        .filter(|name| !name.is_empty())
        .collect();
    Ok(Some(variables))
}

/// Split a comma separated list of names, keeping quoted names together
fn lex_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                current.push(c);
                quoted = !quoted;
                if !quoted {
                    names.push(std::mem::take(&mut current));
                }
            }
            ',' | ' ' | '\t' if !quoted => {
                if !current.is_empty() {
                    names.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        names.push(current);
    }
    names
}

/// A plot-only script takes the artifact of the test that writes its `filename`
fn resolve_plot_only_artifacts(records: &mut [TestRecord]) {
    let producers: HashMap<String, String> = records
        .iter()
        .filter(|r| r.must_simulate)
        .filter_map(|r| {
            let file = r.result_file.as_ref()?;
            let stem = Path::new(file).file_stem()?.to_string_lossy().into_owned();
            Some((stem, file.clone()))
        })
        .collect();
    for record in records.iter_mut().filter(|r| !r.is_executable()) {
        let resolved = record
            .result_file
            .as_deref()
            .and_then(|f| Path::new(f).file_stem())
            .and_then(|stem| producers.get(stem.to_string_lossy().as_ref()))
            .cloned();
        record.result_file = resolved;
    }
}

fn duplicate_artifacts(records: &[TestRecord]) -> Vec<String> {
    let mut problems = Vec::new();
    let mut results = HashSet::new();
    let mut fmus = HashSet::new();
    for record in records.iter().filter(|r| r.is_executable()) {
        if record.must_simulate {
            if let Some(file) = &record.result_file {
                if !results.insert(file.as_str()) {
                    problems.push(format!(
                        "Result file {file} is generated by more than one script.\n\
                         You need to make sure that all scripts use unique result file names."
                    ));
                }
            }
        }
        if let Some(fmu) = &record.fmu_name {
            if !fmus.insert(fmu.as_str()) {
                problems.push(format!(
                    "FMU file {fmu} is generated by more than one script.\n\
                     You need to make sure that all scripts use unique result file names."
                ));
            }
        }
    }
    problems
}

/// Expand `A.{B,C}` to `A.B,A.C`, removing spaces
///
/// # Errors
///
/// Returns [`Error::Catalog`] if the braces are empty or not closed.
pub fn expand_packages(packages: &str) -> Result<String> {
    let Some(open) = packages.find('{') else {
        return Ok(packages.to_string());
    };
    let close = packages
        .find('}')
        .filter(|&close| close > open + 1)
        .ok_or_else(|| Error::Catalog(format!("String '{packages}' is wrong formatted")))?;
    let prefix = &packages[..open];
    let expanded: Vec<String> = packages[open + 1..close]
        .split(',')
        .map(|entry| format!("{prefix}{entry}"))
        .collect();
    Ok(expanded.join(",").replace(' ', ""))
}

/// Drop packages contained in another requested package
///
/// Returns the remaining packages in sorted order.
#[must_use]
pub fn remove_nested_packages(packages: &[String], reporter: &Reporter) -> Vec<String> {
    let mut sorted = packages.to_vec();
    sorted.sort();
    let mut kept: Vec<String> = Vec::new();
    for package in sorted {
        let mut add = true;
        for parent in &kept {
            if package.starts_with(parent.as_str()) {
                add = false;
                reporter.warning(format!(
                    "Found package that is contained in other package in test configuration '{package}' and '{parent}'"
                ));
            }
        }
        if add {
            kept.push(package);
        }
    }
    kept
}

/// Script directories of the requested packages
///
/// # Errors
///
/// Returns [`Error::Catalog`] if a package has no script directory.
pub fn select_packages(
    script_root: &Path,
    packages: &str,
    reporter: &Reporter,
) -> Result<Vec<PathBuf>> {
    let requested: Vec<String> = if packages.contains(',') {
        expand_packages(packages)?
            .split(',')
            .map(str::to_string)
            .collect()
    } else {
        vec![packages.trim().to_string()]
    };
    let packages = remove_nested_packages(&requested, reporter);
    reporter.output(format!(
        "Regression tests are only run for the following package{}:",
        if packages.len() == 1 { "" } else { "s" }
    ));
    let mut roots = Vec::with_capacity(packages.len());
    for package in &packages {
        reporter.output(format!("  {package}"));
        let dir = package
            .split_once('.')
            .map_or(script_root.to_path_buf(), |(_, rest)| {
                rest.split('.').fold(script_root.to_path_buf(), |p, s| p.join(s))
            });
        if !dir.is_dir() {
            return Err(Error::Catalog(format!(
                "Requested to test only package '{package}', but directory '{}' does not exist.",
                dir.display()
            )));
        }
        roots.push(dir);
    }
    Ok(roots)
}

/// Scripts listed in an exclude file, relative to the script directory
///
/// # Errors
///
/// Returns [`Error::Config`] if the file does not exist.
pub fn read_exclusions(path: &Path, library: &str, reporter: &Reporter) -> Result<HashSet<String>> {
    if !path.is_file() {
        reporter.error(format!("Could not find file {}", path.display()));
        return Err(Error::Config(format!("exclude file {} not found", path.display())));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|l| l.trim_end().ends_with(".mos") && !l.starts_with('#'))
        .map(|l| {
            let tail = l.rsplit_once(library).map_or(l, |(_, tail)| tail);
            let tail = tail.trim_end().replace('\\', "/");
            let tail = tail.trim_start_matches('/');
            tail.strip_prefix(&format!("{SCRIPT_SUBDIR}/"))
                .unwrap_or(tail)
                .to_string()
        })
        .collect())
}

/// `Tolerance` annotation of `model`
///
/// # Errors
///
/// Returns [`Error::Catalog`] if the model file does not exist or does not
/// hold exactly one `Tolerance` entry.
pub fn tolerance_of(library_root: &Path, model: &str) -> Result<f64> {
    let parent = library_root.parent().unwrap_or(library_root);
    let file = parent.join(model_file_path(model));
    if !file.is_file() {
        return Err(Error::Catalog(format!(
            "Failed to find file '{}' for model '{model}'",
            file.display()
        )));
    }
    let content = std::fs::read_to_string(&file)?;
    let found: Vec<&str> = content
        .lines()
        .filter_map(|l| TOLERANCE.captures(l).and_then(|c| c.get(1)).map(|m| m.as_str()))
        .collect();
    match found.as_slice() {
        [] => Err(Error::Catalog(format!(
            "Failed to find Tolerance in '{}'.",
            file.display()
        ))),
        [value] => value.replace(' ', "").parse().map_err(|_| {
            Error::Catalog(format!("Invalid Tolerance '{value}' in '{}'.", file.display()))
        }),
        _ => Err(Error::Catalog(format!(
            "Found multiple entries for Tolerance in '{}', but require exactly one entry.",
            file.display()
        ))),
    }
}

/// Number of models, blocks and functions of a library
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCount {
    /// Models
    pub models: usize,
    /// Blocks
    pub blocks: usize,
    /// Functions
    pub functions: usize,
}

/// Count classes whose file starts with `within` followed by the class keyword
///
/// `partial` classes are not counted since their header starts differently.
///
/// # Errors
///
/// Returns an error if the library tree cannot be walked.
pub fn count_classes(library_root: &Path) -> Result<ClassCount> {
    let mut count = ClassCount::default();
    let walker = WalkDir::new(library_root)
        .into_iter()
        .filter_entry(|e| !matches!(e.file_name().to_str(), Some(".svn" | ".git")));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.path().extension().is_none_or(|e| e != "mo") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        let mut lines = content.lines().map(str::trim);
        if !lines.next().is_some_and(|l| l.starts_with("within")) {
            continue;
        }
        match lines.next() {
            Some(l) if l.starts_with("model") => count.models += 1,
            Some(l) if l.starts_with("block") => count.blocks += 1,
            Some(l) if l.starts_with("function") => count.functions += 1,
            _ => {}
        }
    }
    Ok(count)
}
