//! Per-slot copies of the library
//!
//! Each worker slot runs the simulator in its own [`Sandbox`]: a temporary
//! directory `tmp-<Library>-<slot>-XXXX` holding a copy of the library
//! without version control data, old results and documentation. The slot's
//! driver script is written into the copied library directory.

use crate::catalog::{SCRIPT_SUBDIR, TestRecord};
use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Driver script executed by the simulator
pub const DRIVER_SCRIPT: &str = "runAll.mos";

/// Feed written by the driver script
pub const STATISTICS_FILE: &str = "statistics.json";

/// Standard output and error of the simulator process
pub const STDOUT_LOG: &str = "stdout.log";

/// Entries never copied into a sandbox
const IGNORED_NAMES: &[&str] = &[
    ".svn",
    ".git",
    "dsmodel.c",
    "dymosim",
    "request.",
    "status.",
    "funnel_comp",
    "fmi-library",
    "Documentation",
    "ReferenceResults",
    "help",
    "compareVars",
    "__pychache__",
];

static RESULT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r#"resultFile\s*=\s*"(.+)""#).unwrap()
});

/// True if a file or directory named `name` is left out of sandboxes
#[must_use]
pub fn is_ignored(name: &str) -> bool {
    IGNORED_NAMES.contains(&name)
        || name.ends_with(".mat")
        || name.ends_with(".log")
        || name.starts_with("tmp-")
}

/// Working directory of one slot
#[derive(Debug)]
pub struct Sandbox {
    slot: usize,
    root: PathBuf,
    library_dir: PathBuf,
    temp: Option<TempDir>,
}

impl Sandbox {
    /// Copy the library into a new temporary directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sandbox`] if the directory cannot be created or the
    /// library cannot be copied.
    pub fn create(library_root: &Path, library: &str, slot: usize) -> Result<Self> {
        Self::create_in(&std::env::temp_dir(), library_root, library, slot)
    }

    /// Like [`Sandbox::create`], placing the sandbox below `parent`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sandbox`] if the directory cannot be created or the
    /// library cannot be copied.
    pub fn create_in(parent: &Path, library_root: &Path, library: &str, slot: usize) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix(&format!("tmp-{library}-{slot}-"))
            .tempdir_in(parent)
            .map_err(|e| Error::Sandbox(format!("Failed to create sandbox for slot {slot}: {e}")))?;
        let root = temp.path().to_path_buf();
        let library_dir = root.join(library);
        copy_library(library_root, &library_dir).map_err(|e| {
            Error::Sandbox(format!(
                "Failed to copy {} to {}: {e}",
                library_root.display(),
                library_dir.display()
            ))
        })?;
        tracing::debug!(slot, path = %root.display(), "created sandbox");
        Ok(Self {
            slot,
            root,
            library_dir,
            temp: Some(temp),
        })
    }

    /// Use a directory of an earlier run; it is never deleted
    #[must_use]
    pub fn existing(root: impl Into<PathBuf>, library: &str, slot: usize) -> Self {
        let root = root.into();
        let library_dir = root.join(library);
        Self {
            slot,
            root,
            library_dir,
            temp: None,
        }
    }

    /// Slot index
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Sandbox directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copied library directory, where the simulator runs
    #[must_use]
    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// Path of the driver script
    #[must_use]
    pub fn driver_path(&self) -> PathBuf {
        self.library_dir.join(DRIVER_SCRIPT)
    }

    /// Path of the slot's statistics feed
    #[must_use]
    pub fn statistics_path(&self) -> PathBuf {
        self.library_dir.join(STATISTICS_FILE)
    }

    /// Path of the simulator's console log
    #[must_use]
    pub fn stdout_log(&self) -> PathBuf {
        self.library_dir.join(STDOUT_LOG)
    }

    /// Prepare the copied scripts and write the driver for `records`
    ///
    /// # Errors
    ///
    /// Returns an error if a script or the driver cannot be written.
    pub fn write_driver(&self, records: &[&TestRecord], tool: &str, n_slots: usize) -> Result<()> {
        for record in records {
            let path = self.library_dir.join(SCRIPT_SUBDIR).join(record.script());
            let content = std::fs::read_to_string(&path)?;
            let content = content.trim_start_matches('\u{feff}');
            let mut updated = strip_plot_commands(content);
            if let Some(rewritten) = rewrite_result_file(&updated, &record.model_name) {
                updated = rewritten;
            }
            std::fs::write(&path, updated)?;
        }
        let driver = render_driver(records, tool, self.slot, n_slots, &self.library_dir);
        std::fs::write(self.driver_path(), driver)?;
        tracing::debug!(slot = self.slot, tests = records.len(), "wrote driver script");
        Ok(())
    }

    /// Translation logs in the library directory, sorted by name
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn translation_logs(&self) -> Result<Vec<PathBuf>> {
        let mut logs = Vec::new();
        for entry in std::fs::read_dir(&self.library_dir)? {
            let path = entry?.path();
            let is_log = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(".translation.log"));
            if is_log && path.is_file() {
                logs.push(path);
            }
        }
        logs.sort();
        Ok(logs)
    }

    /// Delete the sandbox, or keep it and return its path
    ///
    /// Directories of an earlier run are always kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be removed.
    pub fn release(self, keep: bool) -> std::io::Result<Option<PathBuf>> {
        match self.temp {
            Some(temp) if keep => Ok(Some(temp.keep())),
            Some(temp) => {
                temp.close()?;
                Ok(None)
            }
            None => Ok(Some(self.root)),
        }
    }
}

/// Copy `src` to `dst`, skipping ignored entries and preserving symlinks
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or an entry cannot be copied.
pub fn copy_library(src: &Path, dst: &Path) -> Result<()> {
    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Sandbox(e.to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    let link = std::fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}

/// Remove `removePlots(...)` lines and multi-line `createPlot(...)` statements
#[must_use]
pub fn strip_plot_commands(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_plot = false;
    for line in content.split_inclusive('\n') {
        if in_plot {
            if line.contains(';') {
                in_plot = false;
            }
        } else if line.contains("createPlot(") {
            in_plot = !line.contains(';');
        } else if !line.contains("removePlots(") {
            out.push_str(line);
        }
    }
    out
}

/// Point every `resultFile="..."` at `model`; `None` if the script has none
#[must_use]
pub fn rewrite_result_file(content: &str, model: &str) -> Option<String> {
    if !RESULT_FILE.is_match(content) {
        return None;
    }
    let replacement = format!("resultFile=\"{model}\"");
    Some(
        RESULT_FILE
            .replace_all(content, regex::NoExpand(&replacement))
            .into_owned(),
    )
}

/// `(script, model)` pairs listed in a driver script
#[must_use]
pub fn driver_entries(driver: &str) -> Vec<(String, String)> {
    driver
        .lines()
        .filter_map(|line| line.strip_prefix("// test "))
        .filter_map(|rest| {
            let mut parts = rest.split_whitespace();
            Some((parts.next()?.to_string(), parts.next()?.to_string()))
        })
        .collect()
}

const HEADER: &str = r#"// File autogenerated for process {slot} of {n_slots}
// File created for execution by {tool}. Do not edit.
// Disable parallel computing as this can give slightly different results.
Advanced.ParallelizeCode = false;
// Default values for options that can give slightly different results.
Evaluate=false;
Advanced.CompileWith64=2;
Advanced.EfficientMinorEvents=false;
Advanced.PedanticModelica = false;
orig_Advanced_GenerateVariableDependencies = Advanced.GenerateVariableDependencies;
Advanced.GenerateVariableDependencies = false;
cd("{library_dir}");
openModel("package.mo")
Advanced.TranslationInCommandLog := true;
Modelica.Utilities.Files.remove("{stats}");
Modelica.Utilities.Streams.print("{\"testCase\" : [", "{stats}");
"#;

const CHECK: &str = r#"
// test {script} {model}
Modelica.Utilities.Files.remove("{model}.translation.log");
Modelica.Utilities.Files.remove("dslog.txt");
clearlog();
rCheck = checkModel("{model}");
Modelica.Utilities.Streams.print("    { \"file\" :  \"{library}/{script_subdir}/{script}\",", "{stats}");
Modelica.Utilities.Streams.print("      \"model\" : \"{model}\",", "{stats}");
Modelica.Utilities.Streams.print("      \"check\" : {", "{stats}");
Modelica.Utilities.Streams.print("        \"command\" : \"checkModel(\\\"{model}\\\");\",", "{stats}");
Modelica.Utilities.Streams.print("        \"result\"  : " + String(rCheck), "{stats}");
"#;

const SIMULATE: &str = r#"rScript=RunScript("{script_subdir}/{script}");
savelog("{model}.translation.log");
if Modelica.Utilities.Files.exist("{mat}") then
  rConvert=DataFiles.convertMATtoCSV("{mat}", {result_vars}, "{result}");
end if;
if Modelica.Utilities.Files.exist("dslog.txt") then
  Modelica.Utilities.Files.move("dslog.txt", "{model}.dslog.log");
end if;
iSuc=0;
intTimRec="temp";
intTim="0";
jacRec="temp";
numJac="0";
staRec="temp";
numSta="0";
if Modelica.Utilities.Files.exist("{model}.dslog.log") then
  iLin=1;
  endOfFile=false;
  while (not endOfFile) loop
    (_line, endOfFile)=Modelica.Utilities.Streams.readLine("{model}.dslog.log", iLin);
    iLin=iLin+1;
    iSuc=iSuc+Modelica.Utilities.Strings.count(_line, "Integration terminated successfully");
    if (Modelica.Utilities.Strings.find(_line, "CPU-time for integration") > 0) then
      intTimRec = _line;
    end if;
    if (Modelica.Utilities.Strings.find(_line, "Number of Jacobian-evaluations") > 0) then
      jacRec = _line;
    end if;
    if (Modelica.Utilities.Strings.find(_line, "Number of state events") > 0) then
      staRec = _line;
      break;
    end if;
  end while;
  if iSuc > 0 then
    if not Modelica.Utilities.Strings.isEqual(intTimRec, "temp") then
      intTim = Modelica.Utilities.Strings.substring(intTimRec,
        Modelica.Utilities.Strings.find(intTimRec, ":")+1,
        Modelica.Utilities.Strings.findLast(intTimRec, " ")-1);
    end if;
    if not Modelica.Utilities.Strings.isEqual(jacRec, "temp") then
      numJac = Modelica.Utilities.Strings.substring(jacRec,
        Modelica.Utilities.Strings.find(jacRec, ":")+1,
        Modelica.Utilities.Strings.length(jacRec));
    end if;
    if not Modelica.Utilities.Strings.isEqual(staRec, "temp") then
      numSta = Modelica.Utilities.Strings.substring(staRec,
        Modelica.Utilities.Strings.find(staRec, ":")+1,
        Modelica.Utilities.Strings.length(staRec));
    end if;
  end if;
  Modelica.Utilities.Streams.close("{model}.dslog.log");
end if;
Modelica.Utilities.Streams.print("      \"simulate\" : {", "{stats}");
Modelica.Utilities.Streams.print("        \"command\" : \"RunScript(\\\"{script_subdir}/{script}\\\");\",", "{stats}");
Modelica.Utilities.Streams.print("        \"translationLog\"  : \"{model}.translation.log\",", "{stats}");
Modelica.Utilities.Streams.print("        \"elapsed_time\"  :" + intTim + ",", "{stats}");
Modelica.Utilities.Streams.print("        \"jacobians\"  :" + numJac + ",", "{stats}");
Modelica.Utilities.Streams.print("        \"state_events\"  :" + numSta + ",", "{stats}");
Modelica.Utilities.Streams.print("        \"start_time\"  :" + String({start_time}) + ",", "{stats}");
Modelica.Utilities.Streams.print("        \"final_time\"  :" + String({stop_time}) + ",", "{stats}");
Modelica.Utilities.Streams.print("        \"result\"  : " + String(iSuc > 0), "{stats}");
"#;

const TRANSLATE: &str = r#"rTranslate = translateModel("{model}");
savelog("{model}.translation.log");
Modelica.Utilities.Streams.print("      \"translate\" : {", "{stats}");
Modelica.Utilities.Streams.print("        \"command\" : \"translateModel(\\\"{model}\\\");\",", "{stats}");
Modelica.Utilities.Streams.print("        \"translationLog\"  : \"{model}.translation.log\",", "{stats}");
Modelica.Utilities.Streams.print("        \"result\"  : " + String(rTranslate), "{stats}");
"#;

const FMU_EXPORT: &str = r#"Modelica.Utilities.Files.removeFile("{fmu}");
RunScript("{script_subdir}/{script}");
savelog("{model}.translation.log");
if Modelica.Utilities.Files.exist("dslog.txt") then
  Modelica.Utilities.Files.move("dslog.txt", "{model}.dslog.log");
end if;
iSuc=0;
if Modelica.Utilities.Files.exist("{model}.dslog.log") then
  iLin=1;
  endOfFile=false;
  while (not endOfFile) loop
    (_line, endOfFile)=Modelica.Utilities.Streams.readLine("{model}.dslog.log", iLin);
    iLin=iLin+1;
    iSuc=iSuc+Modelica.Utilities.Strings.count(_line, "Created {fmu}");
  end while;
  Modelica.Utilities.Streams.close("{model}.dslog.log");
end if;
Modelica.Utilities.Streams.print("      \"FMUExport\" : {", "{stats}");
Modelica.Utilities.Streams.print("        \"command\" :\"RunScript(\\\"{script_subdir}/{script}\\\");\",", "{stats}");
Modelica.Utilities.Streams.print("        \"translationLog\"  : \"{model}.translation.log\",", "{stats}");
Modelica.Utilities.Streams.print("        \"result\"  : " + String(iSuc > 0), "{stats}");
"#;

const FOOTER: &str = r#"Advanced.GenerateVariableDependencies = orig_Advanced_GenerateVariableDependencies;
exit();
"#;

fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Modelica string array literal, e.g. `{"time", "x"}`
fn modelica_string_array(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("\"{i}\"")).collect();
    format!("{{{}}}", quoted.join(", "))
}

fn print_stats(line: &str) -> String {
    format!("Modelica.Utilities.Streams.print(\"{line}\", \"{STATISTICS_FILE}\");\n")
}

/// Driver script running `records` in slot `slot` of `n_slots`
///
/// Every test starts with a `// test <script> <model>` line, followed by a
/// model check and one phase: simulation, translation only (when the
/// experiment settings exclude the simulation) or FMU export. Each phase
/// appends its outcome to `statistics.json`.
#[must_use]
pub fn render_driver(
    records: &[&TestRecord],
    tool: &str,
    slot: usize,
    n_slots: usize,
    library_dir: &Path,
) -> String {
    let library = library_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = library_dir.to_string_lossy().replace('\\', "/");
    let slot_text = (slot + 1).to_string();
    let n_text = n_slots.to_string();
    let mut out = fill(
        HEADER,
        &[
            ("slot", &slot_text),
            ("n_slots", &n_text),
            ("tool", tool),
            ("library_dir", &dir),
            ("stats", STATISTICS_FILE),
        ],
    );

    for (i, record) in records.iter().enumerate() {
        let script = record.script().replace('\\', "/");
        let start = record.start_time.to_string();
        let stop = record.stop_time.to_string();
        let fmu = record.fmu_name.clone().unwrap_or_default();
        let mat = record.mat_file();
        let result = record.result_file.clone().unwrap_or_default();
        let result_vars = modelica_string_array(&record.result_variables());
        let vars = [
            ("script", script.as_str()),
            ("model", record.model_name.as_str()),
            ("library", library.as_str()),
            ("script_subdir", SCRIPT_SUBDIR),
            ("stats", STATISTICS_FILE),
            ("start_time", start.as_str()),
            ("stop_time", stop.as_str()),
            ("fmu", fmu.as_str()),
            ("mat", mat.as_str()),
            ("result", result.as_str()),
            ("result_vars", result_vars.as_str()),
        ];

        let mut phases = Vec::new();
        if record.must_simulate {
            if record.settings.simulate {
                phases.push(SIMULATE);
            } else {
                phases.push(TRANSLATE);
            }
        }
        if record.must_export_fmu {
            phases.push(FMU_EXPORT);
        }

        out.push_str(&fill(CHECK, &vars));
        for phase in phases {
            out.push_str(&print_stats("      },"));
            out.push_str(&fill(phase, &vars));
        }
        out.push_str(&print_stats("      }"));
        if i + 1 < records.len() {
            out.push_str(&print_stats("    },"));
        } else {
            out.push_str(&print_stats("    }"));
        }
    }
    out.push_str(&print_stats("  ]"));
    out.push_str(&print_stats("}"));
    out.push_str(FOOTER);
    out
}
