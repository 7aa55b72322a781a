//! Test fixtures for simreg-runner unit tests
//!
//! Provides minimal model libraries in temporary directories, so catalog,
//! sandbox and verification tests run without a real library.

use crate::catalog::{SCRIPT_SUBDIR, model_file_path};
use crate::config::EXPERIMENT_SETTINGS_FILE;
use crate::reference::REFERENCE_SUBDIR;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A library on disk; deleted when dropped
#[derive(Debug)]
pub struct Library {
    _dir: TempDir,
    root: PathBuf,
}

impl Library {
    /// Library root, e.g. `<tmp>/Lib`
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reference directory below the root
    #[must_use]
    pub fn reference_dir(&self) -> PathBuf {
        self.root.join(REFERENCE_SUBDIR)
    }

    /// Directory holding the library root
    #[must_use]
    pub fn parent(&self) -> &Path {
        self._dir.path()
    }
}

/// Builder for libraries with scripts, models and references
#[derive(Debug, Clone)]
pub struct LibraryBuilder {
    name: String,
    scripts: Vec<(String, String)>,
    models: Vec<(String, String)>,
    references: Vec<(String, String)>,
    settings: Option<String>,
}

impl LibraryBuilder {
    /// Empty library called `name`
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scripts: Vec::new(),
            models: Vec::new(),
            references: Vec::new(),
            settings: None,
        }
    }

    /// Add a script simulating `model` and plotting `variables`, plus the model
    #[must_use]
    pub fn simulating(self, script: &str, model: &str, variables: &[&str]) -> Self {
        let short = model.rsplit('.').next().unwrap_or(model);
        let within = model.rsplit_once('.').map_or("", |(pkg, _)| pkg);
        let vars = variables
            .iter()
            .map(|v| format!("\"{v}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let content = format!(
            "simulateModel(\"{model}\", stopTime=1.0, method=\"CVode\", resultFile=\"{short}\");\n\
             createPlot(id=1, y={{{vars}}}, grid=true);\n"
        );
        let body = format!(
            "within {within};\nmodel {short}\n  Real x = time;\n  annotation(experiment(StopTime=1.0, Tolerance=1e-6));\nend {short};\n"
        );
        self.script(script, &content).model(model, &body)
    }

    /// Add a script with arbitrary content
    #[must_use]
    pub fn script(mut self, path: &str, content: &str) -> Self {
        self.scripts.push((path.to_string(), content.to_string()));
        self
    }

    /// Add a model file
    #[must_use]
    pub fn model(mut self, name: &str, content: &str) -> Self {
        self.models.push((name.to_string(), content.to_string()));
        self
    }

    /// Add a reference file
    #[must_use]
    pub fn reference(mut self, file: &str, content: &str) -> Self {
        self.references.push((file.to_string(), content.to_string()));
        self
    }

    /// Set the content of `conf.json`
    #[must_use]
    pub fn experiment_settings(mut self, json: &str) -> Self {
        self.settings = Some(json.to_string());
        self
    }

    /// Write the library
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn build(self) -> std::io::Result<Library> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join(&self.name);
        std::fs::create_dir_all(root.join(SCRIPT_SUBDIR))?;
        std::fs::write(
            root.join("package.mo"),
            format!("within;\npackage {0}\nend {0};\n", self.name),
        )?;
        for (path, content) in &self.scripts {
            write_file(&root.join(SCRIPT_SUBDIR).join(path), content)?;
        }
        for (name, content) in &self.models {
            write_file(&dir.path().join(model_file_path(name)), content)?;
        }
        for (file, content) in &self.references {
            write_file(&root.join(REFERENCE_SUBDIR).join(file), content)?;
        }
        if let Some(settings) = &self.settings {
            write_file(&root.join(EXPERIMENT_SETTINGS_FILE), settings)?;
        }
        Ok(Library { _dir: dir, root })
    }
}

fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

/// CSV result body with a `time` column and one column per series
#[must_use]
pub fn result_csv(time: &[f64], series: &[(&str, &[f64])]) -> String {
    let mut out = String::from("time");
    for (name, _) in series {
        out.push(',');
        out.push_str(name);
    }
    out.push('\n');
    for (i, t) in time.iter().enumerate() {
        out.push_str(&t.to_string());
        for (_, values) in series {
            out.push(',');
            if let Some(v) = values.get(i) {
                out.push_str(&v.to_string());
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_layout() {
        let lib = LibraryBuilder::new("Lib")
            .simulating("Fluid/Tank.mos", "Lib.Fluid.Tank", &["x", "y"])
            .reference("Lib_Fluid_Tank.txt", "last-generated=2024-01-01\n")
            .experiment_settings("[]")
            .build()
            .unwrap();
        assert!(lib.root().ends_with("Lib"));
        assert!(lib.root().join("package.mo").is_file());
        assert!(lib.root().join("Fluid/Tank.mo").is_file());
        assert!(lib.reference_dir().join("Lib_Fluid_Tank.txt").is_file());
        assert!(lib.root().join(EXPERIMENT_SETTINGS_FILE).is_file());
        let script = std::fs::read_to_string(lib.root().join(SCRIPT_SUBDIR).join("Fluid/Tank.mos")).unwrap();
        assert!(script.contains("y={\"x\", \"y\"}"));
        assert_eq!(lib.parent(), lib.root().parent().unwrap());
    }

    #[test]
    fn test_result_csv_sparse_columns() {
        let csv = result_csv(&[0.0, 0.5, 1.0], &[("x", &[1.0, 2.0, 3.0]), ("k", &[4.0])]);
        assert_eq!(csv, "time,x,k\n0,1,4\n0.5,2,\n1,3,\n");
    }
}
