//! Shared helpers for the integration tests
//!
//! Libraries are written to temporary directories and simulated by a small
//! `/bin/sh` stand-in for the simulator.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// Simulator stand-in
///
/// Reads the `// test <script> <model>` lines of the driver script, copies
/// `@CSV@` to `<model>.csv`, writes a translation log and the statistics
/// feed. The third slot (`tmp-Lib-2-*`) hangs until it is killed.
const FAKE_SIMULATOR: &str = r#"#!/bin/sh
case "$(pwd)" in
  *tmp-Lib-2-*) exec sleep 30 ;;
esac
sep=""
{
  printf '{"testCase": ['
  grep '^// test ' runAll.mos | while read -r _ _ script model; do
    cp "@CSV@" "$model.csv"
    printf 'Translation of model\nSizes after manipulation of the linear systems: {2}\n' > "$model.translation.log"
    printf '%s{"file": "Lib/Resources/Scripts/Dymola/%s", "model": "%s", "check": {"command": "checkModel", "result": true}, "simulate": {"command": "RunScript", "translationLog": "%s.translation.log", "result": true}}' "$sep" "$script" "$model" "$model"
    sep=","
  done
  printf ']}\n'
} > statistics.json
"#;

/// Write a library called `Lib` below `parent`
///
/// Every entry of `tests` is a `(script, model)` pair; each script
/// simulates its model on `[0, 10]` and plots `x`.
pub fn library(parent: &Path, tests: &[(&str, &str)]) -> PathBuf {
    let root = parent.join("Lib");
    let scripts = root.join("Resources/Scripts/Dymola");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(root.join("package.mo"), "within;\npackage Lib\nend Lib;\n").unwrap();
    for (script, model) in tests {
        let path = scripts.join(script);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let short = model.rsplit('.').next().unwrap();
        std::fs::write(
            &path,
            format!(
                "simulateModel(\"{model}\", stopTime=10, method=\"CVode\", resultFile=\"{short}\");\n\
                 createPlot(id=1, y={{\"x\"}}, grid=true);\n"
            ),
        )
        .unwrap();

        let (package, _) = model.rsplit_once('.').unwrap();
        let model_file = parent.join(format!("{}.mo", model.replace('.', "/")));
        std::fs::create_dir_all(model_file.parent().unwrap()).unwrap();
        std::fs::write(
            &model_file,
            format!(
                "within {package};\nmodel {short}\n  Real x = 2*time;\n  annotation(experiment(StopTime=10, Tolerance=1e-6));\nend {short};\n"
            ),
        )
        .unwrap();
    }
    root
}

/// Write a reference file of `Lib`
pub fn reference(root: &Path, file: &str, content: &str) {
    let dir = root.join("Resources/ReferenceResults/Dymola");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), content).unwrap();
}

/// Result file with `x = 2 t` on 101 points of `[0, 10]`, `midpoint` added at t = 5
pub fn ramp_csv(path: &Path, midpoint: f64) {
    let mut body = String::from("time,x\n");
    for i in 0..=100 {
        let t = f64::from(i) / 10.0;
        let x = if i == 50 { 2.0 * t + midpoint } else { 2.0 * t };
        body.push_str(&format!("{t},{x}\n"));
    }
    std::fs::write(path, body).unwrap();
}

/// Install the simulator stand-in in `dir`, copying `result_csv` for every test
#[cfg(unix)]
pub fn fake_simulator(dir: &Path, result_csv: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-simulator.sh");
    let script = FAKE_SIMULATOR.replace("@CSV@", &result_csv.display().to_string());
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
