//! Translation log diagnostics
//!
//! Each [`TranslationDiagnostic`] names one kind of problem the simulator
//! reports while translating a model, together with the log text that
//! reveals it.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static NUMERICAL_JACOBIANS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"Number of numerical Jacobians: (\d*)").unwrap()
});

/// A problem found in a translation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TranslationDiagnostic {
    // === Numerics ===
    /// Jacobians that are computed numerically
    NumericalJacobians,
    /// `if` expressions differentiated under a smoothness assumption
    DifferentiatedIf,
    /// Derivative annotation does not match the function arguments
    WrongDerivativeSpecification,

    // === Connections ===
    /// Connector variables without use
    UnusedConnector,
    /// The same connection made twice
    RedundantConnection,
    /// Connect statements that were dropped
    InvalidConnect,

    // === Initialization ===
    /// Parameters with a start value only
    ParameterWithStartValueOnly,
    /// Consistent but redundant initial conditions
    RedundantConsistentInitialConditions,
    /// Initial conditions chosen by the simulator
    UnspecifiedInitialConditions,

    // === Types ===
    /// Definition equations with inconsistent types
    TypeInconsistentDefinitionEquations,
    /// Incompatible types in a binding
    TypeIncompatibility,
    /// Redeclaration of a non-replaceable class
    RedeclareNonReplaceable,
    /// `displayUnit` that does not match the unit
    MismatchedDisplayUnits,
    /// `min`/`max` attributes that look wrong
    SuspiciousAttributes,

    // === Model setup ===
    /// Unreadable `experiment` annotation
    ExperimentAnnotation,
    /// Referenced file missing
    FileNotFound,
    /// `stateGraphRoot` introduced automatically
    StateGraphRootMissing,
}

impl TranslationDiagnostic {
    /// Short key used in the statistics feed
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::NumericalJacobians => "numerical Jacobians",
            Self::DifferentiatedIf => "differentiated if",
            Self::WrongDerivativeSpecification => "wrong derivative specification",
            Self::UnusedConnector => "unused connector",
            Self::RedundantConnection => "redundant connection",
            Self::InvalidConnect => "invalid connect",
            Self::ParameterWithStartValueOnly => "parameter with start value only",
            Self::RedundantConsistentInitialConditions => "redundant consistent initial conditions",
            Self::UnspecifiedInitialConditions => "unspecified initial conditions",
            Self::TypeInconsistentDefinitionEquations => "type inconsistent definition equations",
            Self::TypeIncompatibility => "type incompatibility",
            Self::RedeclareNonReplaceable => "redeclare non-replaceable",
            Self::MismatchedDisplayUnits => "mismatched displayUnits",
            Self::SuspiciousAttributes => "suspicious attributes",
            Self::ExperimentAnnotation => "experiment annotation",
            Self::FileNotFound => "file not found",
            Self::StateGraphRootMissing => "stateGraphRoot missing",
        }
    }

    /// Log text that reveals the problem
    ///
    /// For [`Self::NumericalJacobians`] this is the prefix of the line whose
    /// number is summed.
    #[must_use]
    pub fn tool_message(&self) -> &'static str {
        match self {
            Self::NumericalJacobians => "Number of numerical Jacobians:",
            Self::DifferentiatedIf => "Differentiating (if",
            Self::WrongDerivativeSpecification => "did not match argument",
            Self::UnusedConnector => {
                "Warning: The following connector variables are not used in the model"
            }
            Self::RedundantConnection => "Redundant connection",
            Self::InvalidConnect => "The model contained invalid connect statements.",
            Self::ParameterWithStartValueOnly => {
                "Warning: The following parameters don't have any value, only a start value"
            }
            Self::RedundantConsistentInitialConditions => "Redundant consistent initial conditions:",
            Self::UnspecifiedInitialConditions => "Dymola has selected default initial condition",
            Self::TypeInconsistentDefinitionEquations => "Type inconsistent definition equation",
            Self::TypeIncompatibility => "but they must be compatible",
            Self::RedeclareNonReplaceable => {
                "Warning: Redeclaration of non-replaceable requires type equivalence"
            }
            Self::MismatchedDisplayUnits => "Mismatched displayUnit",
            Self::SuspiciousAttributes => "which is suspicious",
            Self::ExperimentAnnotation => "Warning: Failed to interpret experiment annotation",
            Self::FileNotFound => "which was not found",
            Self::StateGraphRootMissing => {
                "A \\\"stateGraphRoot\\\" component was automatically introduced."
            }
        }
    }

    /// Warning for one model; `command` identifies the simulation
    #[must_use]
    pub fn model_message(&self, command: &str) -> String {
        match self {
            Self::NumericalJacobians => format!("Numerical Jacobian in '{command}'."),
            Self::DifferentiatedIf => {
                format!("Differentiated if-expression under assumption it is smooth in '{command}'.")
            }
            Self::WrongDerivativeSpecification => {
                format!("Check specification of derivative of '{command}'.")
            }
            Self::UnusedConnector => format!("Unused connector variables in '{command}'."),
            Self::RedundantConnection => format!("Redundant connections in '{command}'."),
            Self::InvalidConnect => format!("Invalid connect statements in '{command}'."),
            Self::ParameterWithStartValueOnly => {
                format!("Parameter with start value only in '{command}'.")
            }
            Self::RedundantConsistentInitialConditions => {
                format!("Redundant consistent initial conditions in '{command}'.")
            }
            Self::UnspecifiedInitialConditions => {
                format!("Unspecified initial conditions in '{command}'.")
            }
            Self::TypeInconsistentDefinitionEquations => {
                format!("Type inconsistent definition equations in '{command}'.")
            }
            Self::TypeIncompatibility => format!("Type incompatibility in '{command}'."),
            Self::RedeclareNonReplaceable => {
                format!("Redeclaration of non-replaceable class in '{command}'.")
            }
            Self::MismatchedDisplayUnits => format!("Mismatched displayUnit in '{command}'."),
            Self::SuspiciousAttributes => format!("Check min and max attributes in '{command}'."),
            Self::ExperimentAnnotation => {
                format!("Failed to interpret experiment annotation in '{command}'.")
            }
            Self::FileNotFound => format!("File not found in '{command}'."),
            Self::StateGraphRootMissing => format!(
                "\"inner Modelica.StateGraph.StateGraphRoot\" is missing in '{command}'."
            ),
        }
    }

    /// Label of the summary line
    #[must_use]
    pub fn summary_label(&self) -> &'static str {
        match self {
            Self::NumericalJacobians => "Number of models with numerical Jacobian",
            Self::DifferentiatedIf => "Number of models with differentiated if-expression",
            Self::WrongDerivativeSpecification => "Number of models with wrong derivative specification",
            Self::UnusedConnector => "Number of models with unused connector variables",
            Self::RedundantConnection => "Number of models with redundant connections",
            Self::InvalidConnect => "Number of models with invalid connect statements",
            Self::ParameterWithStartValueOnly => {
                "Number of models with parameters that only have a start value"
            }
            Self::RedundantConsistentInitialConditions => {
                "Number of models with redundant consistent initial conditions"
            }
            Self::UnspecifiedInitialConditions => "Number of models with unspecified initial conditions",
            Self::TypeInconsistentDefinitionEquations => {
                "Number of models with type inconsistent definition equations"
            }
            Self::TypeIncompatibility => "Number of models with incompatible types",
            Self::RedeclareNonReplaceable => "Number of models with redeclaration of non-replaceable class",
            Self::MismatchedDisplayUnits => "Number of models with mismatched displayUnit",
            Self::SuspiciousAttributes => "Number of models with suspicious attributes (likely min/max)",
            Self::ExperimentAnnotation => "Number of models with wrong experiment annotation",
            Self::FileNotFound => "Number of models with file not found",
            Self::StateGraphRootMissing => "Number of models with missing StateGraphRoot",
        }
    }

    /// Summary line for `count` affected models
    #[must_use]
    pub fn summary_message(&self, count: usize) -> String {
        format!("{:<61}: {count}", self.summary_label())
    }

    /// Occurrences in one log: summed counts for numerical Jacobians, matching lines otherwise
    #[must_use]
    pub fn count_in(&self, log: &str) -> usize {
        match self {
            Self::NumericalJacobians => log
                .lines()
                .filter_map(|l| NUMERICAL_JACOBIANS.captures(l))
                .filter_map(|c| c[1].parse::<usize>().ok())
                .sum(),
            _ => log.lines().filter(|l| l.contains(self.tool_message())).count(),
        }
    }

    /// All diagnostics, in reporting order
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[
            Self::NumericalJacobians,
            Self::UnusedConnector,
            Self::ParameterWithStartValueOnly,
            Self::RedundantConsistentInitialConditions,
            Self::RedundantConnection,
            Self::TypeInconsistentDefinitionEquations,
            Self::TypeIncompatibility,
            Self::UnspecifiedInitialConditions,
            Self::InvalidConnect,
            Self::DifferentiatedIf,
            Self::RedeclareNonReplaceable,
            Self::ExperimentAnnotation,
            Self::FileNotFound,
            Self::StateGraphRootMissing,
            Self::MismatchedDisplayUnits,
            Self::SuspiciousAttributes,
            Self::WrongDerivativeSpecification,
        ]
    }
}

/// Count every diagnostic in `log`, keeping only the ones that occur
#[must_use]
pub fn scan_translation_log(log: &str) -> BTreeMap<TranslationDiagnostic, usize> {
    TranslationDiagnostic::all()
        .iter()
        .map(|d| (*d, d.count_in(log)))
        .filter(|(_, n)| *n > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_unique() {
        let keys: HashSet<&str> = TranslationDiagnostic::all().iter().map(|d| d.key()).collect();
        assert_eq!(keys.len(), TranslationDiagnostic::all().len());
    }

    #[test]
    fn test_numerical_jacobians_summed() {
        let log = "Number of numerical Jacobians: 2\nfoo\nNumber of numerical Jacobians: 3\n";
        assert_eq!(TranslationDiagnostic::NumericalJacobians.count_in(log), 5);
        let log = "Number of numerical Jacobians: 0\n";
        assert_eq!(TranslationDiagnostic::NumericalJacobians.count_in(log), 0);
    }

    #[test]
    fn test_substring_counts_lines() {
        let log = "Redundant connection a - b\nRedundant connection c - d\nok\n";
        assert_eq!(TranslationDiagnostic::RedundantConnection.count_in(log), 2);
    }

    #[test]
    fn test_scan_translation_log() {
        let log = "Warning: The following connector variables are not used in the model\n\
                   Dymola has selected default initial conditions\n\
                   Number of numerical Jacobians: 0\n";
        let found = scan_translation_log(log);
        assert_eq!(found.len(), 2);
        assert_eq!(found.get(&TranslationDiagnostic::UnusedConnector), Some(&1));
        assert!(found.contains_key(&TranslationDiagnostic::UnspecifiedInitialConditions));
        assert!(!found.contains_key(&TranslationDiagnostic::NumericalJacobians));
    }

    #[test]
    fn test_messages() {
        let d = TranslationDiagnostic::TypeIncompatibility;
        assert_eq!(
            d.model_message("RunScript(\"A.mos\");"),
            "Type incompatibility in 'RunScript(\"A.mos\");'."
        );
        assert!(d.summary_message(3).ends_with(": 3"));
        assert!(d.summary_message(3).starts_with("Number of models with incompatible types "));
    }

    #[test]
    fn test_clean_log() {
        assert!(scan_translation_log("Translation completed.\n").is_empty());
    }
}
