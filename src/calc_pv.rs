//! Computed process variables.
//!
//! A calc PV is named `CALC\{<formula>}(<input>, ...)`, for example
//! `CALC\{(A+B)/2}(tank:level1, tank:level2)`. The n-th input PV feeds the
//! formula variable `A + n`. Each time an input delivers a sample the formula
//! is re-evaluated, as long as every input it reads holds a valid value.

use thiserror::Error;

use crate::compile::{compile, CompileError};
use crate::program::{input_name, CompiledProgram, NUM_INPUTS};

const SCHEME: &str = "calc://";
const PREFIX: &str = "CALC\\{";

/// Alarm severity attached to a sample, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    #[default]
    NoAlarm,
    Minor,
    Major,
    Invalid,
}

/// One reading of a process variable.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub value: f64,
    /// False while the source is disconnected or has never reported.
    pub valid: bool,
    pub severity: Severity,
}

impl Sample {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            valid: true,
            severity: Severity::NoAlarm,
        }
    }

    pub fn invalid() -> Self {
        Self {
            value: 0.0,
            valid: false,
            severity: Severity::Invalid,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CalcPvError {
    #[error("'{0}' is not a calc PV name")]
    NotCalc(String),
    #[error("formula in '{0}' is missing its closing brace")]
    UnclosedFormula(String),
    #[error("malformed input list '{0}'")]
    BadInputList(String),
    #[error("{0} inputs given, at most 12 are supported")]
    TooManyInputs(usize),
    #[error("formula reads input {0} but no PV is bound to it")]
    UnboundInput(char),
    #[error("no input number {0}")]
    UnknownInput(usize),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// The parts of a calc PV name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalcPvSpec {
    pub formula: String,
    pub inputs: Vec<String>,
}

impl CalcPvSpec {
    pub fn parse(name: &str) -> Result<Self, CalcPvError> {
        let not_calc = || CalcPvError::NotCalc(name.to_string());
        let trimmed = name.trim();
        let trimmed = trimmed.strip_prefix(SCHEME).unwrap_or(trimmed);
        let body = trimmed.strip_prefix(PREFIX).ok_or_else(not_calc)?;

        let close = body
            .find('}')
            .ok_or_else(|| CalcPvError::UnclosedFormula(name.to_string()))?;
        let formula = body[..close].trim().to_string();
        let rest = body[close + 1..].trim();

        let inputs = if rest.is_empty() {
            Vec::new()
        } else {
            let list = rest
                .strip_prefix('(')
                .and_then(|list| list.strip_suffix(')'))
                .ok_or_else(|| CalcPvError::BadInputList(rest.to_string()))?;
            let inputs: Vec<String> = list
                .split(',')
                .map(|pv| pv.trim().to_string())
                .collect();
            if inputs.iter().any(String::is_empty) {
                return Err(CalcPvError::BadInputList(rest.to_string()));
            }
            inputs
        };
        if inputs.len() > NUM_INPUTS {
            return Err(CalcPvError::TooManyInputs(inputs.len()));
        }

        Ok(Self { formula, inputs })
    }
}

/// A derived value recomputed from up to [`NUM_INPUTS`] input PVs.
#[derive(Clone, Debug)]
pub struct CalcPv {
    name: String,
    inputs: Vec<String>,
    program: CompiledProgram,
    samples: Vec<Option<Sample>>,
}

impl CalcPv {
    /// Parses and compiles a calc PV name. A formula that does not compile
    /// makes the PV permanently unusable.
    pub fn new(name: &str) -> Result<Self, CalcPvError> {
        let CalcPvSpec { formula, inputs } = CalcPvSpec::parse(name)?;
        let program = compile(&formula)?;
        if let Some(unbound) = program
            .input_usage()
            .iter_ones()
            .find(|&i| i >= inputs.len())
        {
            return Err(CalcPvError::UnboundInput(input_name(unbound)));
        }
        tracing::debug!("calc PV '{}' reads {:?}", name, inputs);
        Ok(Self {
            name: name.to_string(),
            samples: vec![None; inputs.len()],
            inputs,
            program,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the input PVs, in formula variable order.
    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    pub fn program(&self) -> &CompiledProgram {
        &self.program
    }

    /// Records a new sample for input `input` and returns the recomputed
    /// value, or `None` while some input the formula reads is missing or
    /// invalid.
    pub fn update(&mut self, input: usize, sample: Sample) -> Result<Option<Sample>, CalcPvError> {
        let slot = self
            .samples
            .get_mut(input)
            .ok_or(CalcPvError::UnknownInput(input))?;
        *slot = Some(sample);
        Ok(self.current())
    }

    /// The value derived from the samples held right now.
    pub fn current(&self) -> Option<Sample> {
        let mut values = [0.0; NUM_INPUTS];
        let mut severity = Severity::NoAlarm;
        for index in self.program.input_usage().iter_ones() {
            let sample = match self.samples.get(index).copied().flatten() {
                Some(sample) if sample.valid => sample,
                _ => return None,
            };
            values[index] = sample.value;
            severity = severity.max(sample.severity);
        }
        Some(Sample {
            value: self.program.evaluate(&values),
            valid: true,
            severity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompileErrorKind;

    #[test]
    fn parse_name() {
        let spec = CalcPvSpec::parse("CALC\\{(A+B)/2}(tank:l1, tank:l2)").unwrap();
        assert_eq!(spec.formula, "(A+B)/2");
        assert_eq!(spec.inputs, ["tank:l1", "tank:l2"]);

        let spec = CalcPvSpec::parse("calc://CALC\\{PI}").unwrap();
        assert_eq!(spec.formula, "PI");
        assert!(spec.inputs.is_empty());
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            CalcPvSpec::parse("tank:level"),
            Err(CalcPvError::NotCalc("tank:level".to_string()))
        );
        assert!(matches!(
            CalcPvSpec::parse("CALC\\{A+1(x)"),
            Err(CalcPvError::UnclosedFormula(_))
        ));
        assert!(matches!(
            CalcPvSpec::parse("CALC\\{A+B}(x,,y)"),
            Err(CalcPvError::BadInputList(_))
        ));
        assert!(matches!(
            CalcPvSpec::parse("CALC\\{A}x"),
            Err(CalcPvError::BadInputList(_))
        ));
        let thirteen = vec!["pv"; 13].join(",");
        assert_eq!(
            CalcPvSpec::parse(&format!("CALC\\{{A}}({thirteen})")),
            Err(CalcPvError::TooManyInputs(13))
        );
    }

    #[test]
    fn bad_formula_is_permanent_error() {
        match CalcPv::new("CALC\\{A+}(x)") {
            Err(CalcPvError::Compile(err)) => {
                assert_eq!(err.kind, CompileErrorKind::ExpectedOperand)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            CalcPv::new("CALC\\{A+C}(x, y)").unwrap_err(),
            CalcPvError::UnboundInput('C')
        );
    }

    #[test]
    fn waits_for_all_used_inputs() {
        let mut pv = CalcPv::new("CALC\\{A+B*2}(a, b, c)").unwrap();
        assert_eq!(pv.update(0, Sample::new(3.0)).unwrap(), None);
        let out = pv.update(1, Sample::new(4.0)).unwrap().unwrap();
        assert_eq!(out.value, 11.0);
        assert!(out.valid);

        // `c` is bound but unused.
        assert_eq!(
            pv.update(2, Sample::invalid()).unwrap().unwrap().value,
            11.0
        );

        assert_eq!(pv.update(1, Sample::invalid()).unwrap(), None);
        assert_eq!(
            pv.update(3, Sample::new(1.0)),
            Err(CalcPvError::UnknownInput(3))
        );
    }

    #[test]
    fn severity_is_worst_of_used_inputs() {
        let mut pv = CalcPv::new("CALC\\{MAX(A,B)}(a, b, c)").unwrap();
        pv.update(0, Sample::new(1.0).with_severity(Severity::Minor)).unwrap();
        pv.update(2, Sample::new(1.0).with_severity(Severity::Invalid)).unwrap();
        let out = pv
            .update(1, Sample::new(5.0).with_severity(Severity::Major))
            .unwrap()
            .unwrap();
        assert_eq!(out.value, 5.0);
        assert_eq!(out.severity, Severity::Major);
    }

    #[test]
    fn constant_formula_is_ready_immediately() {
        let pv = CalcPv::new("CALC\\{2*PI}").unwrap();
        assert_eq!(pv.current().unwrap().value, 2.0 * std::f64::consts::PI);
        assert_eq!(pv.input_names().len(), 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn sample_serde_round_trip() {
        let sample = Sample::new(-2.5).with_severity(Severity::Major);
        let json = serde_json::to_string(&sample).unwrap();
        let restored: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, sample);
        assert!(restored.severity > Severity::Minor);
    }
}
