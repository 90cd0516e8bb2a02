use std::fmt;
use std::str::FromStr;

use crate::error::CompileError;

/// Dialect the compiled module is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputType {
    /// The traced graph before decomposition, in its own text form.
    Raw,
    #[default]
    Mhlo,
    Tosa,
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputType::Raw => write!(f, "raw"),
            OutputType::Mhlo => write!(f, "mhlo"),
            OutputType::Tosa => write!(f, "tosa"),
        }
    }
}

impl FromStr for OutputType {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(OutputType::Raw),
            "mhlo" => Ok(OutputType::Mhlo),
            "tosa" => Ok(OutputType::Tosa),
            _ => Err(CompileError::UnknownOutputType(s.to_string())),
        }
    }
}

/// How the module is turned into a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TracingMode {
    /// Run `forward` once on the example input and record every op.
    #[default]
    Trace,
    /// Whole-program analysis of the module source. Not available.
    Script,
}

impl fmt::Display for TracingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingMode::Trace => write!(f, "trace"),
            TracingMode::Script => write!(f, "script"),
        }
    }
}

impl FromStr for TracingMode {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(TracingMode::Trace),
            "script" => Ok(TracingMode::Script),
            _ => Err(CompileError::UnsupportedTracingMode(s.to_string())),
        }
    }
}

/// A compiled module: the dialect it targets and its rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrModule {
    output_type: OutputType,
    text: String,
}

impl IrModule {
    pub(crate) fn new(output_type: OutputType, text: String) -> Self {
        IrModule { output_type, text }
    }

    pub fn output_type(&self) -> OutputType {
        self.output_type
    }

    /// Canonical textual form, as written to disk.
    pub fn to_text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_type_parse_ignores_case() {
        assert_eq!("MHLO".parse::<OutputType>().unwrap(), OutputType::Mhlo);
        assert_eq!("mhlo".parse::<OutputType>().unwrap(), OutputType::Mhlo);
        assert_eq!("Tosa".parse::<OutputType>().unwrap(), OutputType::Tosa);
        assert_eq!("raw".parse::<OutputType>().unwrap(), OutputType::Raw);
        assert!(matches!(
            "linalg".parse::<OutputType>(),
            Err(CompileError::UnknownOutputType(s)) if s == "linalg"
        ));
        assert_eq!(OutputType::default(), OutputType::Mhlo);
        assert_eq!(OutputType::Tosa.to_string(), "tosa");
    }

    #[test]
    fn test_tracing_mode_parse() {
        assert_eq!("TRACE".parse::<TracingMode>().unwrap(), TracingMode::Trace);
        assert_eq!("script".parse::<TracingMode>().unwrap(), TracingMode::Script);
        assert!("jit".parse::<TracingMode>().is_err());
        assert_eq!(TracingMode::default(), TracingMode::Trace);
    }

    #[test]
    fn test_ir_module_text() {
        let m = IrModule::new(OutputType::Raw, "graph @m() -> () {\n}\n".to_string());
        assert_eq!(m.to_string(), m.to_text());
        assert_eq!(m.output_type(), OutputType::Raw);
    }
}
