//! Simplified MLIR grammar for rendering.
//!
//! Ops are printed in the generic form
//! `%r = "dialect.op"(%a, %b) ({regions}) {attrs} : (types) -> type`, which
//! every MLIR parser accepts without dialect-specific printers.

use std::fmt::{self, Write as _};

use me_tensor::{CpuStorage, DType, Shape, Tensor};

/// Dense attributes up to this many elements print as a literal list;
/// larger ones print as a hex blob.
pub const ELIDE_LITERAL_LIMIT: usize = 16;

pub fn tensor_type(shape: &Shape, dtype: DType) -> String {
    if shape.ndim() == 0 {
        format!("tensor<{dtype}>")
    } else {
        format!("tensor<{}x{}>", shape.mlir_dims(), dtype)
    }
}

/// Formats an f32 the way MLIR prints float attributes, e.g. `1.000000e+00`.
///
/// The mantissa carries at least six fractional digits and as many more as
/// the shortest round-trip form needs, so the literal parses back to the
/// same bits. Non-finite values use the hex bit pattern, which is the only
/// spelling MLIR accepts for them.
pub fn float_literal(v: f32) -> String {
    if !v.is_finite() {
        return format!("0x{:08X}", v.to_bits());
    }
    let s = format!("{v:e}");
    let Some((mantissa, exp)) = s.split_once('e') else {
        return s;
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{int}.{frac:0<6}e{sign}{:02}", exp.abs())
}

/// `dense<...> : tensor<...>` for an i64 vector attribute.
pub fn dense_i64(values: &[i64]) -> String {
    dense_ints(values, "i64")
}

/// Same as [`dense_i64`] with an i32 element type.
pub fn dense_i32(values: &[i64]) -> String {
    dense_ints(values, "i32")
}

fn dense_ints(values: &[i64], elem: &str) -> String {
    let body = if values.is_empty() {
        String::new()
    } else {
        format!("[{}]", join(values.iter().map(|v| v.to_string())))
    };
    format!("dense<{}> : tensor<{}x{}>", body, values.len(), elem)
}

/// `array<i64: ...>`, the dense array attribute form.
pub fn array_i64(values: &[i64]) -> String {
    if values.is_empty() {
        "array<i64>".to_string()
    } else {
        format!("array<i64: {}>", join(values.iter().map(|v| v.to_string())))
    }
}

/// `dense<...>` for a tensor constant whose every element is `value`.
pub fn dense_splat(value: f32, shape: &Shape) -> String {
    format!(
        "dense<{}> : {}",
        float_literal(value),
        tensor_type(shape, DType::F32)
    )
}

/// `dense<...> : tensor<...>` holding the contents of `tensor`.
pub fn dense_tensor(tensor: &Tensor) -> String {
    let shape = tensor.shape();
    let ty = tensor_type(shape, tensor.dtype());
    if tensor.storage().len() <= ELIDE_LITERAL_LIMIT {
        let literals: Option<Vec<String>> = match tensor.storage() {
            CpuStorage::F32(data) if data.iter().all(|v| v.is_finite()) => {
                Some(data.iter().map(|v| float_literal(*v)).collect())
            }
            CpuStorage::I64(data) => Some(data.iter().map(|v| v.to_string()).collect()),
            CpuStorage::F32(_) => None,
        };
        if let Some(items) = literals {
            return format!("dense<{}> : {}", nest(&items, shape.dims()), ty);
        }
    }

    let mut hex = String::with_capacity(2 + tensor.storage().len() * 8);
    hex.push_str("0x");
    for byte in tensor.storage().to_le_bytes() {
        let _ = write!(hex, "{byte:02X}");
    }
    format!("dense<\"{hex}\"> : {ty}")
}

/// Nests a flat row-major list into brackets following `dims`.
fn nest(items: &[String], dims: &[usize]) -> String {
    match dims.split_first() {
        None => items.first().cloned().unwrap_or_default(),
        Some((&n, rest)) => {
            let chunk = rest.iter().product::<usize>().max(1);
            let parts = (0..n).map(|i| nest(&items[i * chunk..(i + 1) * chunk], rest));
            format!("[{}]", join(parts))
        }
    }
}

fn join(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(", ")
}

/// A block inside an op region, with typed arguments.
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub args: Vec<(String, String)>,
    pub body: Vec<Stmt>,
}

/// One operation.
#[derive(Debug, Clone, Default)]
pub struct Stmt {
    pub results: Vec<String>,
    pub op: String,
    pub operands: Vec<String>,
    pub regions: Vec<Region>,
    /// `(name, rendered value)` pairs.
    pub attrs: Vec<(String, String)>,
    pub operand_types: Vec<String>,
    pub result_types: Vec<String>,
}

impl Stmt {
    pub fn new(op: impl Into<String>) -> Self {
        Stmt {
            op: op.into(),
            ..Stmt::default()
        }
    }

    pub fn result(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.results.push(name.into());
        self.result_types.push(ty.into());
        self
    }

    pub fn operand(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.operands.push(name.into());
        self.operand_types.push(ty.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        write!(f, "{pad}")?;
        if !self.results.is_empty() {
            write!(f, "{} = ", self.results.join(", "))?;
        }
        write!(f, "\"{}\"({})", self.op, self.operands.join(", "))?;
        if !self.regions.is_empty() {
            write!(f, " (")?;
            for (i, region) in self.regions.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                writeln!(f, "{{")?;
                let args: Vec<String> = region
                    .args
                    .iter()
                    .map(|(name, ty)| format!("{name}: {ty}"))
                    .collect();
                writeln!(f, "{pad}^bb0({}):", args.join(", "))?;
                for stmt in &region.body {
                    stmt.write(f, indent + 2)?;
                    writeln!(f)?;
                }
                write!(f, "{pad}}}")?;
            }
            write!(f, ")")?;
        }
        if !self.attrs.is_empty() {
            let attrs: Vec<String> = self
                .attrs
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect();
            write!(f, " {{{}}}", attrs.join(", "))?;
        }
        let results = if self.result_types.len() == 1 {
            self.result_types[0].clone()
        } else {
            format!("({})", self.result_types.join(", "))
        };
        write!(f, " : ({}) -> {}", self.operand_types.join(", "), results)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, 0)
    }
}

/// A `func.func` with a single block.
#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub args: Vec<(String, String)>,
    pub result_types: Vec<String>,
    pub body: Vec<Stmt>,
    pub returns: Vec<String>,
}

impl Func {
    fn write(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(name, ty)| format!("{name}: {ty}"))
            .collect();
        let results = if self.result_types.len() == 1 {
            self.result_types[0].clone()
        } else {
            format!("({})", self.result_types.join(", "))
        };
        writeln!(
            f,
            "{pad}func.func @{}({}) -> {} {{",
            self.name,
            args.join(", "),
            results
        )?;
        for stmt in &self.body {
            stmt.write(f, indent + 2)?;
            writeln!(f)?;
        }
        writeln!(
            f,
            "{pad}  return {} : {}",
            self.returns.join(", "),
            self.result_types.join(", ")
        )?;
        write!(f, "{pad}}}")
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, 0)
    }
}

/// A top-level `module` holding functions.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub attrs: Vec<(String, String)>,
    pub funcs: Vec<Func>,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module")?;
        if !self.attrs.is_empty() {
            let attrs: Vec<String> = self
                .attrs
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect();
            write!(f, " attributes {{{}}}", attrs.join(", "))?;
        }
        writeln!(f, " {{")?;
        for func in &self.funcs {
            func.write(f, 2)?;
            writeln!(f)?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_literal() {
        assert_eq!(float_literal(1.0), "1.000000e+00");
        assert_eq!(float_literal(-0.125), "-1.250000e-01");
        assert_eq!(float_literal(1e-12), "1.000000e-12");
        assert_eq!(float_literal(f32::NEG_INFINITY), "0xFF800000");
    }

    #[test]
    fn test_float_literal_parses_back_exactly() {
        let values = [
            std::f32::consts::FRAC_1_SQRT_2,
            0.100_000_01,
            1.0 / 3.0,
            0.278_393,
            f32::MIN_POSITIVE,
            f32::MAX,
            1e-45,
            1e-12,
            -0.125,
            -0.0,
        ];
        for v in values {
            let text = float_literal(v);
            let parsed: f32 = text.parse().unwrap();
            assert_eq!(parsed.to_bits(), v.to_bits(), "{v} printed as {text}");
        }
        assert_eq!(float_literal(std::f32::consts::FRAC_1_SQRT_2), "7.0710677e-01");
        assert_eq!(float_literal(f32::MAX), "3.4028235e+38");
    }

    #[test]
    fn test_dense_literals_parse_back_exactly() {
        let values = vec![1.0 / 3.0, 0.100_000_01, -2.5e-7];
        let t = Tensor::new(values.clone(), Shape::new(vec![3]));
        let text = dense_tensor(&t);
        let body = text
            .strip_prefix("dense<[")
            .and_then(|s| s.strip_suffix("]> : tensor<3xf32>"))
            .unwrap();
        let parsed: Vec<f32> = body.split(", ").map(|s| s.parse().unwrap()).collect();
        assert_eq!(parsed.len(), values.len());
        for (p, v) in parsed.iter().zip(&values) {
            assert_eq!(p.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_large_tensor_skips_literals() {
        // Non-finite values past the limit still take the hex path.
        let mut data = vec![0.5; ELIDE_LITERAL_LIMIT + 1];
        data[3] = f32::NAN;
        let t = Tensor::new(data, Shape::new(vec![ELIDE_LITERAL_LIMIT + 1]));
        let text = dense_tensor(&t);
        assert!(text.starts_with("dense<\"0x0000003F"));
        assert!(!text.contains("e-01"));

        let shape = Shape::new(vec![ELIDE_LITERAL_LIMIT]);
        let ids = Tensor::from_i64(vec![1; ELIDE_LITERAL_LIMIT], shape).unwrap();
        assert!(dense_tensor(&ids).starts_with("dense<[1, 1,"));
    }

    #[test]
    fn test_dense_literal_and_hex() {
        let small = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], Shape::new(vec![2, 2]));
        assert_eq!(
            dense_tensor(&small),
            "dense<[[1.000000e+00, 2.000000e+00], [3.000000e+00, 4.000000e+00]]> : tensor<2x2xf32>"
        );

        let big = Tensor::ones(Shape::new(vec![17]));
        let text = dense_tensor(&big);
        assert!(text.starts_with("dense<\"0x0000803F0000803F"));
        assert!(text.ends_with("\"> : tensor<17xf32>"));
        assert_eq!(text.matches("0000803F").count(), 17);
    }

    #[test]
    fn test_dense_i64() {
        assert_eq!(dense_i64(&[0, 2, 1]), "dense<[0, 2, 1]> : tensor<3xi64>");
        assert_eq!(dense_i64(&[]), "dense<> : tensor<0xi64>");
        assert_eq!(dense_i32(&[1, 0]), "dense<[1, 0]> : tensor<2xi32>");
        assert_eq!(array_i64(&[1, 4]), "array<i64: 1, 4>");
        let ids = Tensor::from_i64(vec![5, 7], Shape::new(vec![1, 2])).unwrap();
        assert_eq!(dense_tensor(&ids), "dense<[[5, 7]]> : tensor<1x2xi64>");
    }

    #[test]
    fn test_generic_stmt() {
        let stmt = Stmt::new("mhlo.add")
            .operand("%0", "tensor<2xf32>")
            .operand("%1", "tensor<2xf32>")
            .result("%2", "tensor<2xf32>");
        assert_eq!(
            stmt.to_string(),
            "%2 = \"mhlo.add\"(%0, %1) : (tensor<2xf32>, tensor<2xf32>) -> tensor<2xf32>"
        );
        let ret = Stmt::new("mhlo.return").operand("%2", "tensor<f32>");
        assert_eq!(ret.to_string(), "\"mhlo.return\"(%2) : (tensor<f32>) -> ()");
    }

    #[test]
    fn test_module_layout() {
        let region = Region {
            args: vec![
                ("%a".to_string(), "tensor<f32>".to_string()),
                ("%b".to_string(), "tensor<f32>".to_string()),
            ],
            body: vec![Stmt::new("mhlo.return").operand("%a", "tensor<f32>")],
        };
        let module = Module {
            attrs: vec![(
                "torch.debug_module_name".to_string(),
                "\"M\"".to_string(),
            )],
            funcs: vec![Func {
                name: "forward".to_string(),
                args: vec![("%arg0".to_string(), "tensor<2xf32>".to_string())],
                result_types: vec!["tensor<f32>".to_string()],
                body: vec![Stmt::new("mhlo.reduce")
                    .operand("%arg0", "tensor<2xf32>")
                    .region(region)
                    .attr("dimensions", dense_i64(&[0]))
                    .result("%0", "tensor<f32>")],
                returns: vec!["%0".to_string()],
            }],
        };
        let expected = "module attributes {torch.debug_module_name = \"M\"} {
  func.func @forward(%arg0: tensor<2xf32>) -> tensor<f32> {
    %0 = \"mhlo.reduce\"(%arg0) ({
    ^bb0(%a: tensor<f32>, %b: tensor<f32>):
      \"mhlo.return\"(%a) : (tensor<f32>) -> ()
    }) {dimensions = dense<[0]> : tensor<1xi64>} : (tensor<2xf32>) -> tensor<f32>
    return %0 : tensor<f32>
  }
}
";
        assert_eq!(module.to_string(), expected);
    }
}
